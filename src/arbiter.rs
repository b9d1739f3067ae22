/**
 * Mode Arbiter
 *
 * Single owner of the vehicle mode. Exactly one input source produces
 * commands at a time:
 * - Manual: operator throttle and rudder
 * - VisionAuto: steering PID fed by an external steering angle
 * - MissionAuto: waypoint following through the mission engine
 *
 * Emergency stop goes around the arbiter entirely (see [`StopLatch`]).
 */

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::command::{ControlCommand, ServoLimits, MAX_PWM, MIN_PWM, SERVO_CENTER, throttle_to_pwm, check_pwm};
use crate::error::{MissionError, ValidationError, WriteError};
use crate::link::Link;
use crate::mission::{MissionEngine, MissionOutcome, Waypoint};
use crate::pid::{Gains, Pid};
use crate::pubsub::Topic;
use crate::telemetry::VehicleState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Manual,
    VisionAuto,
    MissionAuto,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Manual => "manual",
            Mode::VisionAuto => "vision",
            Mode::MissionAuto => "mission",
        };
        f.write_str(name)
    }
}

/// Who produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    Manual,
    Vision,
    Mission,
    EmergencyStop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArbiterEvent {
    ModeChanged { from: Mode, to: Mode },
    CommandSent { source: CommandSource, command: ControlCommand },
    /// Steering PID input, for plotting the controller response.
    PidSample { setpoint: f64, process_value: f64 },
    EmergencyStop,
}

/// Rudder presets for the manual buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steer {
    Left,
    Center,
    Right,
}

impl Steer {
    pub fn degree(self) -> f64 {
        match self {
            Steer::Left => 45.0,
            Steer::Center => 90.0,
            Steer::Right => 135.0,
        }
    }
}

/// Where commands go. Implemented by [`Link`]; tests record instead.
pub trait CommandSink: Send + Sync {
    fn send_command(&self, command: &ControlCommand) -> Result<(), WriteError>;
}

impl CommandSink for Link {
    fn send_command(&self, command: &ControlCommand) -> Result<(), WriteError> {
        self.send(&command.encode())
    }
}

/// Emergency-stop path shared by the arbiter and anyone who must stop the
/// vehicle without waiting for the arbiter.
///
/// Every trigger bumps a generation counter. Arbiter sends carry the
/// generation they started under and are dropped if it changed, so a neutral
/// command is never overwritten by a decision made before the stop.
#[derive(Clone)]
pub struct StopLatch {
    generation: Arc<AtomicU64>,
    gate: Arc<Mutex<()>>,
    sink: Arc<dyn CommandSink>,
    events: Arc<Topic<ArbiterEvent>>,
}

impl StopLatch {
    pub fn new(sink: Arc<dyn CommandSink>, events: Arc<Topic<ArbiterEvent>>) -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            gate: Arc::new(Mutex::new(())),
            sink,
            events,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Send throttle neutral and rudder center now. Mode is left alone.
    pub fn trigger(&self) -> Result<(), WriteError> {
        let _gate = self.gate.lock().unwrap_or_else(|p| p.into_inner());
        self.generation.fetch_add(1, Ordering::SeqCst);

        let command = ControlCommand::neutral();
        warn!("EMERGENCY STOP: {}", command.encode().trim_end());
        self.events.publish(ArbiterEvent::EmergencyStop);

        let result = self.sink.send_command(&command);
        if result.is_ok() {
            self.events.publish(ArbiterEvent::CommandSent {
                source: CommandSource::EmergencyStop,
                command,
            });
        }
        result
    }

    //false if a stop happened since `generation` was read
    fn send_since(&self, generation: u64, source: CommandSource, command: ControlCommand) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(|p| p.into_inner());
        if self.generation() != generation {
            debug!("{:?} command {} abandoned after emergency stop", source, command.encode().trim_end());
            return false;
        }
        match self.sink.send_command(&command) {
            Ok(()) => {
                debug!("[{:?}] sent {}", source, command.encode().trim_end());
                self.events.publish(ArbiterEvent::CommandSent { source, command });
                true
            }
            //only sent while connected
            Err(WriteError::NotConnected) => false,
            Err(e) => {
                warn!("[{:?}] send failed: {}", source, e);
                false
            }
        }
    }
}

/// Owns the mode, both PID instances and the mission engine.
pub struct ModeArbiter {
    mode: Mode,
    steering_pid: Pid,
    engine: MissionEngine,
    limits: ServoLimits,
    vision_speed_pwm: u16,
    manual: ControlCommand,
    stop: StopLatch,
    events: Arc<Topic<ArbiterEvent>>,
}

impl ModeArbiter {
    pub fn new(sink: Arc<dyn CommandSink>, engine: MissionEngine, steering_pid: Pid, limits: ServoLimits) -> Self {
        let events = Arc::new(Topic::new("/mode/events", 256));
        Self {
            mode: Mode::Manual,
            steering_pid,
            engine,
            limits,
            vision_speed_pwm: 1550,
            manual: ControlCommand::neutral(),
            stop: StopLatch::new(sink, Arc::clone(&events)),
            events,
        }
    }

    /// Publish events on a shared topic instead of a private one.
    pub fn with_events(mut self, events: Arc<Topic<ArbiterEvent>>) -> Self {
        self.stop.events = Arc::clone(&events);
        self.events = events;
        self
    }

    pub fn with_vision_speed(mut self, speed_pwm: u16) -> Self {
        self.vision_speed_pwm = speed_pwm;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn events(&self) -> Arc<Topic<ArbiterEvent>> {
        Arc::clone(&self.events)
    }

    pub fn stop_latch(&self) -> StopLatch {
        self.stop.clone()
    }

    pub fn engine(&self) -> &MissionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut MissionEngine {
        &mut self.engine
    }

    pub fn steering_pid(&self) -> &Pid {
        &self.steering_pid
    }

    pub fn steering_pid_mut(&mut self) -> &mut Pid {
        &mut self.steering_pid
    }

    pub fn servo_limits(&self) -> ServoLimits {
        self.limits
    }

    /// Last manual command, kept across mode switches.
    pub fn manual_command(&self) -> ControlCommand {
        self.manual
    }

    /// Switch modes. Entering an automatic mode resets its PID; leaving
    /// MissionAuto pauses the mission. Entering MissionAuto resumes a
    /// paused mission and fails if there is none.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), MissionError> {
        if mode == self.mode {
            return Ok(());
        }
        if mode == Mode::MissionAuto {
            self.engine.resume()?;
        }
        self.enter(mode);
        Ok(())
    }

    /// Start a new mission and hand control to it.
    pub fn start_mission(&mut self, waypoints: Vec<Waypoint>) -> Result<(), MissionError> {
        self.engine.start(waypoints)?;
        if self.mode != Mode::MissionAuto {
            self.enter(Mode::MissionAuto);
        }
        Ok(())
    }

    /// Stop following the mission and fall back to manual control.
    pub fn pause_mission(&mut self) {
        if self.mode == Mode::MissionAuto {
            self.enter(Mode::Manual);
        } else {
            self.engine.pause();
        }
    }

    fn enter(&mut self, mode: Mode) {
        let from = self.mode;
        if from == Mode::MissionAuto {
            self.engine.pause();
        }
        match mode {
            Mode::VisionAuto => self.steering_pid.reset(),
            Mode::MissionAuto => self.engine.heading_pid_mut().reset(),
            Mode::Manual => {}
        }
        self.mode = mode;

        info!("mode {} -> {}", from, mode);
        self.events.publish(ArbiterEvent::ModeChanged { from, to: mode });
    }

    /// Operator command. Ignored outside Manual mode.
    pub fn on_manual_input(&mut self, speed_pwm: u16, servo_degree: f64) -> Option<ControlCommand> {
        if self.mode != Mode::Manual {
            return None;
        }
        let generation = self.stop.generation();
        let command = ControlCommand::new(speed_pwm.clamp(MIN_PWM, MAX_PWM), servo_degree, &self.limits);
        self.manual = command;
        self.stop.send_since(generation, CommandSource::Manual, command);
        Some(command)
    }

    /// Throttle slider, 0..=100 % forward.
    pub fn set_manual_throttle(&mut self, percent: u8) -> Option<ControlCommand> {
        let servo = self.manual.servo_degree as f64;
        self.on_manual_input(throttle_to_pwm(percent), servo)
    }

    pub fn set_manual_steer(&mut self, steer: Steer) -> Option<ControlCommand> {
        self.on_manual_input(self.manual.speed_pwm, steer.degree())
    }

    pub fn on_vision_degree(&mut self, degree: f64) -> Option<ControlCommand> {
        self.on_vision_degree_at(degree, Instant::now())
    }

    /// Steering angle from the vision pipeline. Ignored outside VisionAuto.
    pub fn on_vision_degree_at(&mut self, degree: f64, now: Instant) -> Option<ControlCommand> {
        if self.mode != Mode::VisionAuto {
            return None;
        }
        let generation = self.stop.generation();
        let correction = self.steering_pid.update_at(degree, now);
        let command = ControlCommand::new(
            self.vision_speed_pwm,
            SERVO_CENTER as f64 + correction,
            &self.limits,
        );
        self.stop.send_since(generation, CommandSource::Vision, command);
        self.events.publish(ArbiterEvent::PidSample {
            setpoint: self.steering_pid.setpoint(),
            process_value: degree,
        });
        Some(command)
    }

    pub fn on_timer_tick(&mut self, vehicle: &VehicleState) -> Option<MissionOutcome> {
        self.on_timer_tick_at(vehicle, Instant::now())
    }

    /// One mission step. Ignored outside MissionAuto. A completed mission
    /// returns control to Manual.
    pub fn on_timer_tick_at(&mut self, vehicle: &VehicleState, now: Instant) -> Option<MissionOutcome> {
        if self.mode != Mode::MissionAuto || !self.engine.is_enroute() {
            return None;
        }
        let generation = self.stop.generation();
        let outcome = self.engine.tick_at(vehicle, now);
        match outcome {
            MissionOutcome::Steer(steer) => {
                self.stop.send_since(generation, CommandSource::Mission, steer.command);
            }
            MissionOutcome::Reached(_) => {}
            MissionOutcome::Complete(_) => self.enter(Mode::Manual),
        }
        Some(outcome)
    }

    /// Neutral command from any mode. Does not change the mode.
    pub fn emergency_stop(&self) -> Result<(), WriteError> {
        self.stop.trigger()
    }

    pub fn set_steering_gains(&mut self, gains: Gains) {
        info!("steering gains kp={} ki={} kd={}", gains.kp, gains.ki, gains.kd);
        self.steering_pid.set_gains(gains);
    }

    pub fn set_steering_setpoint(&mut self, degree: f64) {
        self.steering_pid.set_setpoint(degree);
    }

    pub fn set_heading_gains(&mut self, gains: Gains) {
        info!("heading gains kp={} ki={} kd={}", gains.kp, gains.ki, gains.kd);
        self.engine.set_heading_gains(gains);
    }

    pub fn set_servo_limits(&mut self, limits: ServoLimits) {
        info!("servo limits {}..{}", limits.min(), limits.max());
        self.limits = limits;
        self.engine.set_servo_limits(limits);
    }

    pub fn set_reach_threshold(&mut self, meters: f64) -> Result<(), ValidationError> {
        self.engine.set_reach_threshold(meters)
    }

    pub fn set_vision_speed(&mut self, speed_pwm: u16) -> Result<(), ValidationError> {
        self.vision_speed_pwm = check_pwm(speed_pwm)?;
        Ok(())
    }
}
