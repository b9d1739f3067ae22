/**
 * Ground Station
 *
 * Wires the pieces together:
 * - link receive thread -> telemetry decoder -> /vehicle/state snapshots
 * - control timer thread -> arbiter tick on the latest snapshot
 * - emergency stop straight to the link, never queued behind the arbiter
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::arbiter::{ArbiterEvent, CommandSink, Mode, ModeArbiter, StopLatch};
use crate::config::StationConfig;
use crate::error::{ConnectionError, ValidationError, WriteError};
use crate::link::{ConnectionState, Link, LinkEvent, PortOpener, SerialOpener};
use crate::mission::{MissionEngine, MissionEvent};
use crate::pid::Pid;
use crate::pubsub::{Topic, TopicRegistry};
use crate::telemetry::{self, VehicleState};

pub const LINK_EVENTS: &str = "/link/events";
pub const VEHICLE_STATE: &str = "/vehicle/state";
pub const MISSION_EVENTS: &str = "/mission/events";
pub const MODE_EVENTS: &str = "/mode/events";

struct ControlTimer {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ControlTimer {
    fn spawn(
        period: Duration,
        vehicle: Arc<Topic<VehicleState>>,
        arbiter: Arc<Mutex<ModeArbiter>>,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("control-timer".to_string())
            .spawn(move || {
                let mut next = Instant::now() + period;
                while flag.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    }
                    if !flag.load(Ordering::SeqCst) {
                        break;
                    }
                    next += period;
                    let now = Instant::now();
                    //a late tick restarts the schedule instead of bursting
                    if next <= now {
                        next = now + period;
                    }

                    match vehicle.peek_latest() {
                        Some((state, _)) if state.has_fix() => {
                            let mut arbiter = arbiter.lock().unwrap_or_else(|p| p.into_inner());
                            arbiter.on_timer_tick(&state);
                        }
                        Some(_) => trace!("no gps fix yet, skipping tick"),
                        None => trace!("no telemetry yet, skipping tick"),
                    }
                }
            })?;

        Ok(ControlTimer {
            running,
            handle: Some(handle),
        })
    }

    fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A complete station: link, telemetry, arbitration and the control timer.
pub struct GroundStation {
    link: Arc<Link>,
    arbiter: Arc<Mutex<ModeArbiter>>,
    stop: StopLatch,
    registry: Arc<TopicRegistry>,
    vehicle: Arc<Topic<VehicleState>>,
    timer: Mutex<Option<ControlTimer>>,
    tick: Duration,
}

impl GroundStation {
    /// Station on real serial ports.
    pub fn with_serial(config: &StationConfig) -> Result<Self, ValidationError> {
        Self::new(config, Arc::new(SerialOpener))
    }

    pub fn new(config: &StationConfig, opener: Arc<dyn PortOpener>) -> Result<Self, ValidationError> {
        config.validate()?;

        let registry = Arc::new(TopicRegistry::new());
        let link_events = registry.get_or_create::<LinkEvent>(LINK_EVENTS, 64);
        let vehicle = registry.get_or_create::<VehicleState>(VEHICLE_STATE, 16);
        let mission_events = registry.get_or_create::<MissionEvent>(MISSION_EVENTS, 64);
        let mode_events = registry.get_or_create::<ArbiterEvent>(MODE_EVENTS, 256);

        let link = Arc::new(Link::with_events(opener, config.link.clone(), link_events));

        //the receive thread is the only writer of vehicle state
        let latest = Mutex::new(VehicleState::default());
        let snapshots = Arc::clone(&vehicle);
        link.on_line(move |line| match telemetry::decode(line) {
            Some(update) => {
                let mut state = latest.lock().unwrap_or_else(|p| p.into_inner());
                if state.apply(&update, Instant::now()) {
                    snapshots.publish(*state);
                }
            }
            None => debug!("rx: {}", line),
        });

        let engine = MissionEngine::with_events(
            config.mission,
            config.heading.gains()?,
            config.servo,
            mission_events,
        );
        let steering = Pid::new(config.steering.gains()?, config.steering.setpoint);
        let sink: Arc<dyn CommandSink> = link.clone();
        let arbiter = ModeArbiter::new(sink, engine, steering, config.servo)
            .with_events(mode_events)
            .with_vision_speed(config.vision.speed_pwm);
        let stop = arbiter.stop_latch();

        Ok(GroundStation {
            link,
            arbiter: Arc::new(Mutex::new(arbiter)),
            stop,
            registry,
            vehicle,
            timer: Mutex::new(None),
            tick: Duration::from_millis(config.control.tick_ms),
        })
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn registry(&self) -> Arc<TopicRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn list_ports(&self) -> Vec<String> {
        self.link.list_ports()
    }

    pub fn connect(&self, port: &str, baud: u32) -> Result<ConnectionState, ConnectionError> {
        self.link.connect(port, baud)
    }

    pub fn disconnect(&self) {
        self.link.disconnect();
    }

    /// Latest complete vehicle snapshot, default until telemetry arrives.
    pub fn vehicle_state(&self) -> VehicleState {
        self.vehicle
            .peek_latest()
            .map(|(state, _)| state)
            .unwrap_or_default()
    }

    pub fn vehicle_topic(&self) -> Arc<Topic<VehicleState>> {
        Arc::clone(&self.vehicle)
    }

    /// Exclusive access to the arbiter. Do not hold across blocking calls.
    pub fn arbiter(&self) -> MutexGuard<'_, ModeArbiter> {
        self.arbiter.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn mode(&self) -> Mode {
        self.arbiter().mode()
    }

    /// Neutral command now, from any thread, without waiting for a tick in progress.
    pub fn emergency_stop(&self) -> Result<(), WriteError> {
        self.stop.trigger()
    }

    pub fn start_control_timer(&self) -> std::io::Result<()> {
        let mut timer = self.timer.lock().unwrap_or_else(|p| p.into_inner());
        if timer.is_some() {
            return Ok(());
        }
        *timer = Some(ControlTimer::spawn(
            self.tick,
            Arc::clone(&self.vehicle),
            Arc::clone(&self.arbiter),
        )?);
        info!("control timer running every {:?}", self.tick);
        Ok(())
    }

    /// Stops the timer; a tick in progress finishes first.
    pub fn stop_control_timer(&self) {
        let timer = self.timer.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(timer) = timer {
            timer.stop();
            info!("control timer stopped");
        }
    }

    pub fn shutdown(&self) {
        self.stop_control_timer();
        self.link.disconnect();
    }
}

impl Drop for GroundStation {
    fn drop(&mut self) {
        self.shutdown();
    }
}
