use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::{check_reach_threshold, Mission, MissionConfig, MissionEvent, Waypoint};
use crate::command::{ControlCommand, ServoLimits, SERVO_CENTER};
use crate::error::{MissionError, ValidationError};
use crate::nav::{angle_error, bearing, distance};
use crate::pid::{Gains, Pid};
use crate::pubsub::Topic;
use crate::telemetry::VehicleState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionState {
    Idle,
    Enroute,
    Complete,
}

/// One steering decision toward the current waypoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteerCommand {
    pub command: ControlCommand,
    pub index: usize,
    pub distance_m: f64,
    pub target_bearing: f64,
    /// Signed rotation from current heading to target bearing.
    pub heading_error: f64,
    pub correction: f64,
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MissionOutcome {
    Steer(SteerCommand),
    /// Waypoint reached, more remain. No steering this tick.
    Reached(usize),
    /// The last waypoint (given index) was reached.
    Complete(usize),
}

impl MissionOutcome {
    pub fn events(&self) -> Vec<MissionEvent> {
        match *self {
            MissionOutcome::Steer(_) => Vec::new(),
            MissionOutcome::Reached(i) => vec![MissionEvent::WaypointReached(i)],
            MissionOutcome::Complete(i) => {
                vec![MissionEvent::WaypointReached(i), MissionEvent::MissionComplete]
            }
        }
    }
}

/// Waypoint-following state machine driving the heading PID.
pub struct MissionEngine {
    mission: Option<Mission>,
    state: MissionState,
    heading_pid: Pid,
    config: MissionConfig,
    limits: ServoLimits,
    events: Arc<Topic<MissionEvent>>,
}

impl MissionEngine {
    pub fn new(config: MissionConfig, heading_gains: Gains, limits: ServoLimits) -> Self {
        Self::with_events(
            config,
            heading_gains,
            limits,
            Arc::new(Topic::new("/mission/events", 64)),
        )
    }

    pub fn with_events(
        config: MissionConfig,
        heading_gains: Gains,
        limits: ServoLimits,
        events: Arc<Topic<MissionEvent>>,
    ) -> Self {
        Self {
            mission: None,
            state: MissionState::Idle,
            heading_pid: Pid::circular(heading_gains, 0.0),
            config,
            limits,
            events,
        }
    }

    pub fn events(&self) -> Arc<Topic<MissionEvent>> {
        Arc::clone(&self.events)
    }

    pub fn state(&self) -> MissionState {
        self.state
    }

    pub fn is_enroute(&self) -> bool {
        self.state == MissionState::Enroute
    }

    pub fn mission(&self) -> Option<&Mission> {
        self.mission.as_ref()
    }

    pub fn heading_pid(&self) -> &Pid {
        &self.heading_pid
    }

    pub fn heading_pid_mut(&mut self) -> &mut Pid {
        &mut self.heading_pid
    }

    pub fn config(&self) -> &MissionConfig {
        &self.config
    }

    /// Replace any previous mission and start at the first waypoint.
    pub fn start(&mut self, waypoints: Vec<Waypoint>) -> Result<(), MissionError> {
        if waypoints.is_empty() {
            return Err(MissionError::Empty);
        }
        let count = waypoints.len();
        self.mission = Some(Mission::new(waypoints, self.config.reach_threshold_m));
        self.state = MissionState::Enroute;
        self.heading_pid.reset();

        info!("mission started with {} waypoints", count);
        self.events.publish(MissionEvent::Started { waypoints: count });
        Ok(())
    }

    /// Stop steering. Waypoints and progress are kept for [`MissionEngine::resume`].
    pub fn pause(&mut self) {
        if self.state != MissionState::Enroute {
            return;
        }
        self.state = MissionState::Idle;
        let index = self.mission.as_ref().map_or(0, Mission::current_index);
        info!("mission paused at waypoint {}", index);
        self.events.publish(MissionEvent::Paused { index });
    }

    /// Continue a paused mission from the waypoint it stopped at.
    pub fn resume(&mut self) -> Result<(), MissionError> {
        match self.state {
            MissionState::Enroute => Ok(()),
            MissionState::Complete => Err(MissionError::NothingToResume),
            MissionState::Idle => {
                let index = match self.mission.as_ref() {
                    Some(m) if !m.is_complete() => m.current_index(),
                    _ => return Err(MissionError::NothingToResume),
                };
                self.state = MissionState::Enroute;
                self.heading_pid.reset();
                info!("mission resumed at waypoint {}", index);
                self.events.publish(MissionEvent::Resumed { index });
                Ok(())
            }
        }
    }

    pub fn tick(&mut self, vehicle: &VehicleState) -> MissionOutcome {
        self.tick_at(vehicle, Instant::now())
    }

    /// Advance the mission one step using `now` as the controller clock.
    ///
    /// # Panics
    ///
    /// If no mission is en route. Callers check [`MissionEngine::is_enroute`].
    pub fn tick_at(&mut self, vehicle: &VehicleState, now: Instant) -> MissionOutcome {
        assert!(self.is_enroute(), "mission tick while {:?}", self.state);
        let mission = match self.mission.as_mut() {
            Some(mission) => mission,
            None => unreachable!("en route without a mission"),
        };

        let index = mission.current_index();
        let target = match mission.current_target() {
            Some(target) => *target,
            None => unreachable!("en route past the last waypoint"),
        };

        let d = distance(vehicle.latitude, vehicle.longitude, target.latitude(), target.longitude());

        if d < mission.reach_threshold_m() {
            mission.advance();
            info!("waypoint {} reached ({:.1} m)", index + 1, d);

            let outcome = if mission.is_complete() {
                self.state = MissionState::Complete;
                info!("mission complete");
                MissionOutcome::Complete(index)
            } else {
                MissionOutcome::Reached(index)
            };
            for event in outcome.events() {
                self.events.publish(event);
            }
            return outcome;
        }

        let target_bearing = bearing(vehicle.latitude, vehicle.longitude, target.latitude(), target.longitude());
        self.heading_pid.set_setpoint(target_bearing);
        let heading_error = angle_error(vehicle.heading, target_bearing);
        let correction = self.heading_pid.update_at(vehicle.heading, now);

        let command = ControlCommand::new(
            self.config.cruise_pwm,
            SERVO_CENTER as f64 - correction,
            &self.limits,
        );

        debug!(
            "to wp {} | {:.1} m | target {:.1}, heading {:.1} | servo {}",
            index + 1,
            d,
            target_bearing,
            vehicle.heading,
            command.servo_degree
        );

        MissionOutcome::Steer(SteerCommand {
            command,
            index,
            distance_m: d,
            target_bearing,
            heading_error,
            correction,
        })
    }

    pub fn set_heading_gains(&mut self, gains: Gains) {
        self.heading_pid.set_gains(gains);
    }

    pub fn set_servo_limits(&mut self, limits: ServoLimits) {
        self.limits = limits;
    }

    /// Applies to the running mission as well as future ones.
    pub fn set_reach_threshold(&mut self, meters: f64) -> Result<(), ValidationError> {
        let meters = check_reach_threshold(meters)?;
        self.config.reach_threshold_m = meters;
        if let Some(mission) = self.mission.as_mut() {
            mission.reach_threshold_m = meters;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn engine() -> MissionEngine {
        MissionEngine::new(
            MissionConfig::default(),
            Gains::new(1.0, 0.0, 0.2).unwrap(),
            ServoLimits::default(),
        )
    }

    fn wp(lat: f64, lon: f64) -> Waypoint {
        Waypoint::new(lat, lon).unwrap()
    }

    #[test]
    fn test_start_empty_keeps_idle() {
        let mut engine = engine();
        assert_eq!(engine.start(Vec::new()), Err(MissionError::Empty));
        assert_eq!(engine.state(), MissionState::Idle);
        assert!(engine.events().is_empty());
    }

    #[test]
    fn test_single_waypoint_already_reached() {
        let mut engine = engine();
        engine.start(vec![wp(0.0, 0.0)]).unwrap();
        engine.events().drain();

        let vehicle = VehicleState::new(0.00001, 0.0, 0.0); // ~1.1 m away
        assert_eq!(engine.tick(&vehicle), MissionOutcome::Complete(0));
        assert_eq!(engine.state(), MissionState::Complete);
        assert_eq!(
            engine.events().drain(),
            vec![MissionEvent::WaypointReached(0), MissionEvent::MissionComplete]
        );
    }

    #[test]
    fn test_reaching_first_does_not_skip_second() {
        let mut engine = engine();
        // both waypoints inside the threshold of the vehicle
        engine.start(vec![wp(0.0, 0.0), wp(0.0, 0.00002)]).unwrap();
        let vehicle = VehicleState::new(0.0, 0.00001, 0.0);

        assert_eq!(engine.tick(&vehicle), MissionOutcome::Reached(0));
        assert_eq!(engine.mission().unwrap().current_index(), 1);
        assert!(engine.is_enroute());

        assert_eq!(engine.tick(&vehicle), MissionOutcome::Complete(1));
        assert_eq!(engine.mission().unwrap().current_index(), 2);
    }

    #[test]
    fn test_steer_toward_east_waypoint() {
        let mut engine = engine();
        engine.start(vec![wp(0.0, 0.001)]).unwrap();
        let t0 = Instant::now();
        engine.heading_pid_mut().reset_at(t0);

        let vehicle = VehicleState::new(0.0, 0.0, 0.0);
        let outcome = engine.tick_at(&vehicle, t0 + Duration::from_millis(200));
        let steer = match outcome {
            MissionOutcome::Steer(s) => s,
            other => panic!("expected steer, got {:?}", other),
        };
        assert!((steer.target_bearing - 90.0).abs() < 1e-6);
        assert!((steer.heading_error - 90.0).abs() < 1e-6);
        assert!(steer.correction > 0.0);
        assert!((steer.distance_m - 111.19).abs() < 0.1);
        // 90 - large correction saturates at the left stop
        assert_eq!(steer.command.servo_degree, 45);
        assert_eq!(steer.command.speed_pwm, 1550);
        assert_eq!(engine.mission().unwrap().current_index(), 0);
    }

    #[test]
    fn test_heading_wraps_through_north() {
        let mut engine = MissionEngine::new(
            MissionConfig::default(),
            Gains::new(1.0, 0.0, 0.0).unwrap(),
            ServoLimits::new(0, 180).unwrap(),
        );
        // target due north-ish, heading just west of north
        engine.start(vec![wp(0.01, 0.0)]).unwrap();
        let t0 = Instant::now();
        engine.heading_pid_mut().reset_at(t0);

        let vehicle = VehicleState::new(0.0, 0.0, 350.0);
        let steer = match engine.tick_at(&vehicle, t0 + Duration::from_millis(200)) {
            MissionOutcome::Steer(s) => s,
            other => panic!("expected steer, got {:?}", other),
        };
        assert!((steer.heading_error - 10.0).abs() < 1e-6);
        assert!((steer.correction - 10.0).abs() < 1e-6);
        assert_eq!(steer.command.servo_degree, 80);
    }

    #[test]
    fn test_pause_keeps_waypoints_and_resume_continues() {
        let mut engine = engine();
        engine.start(vec![wp(0.0, 0.0), wp(1.0, 1.0)]).unwrap();
        engine.tick(&VehicleState::new(0.0, 0.0, 0.0));

        engine.pause();
        assert_eq!(engine.state(), MissionState::Idle);
        assert_eq!(engine.mission().unwrap().waypoints().len(), 2);
        assert_eq!(engine.mission().unwrap().current_index(), 1);

        engine.resume().unwrap();
        assert!(engine.is_enroute());
        assert_eq!(engine.mission().unwrap().current_index(), 1);

        let events = engine.events().drain();
        assert_eq!(
            events[events.len() - 2..],
            [MissionEvent::Paused { index: 1 }, MissionEvent::Resumed { index: 1 }]
        );
    }

    #[test]
    fn test_resume_without_mission_fails() {
        let mut engine = engine();
        assert_eq!(engine.resume(), Err(MissionError::NothingToResume));

        engine.start(vec![wp(0.0, 0.0)]).unwrap();
        engine.tick(&VehicleState::new(0.0, 0.0, 0.0));
        assert_eq!(engine.state(), MissionState::Complete);
        assert_eq!(engine.resume(), Err(MissionError::NothingToResume));
    }

    #[test]
    fn test_start_replaces_mission() {
        let mut engine = engine();
        engine.start(vec![wp(0.0, 0.0), wp(1.0, 1.0)]).unwrap();
        engine.tick(&VehicleState::new(0.0, 0.0, 0.0));
        engine.start(vec![wp(2.0, 2.0)]).unwrap();
        let mission = engine.mission().unwrap();
        assert_eq!(mission.current_index(), 0);
        assert_eq!(mission.waypoints(), &[wp(2.0, 2.0)]);
    }

    #[test]
    fn test_reach_threshold_update() {
        let mut engine = engine();
        engine.start(vec![wp(0.0, 0.001)]).unwrap();
        assert!(engine.set_reach_threshold(-1.0).is_err());
        assert_eq!(engine.mission().unwrap().reach_threshold_m(), 5.0);

        engine.set_reach_threshold(200.0).unwrap();
        assert_eq!(engine.tick(&VehicleState::new(0.0, 0.0, 0.0)), MissionOutcome::Complete(0));
    }

    #[test]
    #[should_panic(expected = "mission tick while Idle")]
    fn test_tick_while_idle_is_a_bug() {
        let mut engine = engine();
        engine.tick(&VehicleState::default());
    }
}
