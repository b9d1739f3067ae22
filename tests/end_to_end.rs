use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use asv_core::arbiter::{ArbiterEvent, CommandSink, Mode, ModeArbiter};
use asv_core::command::ServoLimits;
use asv_core::error::WriteError;
use asv_core::mission::{MissionConfig, MissionEngine, MissionEvent, MissionOutcome, MissionState, Waypoint};
use asv_core::nav;
use asv_core::pid::{Gains, Pid};
use asv_core::telemetry::{decode, VehicleState};
use asv_core::ControlCommand;

#[derive(Default)]
struct Recorder {
    lines: Mutex<Vec<String>>,
}

impl CommandSink for Recorder {
    fn send_command(&self, command: &ControlCommand) -> Result<(), WriteError> {
        self.lines.lock().unwrap().push(command.encode());
        Ok(())
    }
}

fn build() -> (ModeArbiter, Arc<Recorder>) {
    let sink = Arc::new(Recorder::default());
    let engine = MissionEngine::new(
        MissionConfig { reach_threshold_m: 5.0, cruise_pwm: 1550 },
        Gains::new(1.0, 0.0, 0.2).unwrap(),
        ServoLimits::default(),
    );
    let steering = Pid::new(Gains::new(0.5, 0.01, 0.1).unwrap(), 90.0);
    (ModeArbiter::new(sink.clone(), engine, steering, ServoLimits::default()), sink)
}

#[test]
fn mission_to_a_single_waypoint_east() {
    let (mut arbiter, sink) = build();
    let mission_events = arbiter.engine().events();

    let mut vehicle = VehicleState::default();
    vehicle.apply(&decode("T:GPS,0.0,0.0,9;COMP,0").unwrap(), Instant::now());

    let target = Waypoint::new(0.0, 0.001).unwrap();
    assert!((nav::distance(0.0, 0.0, 0.0, 0.001) - 111.19).abs() < 0.1);

    arbiter.start_mission(vec![target]).unwrap();
    assert_eq!(arbiter.mode(), Mode::MissionAuto);

    let t0 = Instant::now();
    arbiter.engine_mut().heading_pid_mut().reset_at(t0);

    for i in 1..=3u32 {
        let now = t0 + Duration::from_millis(200) * i;
        match arbiter.on_timer_tick_at(&vehicle, now) {
            Some(MissionOutcome::Steer(steer)) => {
                assert!((steer.target_bearing - 90.0).abs() < 0.01);
                assert!(steer.correction != 0.0);
                let servo = steer.command.servo_degree;
                assert!((45..=135).contains(&servo));
                assert_eq!(steer.command.speed_pwm, 1550);
            }
            other => panic!("tick {}: expected steering, got {:?}", i, other),
        }
    }
    assert_eq!(sink.lines.lock().unwrap().len(), 3);
    assert!(sink.lines.lock().unwrap().iter().all(|l| l.starts_with("S1550;D") && l.ends_with('\n')));

    //approach to within a couple of meters
    vehicle.apply(&decode("T:GPS,0.0,0.00099,9;COMP,90").unwrap(), Instant::now());
    assert!(nav::distance(vehicle.latitude, vehicle.longitude, 0.0, 0.001) < 5.0);

    let outcome = arbiter.on_timer_tick_at(&vehicle, t0 + Duration::from_millis(800));
    assert_eq!(outcome, Some(MissionOutcome::Complete(0)));
    assert_eq!(arbiter.engine().state(), MissionState::Complete);
    assert_eq!(arbiter.mode(), Mode::Manual);

    assert_eq!(
        mission_events.drain(),
        vec![
            MissionEvent::Started { waypoints: 1 },
            MissionEvent::WaypointReached(0),
            MissionEvent::MissionComplete,
        ]
    );

    //no further commands once the mission is done
    assert_eq!(arbiter.on_timer_tick(&vehicle), None);
    assert_eq!(sink.lines.lock().unwrap().len(), 3);
}

#[test]
fn emergency_stop_from_every_mode() {
    let (mut arbiter, sink) = build();
    let events = arbiter.events();

    arbiter.emergency_stop().unwrap();
    arbiter.set_mode(Mode::VisionAuto).unwrap();
    arbiter.emergency_stop().unwrap();
    arbiter.start_mission(vec![Waypoint::new(1.0, 1.0).unwrap()]).unwrap();
    arbiter.emergency_stop().unwrap();

    assert_eq!(arbiter.mode(), Mode::MissionAuto);
    assert_eq!(*sink.lines.lock().unwrap(), vec!["S1500;D90\n"; 3]);
    let stops = events
        .drain()
        .into_iter()
        .filter(|e| *e == ArbiterEvent::EmergencyStop)
        .count();
    assert_eq!(stops, 3);
}
