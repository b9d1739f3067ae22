/**
 * Waypoint missions
 *
 * A mission is an ordered list of waypoints visited one after another:
 * steer toward the current one until it is within the reach threshold,
 * then move on. Nothing beyond "go to the next point" is planned.
 */

pub mod engine;

pub use engine::{MissionEngine, MissionOutcome, MissionState, SteerCommand};

use crate::command::check_pwm;
use crate::error::ValidationError;

/// A geographic target, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    latitude: f64,
    longitude: f64,
}

impl Waypoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ValidationError::Coordinate {
                name: "latitude",
                value: latitude.to_string(),
            });
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ValidationError::Coordinate {
                name: "longitude",
                value: longitude.to_string(),
            });
        }
        Ok(Waypoint {
            latitude,
            longitude,
        })
    }

    /// Parse operator text; `,` is accepted as the decimal separator.
    pub fn parse(latitude: &str, longitude: &str) -> Result<Self, ValidationError> {
        fn coord(name: &'static str, raw: &str) -> Result<f64, ValidationError> {
            raw.trim()
                .replace(',', ".")
                .parse::<f64>()
                .map_err(|_| ValidationError::Coordinate {
                    name,
                    value: raw.to_string(),
                })
        }
        Waypoint::new(coord("latitude", latitude)?, coord("longitude", longitude)?)
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Waypoints plus progress through them.
#[derive(Debug, Clone, PartialEq)]
pub struct Mission {
    waypoints: Vec<Waypoint>,
    current_index: usize,
    reach_threshold_m: f64,
}

impl Mission {
    pub(crate) fn new(waypoints: Vec<Waypoint>, reach_threshold_m: f64) -> Self {
        Mission {
            waypoints,
            current_index: 0,
            reach_threshold_m,
        }
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn reach_threshold_m(&self) -> f64 {
        self.reach_threshold_m
    }

    pub fn current_target(&self) -> Option<&Waypoint> {
        self.waypoints.get(self.current_index)
    }

    pub fn is_complete(&self) -> bool {
        self.current_index == self.waypoints.len()
    }

    pub(crate) fn advance(&mut self) {
        if !self.is_complete() {
            self.current_index += 1;
        }
    }
}

/// Lifecycle notifications published by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionEvent {
    Started { waypoints: usize },
    WaypointReached(usize),
    MissionComplete,
    Paused { index: usize },
    Resumed { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub reach_threshold_m: f64,
    /// Constant throttle while following a mission.
    pub cruise_pwm: u16,
}

impl MissionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_reach_threshold(self.reach_threshold_m)?;
        check_pwm(self.cruise_pwm)?;
        Ok(())
    }
}

impl Default for MissionConfig {
    fn default() -> Self {
        MissionConfig {
            reach_threshold_m: 5.0,
            cruise_pwm: 1550,
        }
    }
}

pub fn check_reach_threshold(meters: f64) -> Result<f64, ValidationError> {
    if meters.is_finite() && meters > 0.0 {
        Ok(meters)
    } else {
        Err(ValidationError::Threshold(meters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waypoint_validation() {
        assert!(Waypoint::new(-7.28, 112.79).is_ok());
        assert!(Waypoint::new(90.5, 0.0).is_err());
        assert!(Waypoint::new(0.0, -180.5).is_err());
        assert!(Waypoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_waypoint_parse_comma_decimal() {
        let wp = Waypoint::parse(" -7,2819 ", "112.7947").unwrap();
        assert_eq!(wp.latitude(), -7.2819);
        assert_eq!(wp.longitude(), 112.7947);
        assert!(matches!(
            Waypoint::parse("", "112"),
            Err(ValidationError::Coordinate { name: "latitude", .. })
        ));
    }

    #[test]
    fn test_mission_progress() {
        let wps = vec![Waypoint::new(0.0, 0.0).unwrap(), Waypoint::new(0.0, 0.001).unwrap()];
        let mut mission = Mission::new(wps, 5.0);
        assert_eq!(mission.current_index(), 0);
        mission.advance();
        assert_eq!(mission.current_target(), Some(&Waypoint::new(0.0, 0.001).unwrap()));
        mission.advance();
        assert!(mission.is_complete());
        mission.advance();
        assert_eq!(mission.current_index(), 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(MissionConfig::default().validate().is_ok());
        let bad = MissionConfig { reach_threshold_m: 0.0, ..Default::default() };
        assert_eq!(bad.validate(), Err(ValidationError::Threshold(0.0)));
        let bad = MissionConfig { cruise_pwm: 2500, ..Default::default() };
        assert_eq!(bad.validate(), Err(ValidationError::Pwm(2500)));
    }
}
