use std::time::Instant;
use tracing::warn;

use crate::error::ParseError;
use crate::nav::wrap_360;

pub const TELEMETRY_PREFIX: &str = "T:";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,   //degrees
    pub longitude: f64,  //degrees
    pub satellites: u32,
}

/// Fields recovered from one telemetry line. Absent fields were either not
/// sent or malformed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub gps: Option<GpsFix>,
    pub heading: Option<f64>,
    pub errors: Vec<ParseError>,
}

impl TelemetryUpdate {
    pub fn is_empty(&self) -> bool {
        self.gps.is_none() && self.heading.is_none()
    }
}

/// Latest known vehicle position and heading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VehicleState {
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,    //[0, 360)
    pub satellites: Option<u32>,
    pub last_update: Option<Instant>,
}

impl VehicleState {
    pub fn new(latitude: f64, longitude: f64, heading: f64) -> Self {
        VehicleState {
            latitude,
            longitude,
            heading: wrap_360(heading),
            satellites: None,
            last_update: None,
        }
    }

    //a compass-only snapshot still sits at the 0,0 default
    pub fn has_fix(&self) -> bool {
        self.satellites.is_some()
    }

    //merge present fields, stamp with `now` if anything changed
    pub fn apply(&mut self, update: &TelemetryUpdate, now: Instant) -> bool {
        if let Some(fix) = update.gps {
            self.latitude = fix.latitude;
            self.longitude = fix.longitude;
            self.satellites = Some(fix.satellites);
        }
        if let Some(heading) = update.heading {
            self.heading = heading;
        }
        if update.is_empty() {
            return false;
        }
        self.last_update = Some(now);
        true
    }
}

/// Decode one line of `T:<KEY>,<v1>,...;<KEY>,...`.
///
/// Returns `None` for lines that are not telemetry. Each malformed field is
/// logged, recorded in `errors` and skipped; the rest of the line still decodes.
pub fn decode(line: &str) -> Option<TelemetryUpdate> {
    let body = line.trim().strip_prefix(TELEMETRY_PREFIX)?;
    let mut update = TelemetryUpdate::default();

    for field in body.split(';') {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let values: Vec<&str> = field.split(',').map(str::trim).collect();
        let result = match values[0] {
            "GPS" => decode_gps(&values[1..]).map(|fix| update.gps = Some(fix)),
            "COMP" => decode_compass(&values[1..]).map(|h| update.heading = Some(h)),
            other => Err(ParseError::UnknownKey(other.to_string())),
        };
        if let Err(e) = result {
            warn!("dropping telemetry field {:?}: {}", field, e);
            update.errors.push(e);
        }
    }

    Some(update)
}

fn decode_gps(values: &[&str]) -> Result<GpsFix, ParseError> {
    check_arity("GPS", values, 3)?;
    let latitude = number("GPS", values[0])?;
    let longitude = number("GPS", values[1])?;
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ParseError::OutOfRange { key: "GPS", value: latitude });
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ParseError::OutOfRange { key: "GPS", value: longitude });
    }
    let satellites = values[2].parse::<u32>().map_err(|_| ParseError::InvalidNumber {
        key: "GPS",
        value: values[2].to_string(),
    })?;
    Ok(GpsFix { latitude, longitude, satellites })
}

fn decode_compass(values: &[&str]) -> Result<f64, ParseError> {
    check_arity("COMP", values, 1)?;
    Ok(wrap_360(number("COMP", values[0])?))
}

fn check_arity(key: &'static str, values: &[&str], expected: usize) -> Result<(), ParseError> {
    if values.len() != expected {
        return Err(ParseError::Arity { key, expected, got: values.len() });
    }
    Ok(())
}

fn number(key: &'static str, raw: &str) -> Result<f64, ParseError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::InvalidNumber { key, value: raw.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_gps_and_compass() {
        let update = decode("T:GPS,-7.2819,112.7947,9;COMP,271.5").unwrap();
        assert_eq!(update.gps, Some(GpsFix { latitude: -7.2819, longitude: 112.7947, satellites: 9 }));
        assert_eq!(update.heading, Some(271.5));
        assert!(update.errors.is_empty());
    }

    #[test]
    fn test_non_telemetry_line() {
        assert!(decode("ESP32 ready").is_none());
        assert!(decode("").is_none());
        assert!(decode("GPS,1,2,3").is_none());
    }

    #[test]
    fn test_bad_field_does_not_abort_line() {
        let update = decode("T:GPS,abc,112.0,7;COMP,90").unwrap();
        assert!(update.gps.is_none());
        assert_eq!(update.heading, Some(90.0));
        assert_eq!(update.errors.len(), 1);
        assert!(matches!(update.errors[0], ParseError::InvalidNumber { key: "GPS", .. }));
    }

    #[test]
    fn test_wrong_arity_and_unknown_keys_skipped() {
        let update = decode("T:GPS,1.0,2.0;BATT,12.4;COMP,10,20;COMP,45").unwrap();
        assert!(update.gps.is_none());
        assert_eq!(update.heading, Some(45.0));
        assert_eq!(update.errors, vec![
            ParseError::Arity { key: "GPS", expected: 3, got: 2 },
            ParseError::UnknownKey("BATT".to_string()),
            ParseError::Arity { key: "COMP", expected: 1, got: 2 },
        ]);
    }

    #[test]
    fn test_out_of_range_position_rejected() {
        let update = decode("T:GPS,91.0,0.0,5").unwrap();
        assert!(update.gps.is_none());
        assert!(matches!(update.errors[0], ParseError::OutOfRange { .. }));
    }

    #[test]
    fn test_heading_normalized() {
        assert_eq!(decode("T:COMP,360").unwrap().heading, Some(0.0));
        assert_eq!(decode("T:COMP,-90").unwrap().heading, Some(270.0));
    }

    #[test]
    fn test_trailing_separator_and_whitespace() {
        let update = decode("  T:COMP, 12.5 ;  \r").unwrap();
        assert_eq!(update.heading, Some(12.5));
        assert!(update.errors.is_empty());
    }

    #[test]
    fn test_apply_merges_partial_updates() {
        let now = Instant::now();
        let mut state = VehicleState::default();
        assert!(state.apply(&decode("T:GPS,1.5,2.5,6").unwrap(), now));
        assert!(state.apply(&decode("T:COMP,180").unwrap(), now));
        assert_eq!(state.latitude, 1.5);
        assert_eq!(state.longitude, 2.5);
        assert_eq!(state.heading, 180.0);
        assert_eq!(state.satellites, Some(6));
        assert_eq!(state.last_update, Some(now));

        //nothing usable: state untouched
        let before = state;
        assert!(!state.apply(&decode("T:COMP,x").unwrap(), Instant::now()));
        assert_eq!(state, before);
    }

    #[test]
    fn test_has_fix_needs_gps() {
        let mut state = VehicleState::default();
        assert!(!state.has_fix());
        state.apply(&decode("T:COMP,45").unwrap(), Instant::now());
        assert!(!state.has_fix());
        state.apply(&decode("T:GPS,-7.28,112.79,0").unwrap(), Instant::now());
        assert!(state.has_fix());
    }
}
