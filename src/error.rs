use std::io;

/// Failure to bring a link up. Non-fatal; the caller may retry.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to open {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: io::Error,
    },
}

/// Failure to write a line to the link.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("link is not connected")]
    NotConnected,

    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// A single malformed telemetry field. Soft: the field is dropped and
/// decoding continues with the next one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown telemetry key {0:?}")]
    UnknownKey(String),

    #[error("{key} expects {expected} values, got {got}")]
    Arity {
        key: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{key}: {value:?} is not a number")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key}: {value} is out of range")]
    OutOfRange { key: &'static str, value: f64 },
}

/// Rejected configuration or operator input. The previous valid value is
/// left in place.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("servo limits {min}..{max} must satisfy min < 90 < max <= 180")]
    ServoLimits { min: i64, max: i64 },

    #[error("{name} gain {value:?} is not a finite number")]
    Gain { name: &'static str, value: String },

    #[error("{name} {value:?} is not a valid coordinate")]
    Coordinate { name: &'static str, value: String },

    #[error("reach threshold {0} must be a positive number of meters")]
    Threshold(f64),

    #[error("pwm {0} is outside 1000..=2000")]
    Pwm(u16),

    #[error("control tick must be at least 1 ms")]
    TickInterval,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MissionError {
    #[error("cannot start a mission without waypoints")]
    Empty,

    #[error("no paused mission to resume")]
    NothingToResume,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
}
