//! Outbound actuator commands: `S<speed_pwm>;D<servo_degree>\n`.

use std::fmt;

use crate::error::ValidationError;

/// Neutral throttle pulse width in microseconds.
pub const NEUTRAL_PWM: u16 = 1500;
/// Full forward throttle pulse width in microseconds.
pub const MAX_PWM: u16 = 2000;
/// Lowest throttle pulse width accepted from configuration.
pub const MIN_PWM: u16 = 1000;
/// Rudder centered.
pub const SERVO_CENTER: u16 = 90;

/// Allowed servo travel. `min` is the full-left stop, `max` full-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "RawServoLimits")]
pub struct ServoLimits {
    min: u16,
    max: u16,
}

#[derive(serde::Deserialize)]
#[serde(default)]
struct RawServoLimits {
    min: i64,
    max: i64,
}

impl Default for RawServoLimits {
    fn default() -> Self {
        let limits = ServoLimits::default();
        RawServoLimits {
            min: limits.min as i64,
            max: limits.max as i64,
        }
    }
}

impl TryFrom<RawServoLimits> for ServoLimits {
    type Error = ValidationError;

    fn try_from(raw: RawServoLimits) -> Result<Self, Self::Error> {
        ServoLimits::new(raw.min, raw.max)
    }
}

impl ServoLimits {
    pub fn new(min: i64, max: i64) -> Result<Self, ValidationError> {
        let center = SERVO_CENTER as i64;
        if min < 0 || min >= center || max <= center || max > 180 {
            return Err(ValidationError::ServoLimits { min, max });
        }
        Ok(ServoLimits {
            min: min as u16,
            max: max as u16,
        })
    }

    /// Parse operator-entered limits.
    pub fn parse(min: &str, max: &str) -> Result<Self, ValidationError> {
        let min_val = min.trim().parse::<i64>();
        let max_val = max.trim().parse::<i64>();
        match (min_val, max_val) {
            (Ok(min), Ok(max)) => ServoLimits::new(min, max),
            _ => Err(ValidationError::ServoLimits { min: -1, max: -1 }),
        }
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    /// Clamp a raw (possibly saturated or non-finite) angle into range.
    pub fn clamp(&self, degree: f64) -> u16 {
        if degree.is_nan() {
            return SERVO_CENTER;
        }
        // truncates toward zero after clamping, matching the embedded side
        degree.clamp(self.min as f64, self.max as f64) as u16
    }
}

impl Default for ServoLimits {
    fn default() -> Self {
        ServoLimits { min: 45, max: 135 }
    }
}

/// The only thing ever written to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlCommand {
    pub speed_pwm: u16,
    pub servo_degree: u16,
}

impl ControlCommand {
    /// Build a command with the servo angle clamped into `limits`.
    pub fn new(speed_pwm: u16, servo_degree: f64, limits: &ServoLimits) -> Self {
        ControlCommand {
            speed_pwm,
            servo_degree: limits.clamp(servo_degree),
        }
    }

    /// Throttle neutral, rudder centered.
    pub fn neutral() -> Self {
        ControlCommand {
            speed_pwm: NEUTRAL_PWM,
            servo_degree: SERVO_CENTER,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "S{};D{}", self.speed_pwm, self.servo_degree)
    }
}

/// Map a forward throttle slider position (0..=100 %) onto the PWM range.
pub fn throttle_to_pwm(percent: u8) -> u16 {
    let percent = percent.min(100) as u32;
    let span = (MAX_PWM - NEUTRAL_PWM) as u32;
    NEUTRAL_PWM + (percent * span / 100) as u16
}

/// Validate a configured pulse width.
pub fn check_pwm(pwm: u16) -> Result<u16, ValidationError> {
    if (MIN_PWM..=MAX_PWM).contains(&pwm) {
        Ok(pwm)
    } else {
        Err(ValidationError::Pwm(pwm))
    }
}
