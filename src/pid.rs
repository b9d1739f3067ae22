//! Time-aware PID controller for a single scalar process variable.
//!
//! The controller never clamps its output. Callers bound the resulting
//! actuator command themselves.

use std::time::Instant;

use crate::error::ValidationError;
use crate::nav::angle_error;

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Gains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Result<Self, ValidationError> {
        for (name, value) in [("kp", kp), ("ki", ki), ("kd", kd)] {
            if !value.is_finite() {
                return Err(ValidationError::Gain {
                    name,
                    value: value.to_string(),
                });
            }
        }
        Ok(Gains { kp, ki, kd })
    }

    /// Parse operator-entered gain text. Accepts `,` as the decimal separator.
    pub fn parse(kp: &str, ki: &str, kd: &str) -> Result<Self, ValidationError> {
        fn field(name: &'static str, raw: &str) -> Result<f64, ValidationError> {
            raw.trim()
                .replace(',', ".")
                .parse::<f64>()
                .map_err(|_| ValidationError::Gain {
                    name,
                    value: raw.to_string(),
                })
        }
        Gains::new(field("kp", kp)?, field("ki", ki)?, field("kd", kd)?)
    }
}

/// How the error term is formed from setpoint and process value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// `setpoint - process_value`
    Linear,
    /// Shortest signed angle from process value to setpoint, in `[-180, 180]`.
    Circular,
}

#[derive(Debug, Clone)]
pub struct Pid {
    gains: Gains,
    setpoint: f64,
    mode: ErrorMode,
    integral: f64,
    last_error: f64,
    last_time: Instant,
    initialized: bool,
}

impl Pid {
    pub fn new(gains: Gains, setpoint: f64) -> Self {
        Pid {
            gains,
            setpoint,
            mode: ErrorMode::Linear,
            integral: 0.0,
            last_error: 0.0,
            last_time: Instant::now(),
            initialized: false,
        }
    }

    /// Heading-style controller: errors wrap around 0/360.
    pub fn circular(gains: Gains, setpoint: f64) -> Self {
        Pid {
            mode: ErrorMode::Circular,
            ..Pid::new(gains, setpoint)
        }
    }

    pub fn update(&mut self, process_value: f64) -> f64 {
        self.update_at(process_value, Instant::now())
    }

    /// Same as [`Pid::update`] with an explicit clock reading.
    ///
    /// Zero elapsed time since the previous call returns 0 and leaves every
    /// piece of state untouched.
    pub fn update_at(&mut self, process_value: f64, now: Instant) -> f64 {
        let dt = now.saturating_duration_since(self.last_time).as_secs_f64();
        if dt == 0.0 {
            return 0.0;
        }

        let error = self.error(process_value);
        self.integral += error * dt;
        let derivative = (error - self.last_error) / dt;

        let output =
            self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;

        self.last_error = error;
        self.last_time = now;
        self.initialized = true;

        output
    }

    fn error(&self, process_value: f64) -> f64 {
        match self.mode {
            ErrorMode::Linear => self.setpoint - process_value,
            ErrorMode::Circular => angle_error(process_value, self.setpoint),
        }
    }

    /// Clear accumulated state. Call whenever a mode using this controller is entered.
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_time = now;
        self.initialized = false;
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    /// Takes effect on the next update.
    pub fn set_gains(&mut self, gains: Gains) {
        self.gains = gains;
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn mode(&self) -> ErrorMode {
        self.mode
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    /// True once an update has run since construction or the last reset.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
