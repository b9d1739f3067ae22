use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::command::{check_pwm, ServoLimits};
use crate::error::{ConfigError, ValidationError};
use crate::link::LinkSettings;
use crate::mission::MissionConfig;
use crate::pid::Gains;

pub const ENV_PREFIX: &str = "ASV";

/// Vision steering PID. The setpoint is the camera angle that means "dead ahead".
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SteeringConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
}

impl SteeringConfig {
    pub fn gains(&self) -> Result<Gains, ValidationError> {
        Gains::new(self.kp, self.ki, self.kd)
    }
}

impl Default for SteeringConfig {
    fn default() -> Self {
        SteeringConfig {
            kp: 0.5,
            ki: 0.01,
            kd: 0.1,
            setpoint: 90.0,
        }
    }
}

/// Mission heading PID.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct HeadingConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl HeadingConfig {
    pub fn gains(&self) -> Result<Gains, ValidationError> {
        Gains::new(self.kp, self.ki, self.kd)
    }
}

impl Default for HeadingConfig {
    fn default() -> Self {
        HeadingConfig {
            kp: 1.0,
            ki: 0.0,
            kd: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub speed_pwm: u16,
}

impl Default for VisionConfig {
    fn default() -> Self {
        VisionConfig { speed_pwm: 1550 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Mission timer period.
    pub tick_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig { tick_ms: 200 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub link: LinkSettings,
    pub servo: ServoLimits,
    pub steering: SteeringConfig,
    pub heading: HeadingConfig,
    pub mission: MissionConfig,
    pub vision: VisionConfig,
    pub control: ControlConfig,
}

impl StationConfig {
    /// Optional `asv-station.{toml,json,yaml}` in the working directory, then
    /// `ASV_*` environment variables.
    pub fn read() -> Result<Self, ConfigError> {
        let mut c = Config::new();

        c.merge(File::with_name("asv-station").required(false))?;
        c.merge(environment())?;

        Self::finish(c)
    }

    pub fn read_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut c = Config::new();

        c.merge(File::from(path))?;
        c.merge(environment())?;

        Self::finish(c)
    }

    /// Parse TOML text alone, without the environment.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut c = Config::new();

        c.merge(File::from_str(text, FileFormat::Toml))?;

        Self::finish(c)
    }

    fn finish(c: Config) -> Result<Self, ConfigError> {
        let config: StationConfig = c.try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Servo limits are checked while deserializing; everything else here.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.steering.gains()?;
        if !self.steering.setpoint.is_finite() {
            return Err(ValidationError::Gain {
                name: "setpoint",
                value: self.steering.setpoint.to_string(),
            });
        }
        self.heading.gains()?;
        self.mission.validate()?;
        check_pwm(self.vision.speed_pwm)?;
        if self.control.tick_ms == 0 {
            return Err(ValidationError::TickInterval);
        }
        Ok(())
    }
}

//ASV_LINK__BAUD=57600 -> link.baud
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__")
}
