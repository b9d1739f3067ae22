pub mod ring_buffer;
pub mod pubsub;
pub mod error;
pub mod nav;
pub mod pid;
pub mod command;
pub mod telemetry;
pub mod link;
pub mod mission;
pub mod arbiter;
pub mod config;
pub mod station;

pub use ring_buffer::RingBuffer;

pub use pubsub::{Message, Topic, Subscriber, TopicRegistry};

pub use error::{ConfigError, ConnectionError, MissionError, ParseError, ValidationError, WriteError};
pub use pid::{Gains, Pid};
pub use command::{ControlCommand, ServoLimits};
pub use telemetry::{decode, TelemetryUpdate, VehicleState};
pub use link::{ConnectionState, Link, LinkEvent, LinkSettings, LinkState, SerialOpener};
pub use mission::{Mission, MissionEngine, MissionEvent, MissionOutcome, MissionState, SteerCommand, Waypoint};
pub use arbiter::{ArbiterEvent, CommandSink, CommandSource, Mode, ModeArbiter, Steer, StopLatch};
pub use config::StationConfig;
pub use station::GroundStation;
