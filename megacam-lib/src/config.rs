use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::constants::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_DEVICE_ADDRESS, FIFO_LENGTH_MASK, HANDSHAKE_MIN_SIZE, SENSOR_STATE_IDLE,
    WHITE_BALANCE_WARMUP_MS,
};
use crate::error::CamError;
use crate::poll::PollPolicy;

/// When `wait_idle` considers the sensor settled, judged on the low two bits
/// of the status register.
///
/// The default keeps polling *while* the state equals the idle constant, which
/// reads inverted against the name but is what the module firmware has been
/// driven with. `UntilEquals` is the literal reading; pick it per module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleCondition {
    /// Keep polling while the state bits equal the value.
    WhileEquals(u8),
    /// Keep polling until the state bits equal the value.
    UntilEquals(u8),
}

impl IdleCondition {
    pub fn is_settled(&self, state_bits: u8) -> bool {
        match *self {
            IdleCondition::WhileEquals(value) => state_bits != value,
            IdleCondition::UntilEquals(value) => state_bits == value,
        }
    }
}

impl Default for IdleCondition {
    fn default() -> Self {
        IdleCondition::WhileEquals(SENSOR_STATE_IDLE)
    }
}

/// Settings for one camera module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Skip the blocking white balance warm-up at construction (5MP).
    pub skip_warmup: bool,
    /// Promote identification and capture summaries to `info`.
    pub debug: bool,
    pub warmup_ms: u32,
    /// Take and discard one frame at construction (3MP).
    pub prime_3mp: bool,
    /// Burst size, also the size of every relay message.
    pub buffer_capacity: usize,
    pub device_address: u8,
    pub idle_condition: IdleCondition,
    pub idle_poll: PollPolicy,
    pub capture_poll: PollPolicy,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            skip_warmup: false,
            debug: false,
            warmup_ms: WHITE_BALANCE_WARMUP_MS,
            prime_3mp: true,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            device_address: DEFAULT_DEVICE_ADDRESS,
            idle_condition: IdleCondition::default(),
            idle_poll: PollPolicy::new(500, 2),
            capture_poll: PollPolicy::new(5000, 1),
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), CamError> {
        if self.buffer_capacity < HANDSHAKE_MIN_SIZE {
            return Err(CamError::InvalidArgument(format!(
                "buffer_capacity {} is below the {HANDSHAKE_MIN_SIZE} byte handshake minimum",
                self.buffer_capacity
            )));
        }
        if self.buffer_capacity > FIFO_LENGTH_MASK as usize {
            return Err(CamError::InvalidArgument(format!(
                "buffer_capacity {} exceeds the FIFO size",
                self.buffer_capacity
            )));
        }
        self.idle_poll.validate("idle_poll")?;
        self.capture_poll.validate("capture_poll")
    }
}

/// Settings for the downstream relay channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub handshake: PollPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            handshake: PollPolicy::new(10_000, 0),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), CamError> {
        self.handshake.validate("handshake")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub relay: RelayConfig,
}

impl Config {
    pub fn from_json_str(text: &str) -> Result<Self, CamError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CamError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), CamError> {
        self.camera.validate()?;
        self.relay.validate()
    }
}
