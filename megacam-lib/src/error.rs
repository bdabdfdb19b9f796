use std::io;
use thiserror::Error;

use crate::sensor::SensorVariant;

/// The primary error type for the `megacam-lib` library.
#[derive(Error, Debug)]
pub enum CamError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{operation} is not supported by the {variant} sensor")]
    UnsupportedVariant {
        operation: &'static str,
        variant: SensorVariant,
    },

    #[error("Timeout during {operation} after {attempts} attempt(s)")]
    DeviceTimeout { operation: &'static str, attempts: u32 },

    #[error("Protocol desync: {0}")]
    ProtocolDesync(String),

    #[error("SPI bus error: {0}")]
    Spi(embedded_hal::spi::ErrorKind),

    #[error("Chip-select pin error: {0}")]
    ChipSelect(embedded_hal::digital::ErrorKind),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CamError {
    pub(crate) fn spi<E: embedded_hal::spi::Error>(err: E) -> Self {
        CamError::Spi(err.kind())
    }

    pub(crate) fn pin<E: embedded_hal::digital::Error>(err: E) -> Self {
        CamError::ChipSelect(err.kind())
    }

    /// True for errors raised by an exhausted poll budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CamError::DeviceTimeout { .. })
    }
}
