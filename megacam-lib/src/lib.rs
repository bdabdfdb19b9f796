pub mod bus;
pub mod capture;
pub mod config;
pub mod constants;
pub mod error;
pub mod marker;
pub mod naming;
pub mod pipeline;
pub mod poll;
pub mod relay;
pub mod sensor;
pub mod sim;
pub mod stream;

#[cfg(test)]
mod tests;

// Re-export the main driver types for easy access
pub use capture::{CaptureSession, CaptureState};
pub use config::{CameraConfig, Config, IdleCondition, RelayConfig};
pub use error::CamError;
pub use relay::{HandshakeMessage, RelayLink};
pub use sensor::{Camera, SensorVariant};
pub use stream::FrameBuffer;
