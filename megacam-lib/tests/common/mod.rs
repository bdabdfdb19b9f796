//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use megacam_lib::constants::*;
#[allow(unused_imports)]
pub use megacam_lib::error::CamError;
#[allow(unused_imports)]
pub use megacam_lib::poll::PollPolicy;
#[allow(unused_imports)]
pub use megacam_lib::sim::{BusEvent, CameraModel, DownstreamModel, SimBus, SimChipSelect, SimDelay, attach};
#[allow(unused_imports)]
pub use megacam_lib::{CameraConfig, CaptureSession, CaptureState, RelayConfig, RelayLink, SensorVariant};
#[allow(unused_imports)]
pub use std::cell::RefCell;
#[allow(unused_imports)]
pub use std::rc::Rc;

pub type SimCamera = megacam_lib::Camera<SimBus<CameraModel>, SimChipSelect<CameraModel>, SimDelay>;
pub type SimRelay = RelayLink<SimBus<DownstreamModel>, SimChipSelect<DownstreamModel>, SimDelay>;

/// Camera plus the handles needed to inspect the simulated module
#[allow(dead_code)]
pub struct Rig {
    pub model: Rc<RefCell<CameraModel>>,
    pub camera: SimCamera,
    pub delay: SimDelay,
}

/// Config with small poll budgets and no startup capture
#[allow(dead_code)]
pub fn test_config() -> CameraConfig {
    CameraConfig {
        prime_3mp: false,
        idle_poll: PollPolicy::new(20, 1),
        capture_poll: PollPolicy::new(50, 1),
        ..CameraConfig::default()
    }
}

#[allow(dead_code)]
pub fn rig(model: CameraModel, config: CameraConfig) -> Rig {
    init_tracing();
    let (model, spi, cs) = attach(model);
    let delay = SimDelay::new();
    let camera = SimCamera::new(spi, cs, delay.clone(), config).expect("camera startup failed");
    Rig { model, camera, delay }
}

/// 3MP camera holding `frame`, with the startup traffic cleared from the log
#[allow(dead_code)]
pub fn rig_3mp(frame: Vec<u8>) -> Rig {
    let rig = rig(CameraModel::new(SENSOR_3MP_1).with_frame(frame), test_config());
    rig.model.borrow_mut().clear_log();
    rig
}

#[allow(dead_code)]
pub fn relay(ack_after: Option<u32>, handshake: PollPolicy) -> (Rc<RefCell<DownstreamModel>>, SimRelay) {
    let (model, spi, cs) = attach(DownstreamModel::new(ack_after));
    let link = SimRelay::new(spi, cs, SimDelay::new(), RelayConfig { handshake }).expect("relay config rejected");
    (model, link)
}

/// Sends library logs to the test harness output; set RUST_LOG to see them
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh temp directory, removed when the returned guard drops
#[allow(dead_code)]
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}
