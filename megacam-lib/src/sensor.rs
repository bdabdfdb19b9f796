//! Sensor identification, mode bookkeeping and the image tuning registers.
//!
//! [`Camera`] owns the register bus of one camera module. Startup resets the
//! module, identifies the sensor variant and announces the controller's bus
//! address. Pixel format and resolution are kept as pending/applied pairs and
//! are only written when a capture needs them; every other control is written
//! immediately and followed by [`Camera::wait_idle`].

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use modular_bitfield::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::time::Instant;
use strum_macros::Display;
use tracing::{debug, info, warn};

use crate::bus::RegisterBus;
use crate::capture::CaptureState;
use crate::config::CameraConfig;
use crate::constants::*;
use crate::error::CamError;
use crate::poll::PollBudget;

// --- Sensor variant ---

/// Capability class of the attached sensor, read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SensorVariant {
    #[strum(to_string = "3MP")]
    ThreeMp,
    #[strum(to_string = "5MP")]
    FiveMp,
    #[strum(to_string = "Unknown")]
    Unknown,
}

impl SensorVariant {
    pub fn from_id(id: u8) -> Self {
        match id {
            SENSOR_3MP_1 | SENSOR_3MP_2 => SensorVariant::ThreeMp,
            SENSOR_5MP_1 | SENSOR_5MP_2 => SensorVariant::FiveMp,
            _ => SensorVariant::Unknown,
        }
    }

    /// Resolution names accepted by this variant, with their register codes.
    pub fn resolutions(&self) -> &'static [(&'static str, Resolution)] {
        match self {
            SensorVariant::ThreeMp => RESOLUTIONS_3MP,
            SensorVariant::FiveMp => RESOLUTIONS_5MP,
            SensorVariant::Unknown => &[],
        }
    }

    /// Case-insensitive lookup in this variant's resolution table.
    pub fn lookup_resolution(&self, name: &str) -> Option<Resolution> {
        self.resolutions()
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, resolution)| *resolution)
    }

    /// The 5MP sensor needs its auto white balance to settle before capturing.
    pub fn needs_warmup(&self) -> bool {
        matches!(self, SensorVariant::FiveMp)
    }
}

// --- Register value enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Resolution {
    #[strum(to_string = "320x240")]
    Res320x240 = 0x01,
    #[strum(to_string = "640x480")]
    Res640x480 = 0x02,
    #[strum(to_string = "1280x720")]
    Res1280x720 = 0x04,
    #[strum(to_string = "1600x1200")]
    Res1600x1200 = 0x06,
    #[strum(to_string = "1920x1080")]
    Res1920x1080 = 0x07,
    /// 3MP only
    #[strum(to_string = "2048x1536")]
    Res2048x1536 = 0x08,
    /// 5MP only
    #[strum(to_string = "2592x1944")]
    Res2592x1944 = 0x09,
    #[strum(to_string = "96x96")]
    Res96x96 = 0x0A,
    #[strum(to_string = "128x128")]
    Res128x128 = 0x0B,
    #[strum(to_string = "320x320")]
    Res320x320 = 0x0C,
}

const RESOLUTIONS_3MP: &[(&str, Resolution)] = &[
    ("320x240", Resolution::Res320x240),
    ("640x480", Resolution::Res640x480),
    ("1280x720", Resolution::Res1280x720),
    ("1600x1200", Resolution::Res1600x1200),
    ("1920x1080", Resolution::Res1920x1080),
    ("2048x1536", Resolution::Res2048x1536),
    ("96x96", Resolution::Res96x96),
    ("128x128", Resolution::Res128x128),
    ("320x320", Resolution::Res320x320),
];

const RESOLUTIONS_5MP: &[(&str, Resolution)] = &[
    ("320x240", Resolution::Res320x240),
    ("640x480", Resolution::Res640x480),
    ("1280x720", Resolution::Res1280x720),
    ("1600x1200", Resolution::Res1600x1200),
    ("1920x1080", Resolution::Res1920x1080),
    ("2592x1944", Resolution::Res2592x1944),
    ("96x96", Resolution::Res96x96),
    ("128x128", Resolution::Res128x128),
    ("320x320", Resolution::Res320x320),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PixelFormat {
    Jpeg = 0x01,
    Rgb565 = 0x02,
    Yuv = 0x03,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ColorEffect {
    Normal = 0,
    Cool = 1,
    Warm = 2,
    BlackWhite = 3,
    Yellowing = 4,
    Reverse = 5,
    Greenish = 6,
    /// 3MP only
    LightYellow = 9,
}

/// Brightness steps; the register interleaves positive and negative offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Brightness {
    Minus4 = 8,
    Minus3 = 6,
    Minus2 = 4,
    Minus1 = 2,
    Neutral = 0,
    Plus1 = 1,
    Plus2 = 3,
    Plus3 = 5,
    Plus4 = 7,
}

/// Shared step encoding of the contrast, saturation and exposure registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Level {
    Minus3 = 6,
    Minus2 = 4,
    Minus1 = 2,
    Neutral = 0,
    Plus1 = 1,
    Plus2 = 3,
    Plus3 = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum WhiteBalance {
    Auto = 0,
    Sunny = 1,
    Office = 2,
    Cloudy = 3,
    Home = 4,
}

impl WhiteBalance {
    /// Maps an environment name to its mode, `None` for anything unrecognised.
    pub fn from_environment(environment: &str) -> Option<Self> {
        [
            ("sunny", WhiteBalance::Sunny),
            ("office", WhiteBalance::Office),
            ("cloudy", WhiteBalance::Cloudy),
            ("home", WhiteBalance::Home),
            ("auto", WhiteBalance::Auto),
        ]
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(environment))
        .map(|(_, mode)| mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ImageQuality {
    High = 0,
    Medium = 1,
    Low = 2,
}

/// Highest level accepted by the sharpness register.
pub const MAX_SHARPNESS: u8 = 8;

// --- Status register ---

#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorStatus {
    pub state: B2,
    pub capture_done: bool,
    #[skip]
    unused: B5,
}

// --- Mode bookkeeping ---

/// A register value that is written lazily: `applied` is the last value that
/// actually reached the device, `None` until the first write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting<T> {
    pending: T,
    applied: Option<T>,
}

impl<T: Copy + PartialEq> Setting<T> {
    pub fn new(initial: T) -> Self {
        Self {
            pending: initial,
            applied: None,
        }
    }

    pub fn pending(&self) -> T {
        self.pending
    }

    pub fn applied(&self) -> Option<T> {
        self.applied
    }

    pub fn request(&mut self, value: T) {
        self.pending = value;
    }

    pub fn needs_write(&self) -> bool {
        self.applied != Some(self.pending)
    }

    /// Records that `pending` was written to the device.
    pub fn commit(&mut self) {
        self.applied = Some(self.pending);
    }
}

// --- Controller ---

/// Controller for one SPI camera module.
pub struct Camera<SPI, CS, D> {
    pub(crate) bus: RegisterBus<SPI, CS, D>,
    pub(crate) config: CameraConfig,
    pub(crate) variant: SensorVariant,
    pub(crate) pixel_format: Setting<u8>,
    pub(crate) resolution: Setting<Resolution>,
    pub(crate) state: CaptureState,
    pub(crate) started_at: Instant,
    pub(crate) warmed_up: bool,
    /// Bumped by every capture; sessions from older captures are refused.
    pub(crate) generation: u32,
}

impl<SPI, CS, D> Camera<SPI, CS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    /// Resets and identifies the module, then runs the variant's startup routine.
    pub fn new(spi: SPI, cs: CS, delay: D, config: CameraConfig) -> Result<Self, CamError> {
        config.validate()?;
        let mut camera = Self {
            bus: RegisterBus::new(spi, cs, delay),
            config,
            variant: SensorVariant::Unknown,
            pixel_format: Setting::new(PixelFormat::Jpeg.into()),
            resolution: Setting::new(Resolution::Res640x480),
            state: CaptureState::Idle,
            started_at: Instant::now(),
            warmed_up: false,
            generation: 0,
        };
        camera.startup()?;
        Ok(camera)
    }

    fn startup(&mut self) -> Result<(), CamError> {
        info!("--- Resetting camera module ---");
        self.bus.write_reg(REG_SENSOR_RESET, SENSOR_RESET_ENABLE)?;
        self.wait_idle()?;

        let id = self.bus.read_reg(REG_SENSOR_ID)?;
        self.wait_idle()?;
        self.variant = SensorVariant::from_id(id);
        if self.config.debug {
            info!(variant = %self.variant, "Sensor identified (id {:#04x})", id);
        } else {
            debug!(variant = %self.variant, "Sensor identified (id {:#04x})", id);
        }
        if self.variant == SensorVariant::Unknown {
            warn!("Unrecognised sensor id {:#04x}; resolution changes will be rejected", id);
        }

        self.bus.write_reg(REG_DEBUG_DEVICE_ADDRESS, self.config.device_address)?;
        self.wait_idle()?;

        self.set_filter(ColorEffect::Normal)?;
        self.started_at = Instant::now();

        match self.variant {
            SensorVariant::ThreeMp if self.config.prime_3mp => self.prime()?,
            SensorVariant::FiveMp if !self.config.skip_warmup => {
                info!(warmup_ms = self.config.warmup_ms, "Waiting for auto white balance");
                self.bus.pause_ms(self.config.warmup_ms);
                self.warmed_up = true;
            }
            _ => {}
        }

        info!(variant = %self.variant, "Camera ready");
        Ok(())
    }

    /// Takes one frame and throws it away so exposure can settle.
    fn prime(&mut self) -> Result<(), CamError> {
        info!("Running 3MP startup capture");
        if let Some(session) = self.capture()? {
            self.discard(session)?;
        }
        Ok(())
    }

    pub fn variant(&self) -> SensorVariant {
        self.variant
    }

    pub fn buffer_capacity(&self) -> usize {
        self.config.buffer_capacity
    }

    /// Resolution the next capture will use.
    pub fn resolution(&self) -> Resolution {
        self.resolution.pending()
    }

    /// Resolution last written to the module, if any.
    pub fn applied_resolution(&self) -> Option<Resolution> {
        self.resolution.applied()
    }

    /// Raw pixel format byte the next capture will use.
    pub fn pixel_format(&self) -> u8 {
        self.pixel_format.pending()
    }

    pub fn applied_pixel_format(&self) -> Option<u8> {
        self.pixel_format.applied()
    }

    /// Selects a resolution by name, e.g. `"1920x1080"`. Takes effect on the next capture.
    pub fn set_resolution(&mut self, name: &str) -> Result<Resolution, CamError> {
        self.require_known("set_resolution")?;
        let resolution = self.variant.lookup_resolution(name).ok_or_else(|| {
            let valid: Vec<&str> = self.variant.resolutions().iter().map(|(n, _)| *n).collect();
            CamError::InvalidArgument(format!(
                "invalid resolution {name:?} for the {} sensor, expected one of {valid:?}",
                self.variant
            ))
        })?;
        self.resolution.request(resolution);
        debug!(%resolution, "Resolution pending");
        Ok(resolution)
    }

    /// Takes effect on the next capture.
    pub fn set_pixel_format(&mut self, format: impl Into<u8>) -> Result<(), CamError> {
        self.require_known("set_pixel_format")?;
        self.pixel_format.request(format.into());
        Ok(())
    }

    pub fn set_brightness(&mut self, level: impl Into<u8>) -> Result<(), CamError> {
        self.write_and_settle(REG_BRIGHTNESS, level.into())
    }

    pub fn set_contrast(&mut self, level: impl Into<u8>) -> Result<(), CamError> {
        self.write_and_settle(REG_CONTRAST, level.into())
    }

    pub fn set_saturation(&mut self, level: impl Into<u8>) -> Result<(), CamError> {
        self.write_and_settle(REG_SATURATION, level.into())
    }

    pub fn set_exposure(&mut self, level: impl Into<u8>) -> Result<(), CamError> {
        self.write_and_settle(REG_EXPOSURE, level.into())
    }

    pub fn set_filter(&mut self, effect: impl Into<u8>) -> Result<(), CamError> {
        self.write_and_settle(REG_COLOR_EFFECT, effect.into())
    }

    pub fn set_image_quality(&mut self, quality: impl Into<u8>) -> Result<(), CamError> {
        self.write_and_settle(REG_IMAGE_QUALITY, quality.into())
    }

    /// Sets white balance from an environment name (`sunny`, `office`,
    /// `cloudy`, `home`). Anything else selects auto.
    pub fn set_white_balance(&mut self, environment: &str) -> Result<WhiteBalance, CamError> {
        let mode = match WhiteBalance::from_environment(environment) {
            Some(mode) => mode,
            None => {
                if self.variant == SensorVariant::ThreeMp {
                    warn!(environment, "Unknown white balance environment; set one explicitly for best results");
                }
                WhiteBalance::Auto
            }
        };
        self.write_and_settle(REG_WHITE_BALANCE, mode.into())?;
        Ok(mode)
    }

    pub fn set_sharpness(&mut self, level: u8) -> Result<(), CamError> {
        if self.variant != SensorVariant::ThreeMp {
            return Err(CamError::UnsupportedVariant {
                operation: "set_sharpness",
                variant: self.variant,
            });
        }
        if level > MAX_SHARPNESS {
            return Err(CamError::InvalidArgument(format!(
                "sharpness {level} is above the maximum of {MAX_SHARPNESS}"
            )));
        }
        self.write_and_settle(REG_SHARPNESS, level)
    }

    pub fn set_autofocus(&mut self, value: u8) -> Result<(), CamError> {
        if self.variant != SensorVariant::FiveMp {
            return Err(CamError::UnsupportedVariant {
                operation: "set_autofocus",
                variant: self.variant,
            });
        }
        self.write_and_settle(REG_AUTO_FOCUS, value)
    }

    pub fn read_status(&mut self) -> Result<SensorStatus, CamError> {
        let raw = self.bus.read_reg(REG_SENSOR_STATE)?;
        Ok(SensorStatus::from_bytes([raw]))
    }

    /// Polls the status register until the configured [`IdleCondition`]
    /// holds, within the `idle_poll` budget.
    ///
    /// [`IdleCondition`]: crate::config::IdleCondition
    pub fn wait_idle(&mut self) -> Result<(), CamError> {
        let condition = self.config.idle_condition;
        let mut budget = PollBudget::new(self.config.idle_poll, "wait for sensor idle");
        loop {
            let status = self.read_status()?;
            if condition.is_settled(status.state()) {
                return Ok(());
            }
            budget.spend()?;
            self.bus.pause_ms(budget.interval_ms());
        }
    }

    /// Hands the bus peripherals back.
    pub fn release(self) -> (SPI, CS, D) {
        self.bus.release()
    }

    pub(crate) fn write_and_settle(&mut self, addr: u8, value: u8) -> Result<(), CamError> {
        self.bus.write_reg(addr, value)?;
        self.wait_idle()
    }

    fn require_known(&self, operation: &'static str) -> Result<(), CamError> {
        if self.variant == SensorVariant::Unknown {
            return Err(CamError::UnsupportedVariant {
                operation,
                variant: self.variant,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_bytes_map_to_variants() {
        assert_eq!(SensorVariant::from_id(0x81), SensorVariant::FiveMp);
        assert_eq!(SensorVariant::from_id(0x83), SensorVariant::FiveMp);
        assert_eq!(SensorVariant::from_id(0x82), SensorVariant::ThreeMp);
        assert_eq!(SensorVariant::from_id(0x84), SensorVariant::ThreeMp);
        assert_eq!(SensorVariant::from_id(0x00), SensorVariant::Unknown);
        assert_eq!(SensorVariant::from_id(0xFF), SensorVariant::Unknown);
    }

    #[test]
    fn resolution_tables_differ_only_in_the_large_mode() {
        assert_eq!(
            SensorVariant::ThreeMp.lookup_resolution("2048x1536"),
            Some(Resolution::Res2048x1536)
        );
        assert_eq!(SensorVariant::FiveMp.lookup_resolution("2048x1536"), None);
        assert_eq!(
            SensorVariant::FiveMp.lookup_resolution("2592X1944"),
            Some(Resolution::Res2592x1944)
        );
        assert_eq!(SensorVariant::ThreeMp.lookup_resolution("2592x1944"), None);
        assert!(SensorVariant::Unknown.resolutions().is_empty());
    }

    #[test]
    fn resolution_display_matches_table_names() {
        for variant in [SensorVariant::ThreeMp, SensorVariant::FiveMp] {
            for (name, resolution) in variant.resolutions() {
                assert_eq!(resolution.to_string(), *name);
            }
        }
    }

    #[test]
    fn white_balance_environments() {
        assert_eq!(WhiteBalance::from_environment("sunny"), Some(WhiteBalance::Sunny));
        assert_eq!(WhiteBalance::from_environment("Office"), Some(WhiteBalance::Office));
        assert_eq!(WhiteBalance::from_environment("underwater"), None);
        assert_eq!(u8::from(WhiteBalance::Home), 4);
    }

    #[test]
    fn status_bits_decode() {
        let status = SensorStatus::from_bytes([0b0000_0110]);
        assert_eq!(status.state(), 0b10);
        assert!(status.capture_done());

        let status = SensorStatus::from_bytes([0b1111_1001]);
        assert_eq!(status.state(), 0b01);
        assert!(!status.capture_done());
    }

    #[test]
    fn setting_tracks_first_use_and_changes() {
        let mut setting = Setting::new(Resolution::Res640x480);
        assert!(setting.needs_write());
        setting.commit();
        assert!(!setting.needs_write());
        setting.request(Resolution::Res640x480);
        assert!(!setting.needs_write());
        setting.request(Resolution::Res320x240);
        assert!(setting.needs_write());
        assert_eq!(setting.applied(), Some(Resolution::Res640x480));
        setting.commit();
        assert_eq!(setting.applied(), Some(Resolution::Res320x240));
    }
}
