// Register map and protocol constants for the SPI camera module

// --- Bus framing ---

/// Set on the command byte of a register write
pub const WRITE_BIT: u8 = 0x80;

/// Mask applied to the command byte of a register read
pub const READ_MASK: u8 = 0x7F;

/// Minimum settle time after every register write (ms)
pub const WRITE_SETTLE_MS: u32 = 1;

// --- Sensor control registers ---

pub const REG_SENSOR_RESET: u8 = 0x07;
pub const SENSOR_RESET_ENABLE: u8 = 0x40;

pub const REG_DEBUG_DEVICE_ADDRESS: u8 = 0x0A;

/// Bus address the controller announces to the module during startup
pub const DEFAULT_DEVICE_ADDRESS: u8 = 0x78;

pub const REG_FORMAT: u8 = 0x20;
pub const REG_CAPTURE_RESOLUTION: u8 = 0x21;
pub const REG_BRIGHTNESS: u8 = 0x22;
pub const REG_CONTRAST: u8 = 0x23;
pub const REG_SATURATION: u8 = 0x24;
pub const REG_EXPOSURE: u8 = 0x25;
pub const REG_WHITE_BALANCE: u8 = 0x26;
pub const REG_COLOR_EFFECT: u8 = 0x27;

/// 3MP only
pub const REG_SHARPNESS: u8 = 0x28;

/// 5MP only
pub const REG_AUTO_FOCUS: u8 = 0x29;

pub const REG_IMAGE_QUALITY: u8 = 0x2A;

// --- Identity ---

pub const REG_SENSOR_ID: u8 = 0x40;

pub const SENSOR_5MP_1: u8 = 0x81;
pub const SENSOR_3MP_1: u8 = 0x82;
pub const SENSOR_5MP_2: u8 = 0x83;
pub const SENSOR_3MP_2: u8 = 0x84;

// --- Status ---

/// Sensor state (bits 0-1) and capture-done flag (bit 2) share this register
pub const REG_SENSOR_STATE: u8 = 0x44;

/// Sensor state bits named "idle"; see `IdleCondition` for how polling uses it
pub const SENSOR_STATE_IDLE: u8 = 0x01;

/// Mask of the capture-done bit in [`REG_SENSOR_STATE`]
pub const CAPTURE_DONE_MASK: u8 = 0x04;

// --- FIFO ---

pub const REG_FIFO_CONTROL: u8 = 0x04;
pub const FIFO_CLEAR_MASK: u8 = 0x01;
pub const FIFO_START_MASK: u8 = 0x02;

/// FIFO length, low byte
pub const REG_FIFO_SIZE1: u8 = 0x45;
/// FIFO length, middle byte
pub const REG_FIFO_SIZE2: u8 = 0x46;
/// FIFO length, high byte
pub const REG_FIFO_SIZE3: u8 = 0x47;

/// The FIFO length registers carry 24 bits
pub const FIFO_LENGTH_MASK: u32 = 0x00FF_FFFF;

/// Command byte for a one-byte FIFO read (address phase + one data byte)
pub const SINGLE_FIFO_READ: u8 = 0x3D;

/// Command byte for a burst FIFO read
pub const BURST_FIFO_READ: u8 = 0x3C;

// --- Streaming ---

/// Default burst size and relay message size (bytes)
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Default auto white balance warm-up for the 5MP sensor (ms)
pub const WHITE_BALANCE_WARMUP_MS: u32 = 500;

// --- JPEG markers ---

pub const MARKER_PREFIX: u8 = 0xFF;
pub const SOI_SUFFIX: u8 = 0xD8;
pub const EOI_SUFFIX: u8 = 0xD9;

/// Start-Of-Image marker
pub const SOI: [u8; 2] = [MARKER_PREFIX, SOI_SUFFIX];

/// End-Of-Image marker
pub const EOI: [u8; 2] = [MARKER_PREFIX, EOI_SUFFIX];

// --- Relay handshake ---

/// Size of the length + burst count header of a handshake message
pub const HANDSHAKE_HEADER_SIZE: usize = 8;

/// Smallest message that fits the header and both trailing sentinels
pub const HANDSHAKE_MIN_SIZE: usize = HANDSHAKE_HEADER_SIZE + 2;

/// Second-to-last byte of a handshake message; also the downstream acknowledgement
pub const ACK_SENTINEL: u8 = 222;

/// Last byte of a handshake message
pub const TAIL_SENTINEL: u8 = 22;
