//! Register-level models of the camera module and the downstream device.
//!
//! Both models sit behind `embedded-hal` implementations ([`SimBus`],
//! [`SimChipSelect`], [`SimDelay`]) that share the model through an
//! `Rc<RefCell<_>>`, so a test can drive the driver and then inspect or
//! reconfigure the model in between calls. Every bus operation is recorded
//! as a [`BusEvent`].

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, SpiBus};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use crate::constants::*;
use crate::error::CamError;
use crate::relay::HandshakeMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Select,
    Deselect,
    Write(Vec<u8>),
    Read(usize),
    /// Bytes written during a full-duplex transfer.
    Transfer(Vec<u8>),
}

/// Fault raised by a model to simulate a broken bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError;

impl spi::Error for SimError {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

/// A device sitting on a simulated SPI bus.
pub trait BusModel {
    fn select(&mut self);
    fn deselect(&mut self);
    fn write(&mut self, data: &[u8]) -> Result<(), SimError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<(), SimError>;
    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SimError>;
    fn events_mut(&mut self) -> &mut Vec<BusEvent>;
}

pub struct SimBus<M> {
    model: Rc<RefCell<M>>,
}

impl<M: BusModel> spi::ErrorType for SimBus<M> {
    type Error = SimError;
}

impl<M: BusModel> SpiBus<u8> for SimBus<M> {
    fn read(&mut self, words: &mut [u8]) -> Result<(), SimError> {
        let mut model = self.model.borrow_mut();
        model.events_mut().push(BusEvent::Read(words.len()));
        model.read(words)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), SimError> {
        let mut model = self.model.borrow_mut();
        model.events_mut().push(BusEvent::Write(words.to_vec()));
        model.write(words)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SimError> {
        let mut model = self.model.borrow_mut();
        model.events_mut().push(BusEvent::Transfer(write.to_vec()));
        model.transfer(read, write)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), SimError> {
        let outgoing = words.to_vec();
        self.transfer(words, &outgoing)
    }

    fn flush(&mut self) -> Result<(), SimError> {
        Ok(())
    }
}

pub struct SimChipSelect<M> {
    model: Rc<RefCell<M>>,
}

impl<M: BusModel> digital::ErrorType for SimChipSelect<M> {
    type Error = Infallible;
}

impl<M: BusModel> OutputPin for SimChipSelect<M> {
    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut model = self.model.borrow_mut();
        model.events_mut().push(BusEvent::Select);
        model.select();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut model = self.model.borrow_mut();
        model.events_mut().push(BusEvent::Deselect);
        model.deselect();
        Ok(())
    }
}

/// Delay that only accumulates the requested time.
#[derive(Debug, Clone, Default)]
pub struct SimDelay {
    elapsed_ns: Rc<Cell<u64>>,
}

impl SimDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns.get() / 1_000_000
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns.set(self.elapsed_ns.get() + u64::from(ns));
    }
}

/// Wraps `model` into a shared handle plus the bus and chip-select driving it.
pub fn attach<M: BusModel>(model: M) -> (Rc<RefCell<M>>, SimBus<M>, SimChipSelect<M>) {
    let model = Rc::new(RefCell::new(model));
    let bus = SimBus { model: model.clone() };
    let cs = SimChipSelect { model: model.clone() };
    (model, bus, cs)
}

// --- Camera module ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Command,
    WriteValue(u8),
    ReadRegister { addr: u8, dummy: bool },
    FifoSingle { dummy: bool },
    FifoBurst,
    Done,
}

/// The camera module: register file, status register and frame FIFO.
#[derive(Debug)]
pub struct CameraModel {
    pub sensor_id: u8,
    /// Register contents as last written.
    pub registers: [u8; 0x80],
    /// Every register write in order, as `(address, value)`.
    pub register_writes: Vec<(u8, u8)>,
    pub events: Vec<BusEvent>,
    /// Frame loaded into the FIFO on every capture start.
    pub frame: Vec<u8>,
    /// Overrides the length reported through the FIFO size registers.
    pub reported_length: Option<u32>,
    /// Low two bits reported in the status register once not busy.
    pub sensor_state: u8,
    /// State reported while `busy_reads` is non-zero.
    pub busy_state: u8,
    /// Number of upcoming status reads that report `busy_state`.
    pub busy_reads: u32,
    /// Status polls after a capture start before capture-done is raised;
    /// `None` never raises it.
    pub capture_delay: Option<u32>,
    /// Makes every SPI read fail.
    pub fail_reads: bool,
    pub captures: u32,
    pub status_reads: u32,
    fifo: VecDeque<u8>,
    fifo_length: u32,
    capturing: bool,
    capture_polls_left: u32,
    burst_dummy_pending: bool,
    phase: Phase,
    selected: bool,
}

impl CameraModel {
    pub fn new(sensor_id: u8) -> Self {
        Self {
            sensor_id,
            registers: [0; 0x80],
            register_writes: Vec::new(),
            events: Vec::new(),
            frame: Vec::new(),
            reported_length: None,
            sensor_state: 0x02,
            busy_state: SENSOR_STATE_IDLE,
            busy_reads: 0,
            capture_delay: Some(2),
            fail_reads: false,
            captures: 0,
            status_reads: 0,
            fifo: VecDeque::new(),
            fifo_length: 0,
            capturing: false,
            capture_polls_left: 0,
            burst_dummy_pending: false,
            phase: Phase::Command,
            selected: false,
        }
    }

    pub fn with_frame(mut self, frame: Vec<u8>) -> Self {
        self.frame = frame;
        self
    }

    /// Writes to `addr`, in order.
    pub fn writes_to(&self, addr: u8) -> Vec<u8> {
        self.register_writes
            .iter()
            .filter(|(reg, _)| *reg == addr)
            .map(|(_, value)| *value)
            .collect()
    }

    /// Bytes still waiting in the FIFO.
    pub fn fifo_remaining(&self) -> usize {
        self.fifo.len()
    }

    pub fn clear_log(&mut self) {
        self.events.clear();
        self.register_writes.clear();
    }

    fn write_register(&mut self, addr: u8, value: u8) {
        self.register_writes.push((addr, value));
        self.registers[usize::from(addr)] = value;
        if addr == REG_FIFO_CONTROL {
            if value & FIFO_CLEAR_MASK != 0 {
                self.fifo.clear();
                self.capturing = false;
            }
            if value & FIFO_START_MASK != 0 {
                self.start_capture();
            }
        }
    }

    fn start_capture(&mut self) {
        self.captures += 1;
        self.fifo = self.frame.iter().copied().collect();
        self.fifo_length = self.reported_length.unwrap_or(self.frame.len() as u32);
        self.capturing = true;
        self.capture_polls_left = self.capture_delay.unwrap_or(u32::MAX);
        self.burst_dummy_pending = true;
    }

    fn read_register(&mut self, addr: u8) -> u8 {
        match addr {
            REG_SENSOR_ID => self.sensor_id,
            REG_SENSOR_STATE => self.status(),
            REG_FIFO_SIZE1 => self.fifo_length.to_le_bytes()[0],
            REG_FIFO_SIZE2 => self.fifo_length.to_le_bytes()[1],
            REG_FIFO_SIZE3 => self.fifo_length.to_le_bytes()[2],
            _ => self.registers[usize::from(addr)],
        }
    }

    fn status(&mut self) -> u8 {
        self.status_reads += 1;
        let state = if self.busy_reads > 0 {
            self.busy_reads -= 1;
            self.busy_state
        } else {
            self.sensor_state
        };
        let mut done = false;
        if self.capturing && self.capture_delay.is_some() {
            if self.capture_polls_left == 0 {
                done = true;
            } else {
                self.capture_polls_left -= 1;
            }
        }
        (state & 0x03) | if done { CAPTURE_DONE_MASK } else { 0 }
    }

    fn next_read_byte(&mut self) -> u8 {
        let phase = self.phase;
        match phase {
            Phase::ReadRegister { addr, dummy: true } => {
                self.phase = Phase::ReadRegister { addr, dummy: false };
                0x00
            }
            Phase::ReadRegister { addr, dummy: false } => {
                self.phase = Phase::Done;
                self.read_register(addr)
            }
            Phase::FifoSingle { dummy: true } => {
                self.phase = Phase::FifoSingle { dummy: false };
                0x00
            }
            Phase::FifoSingle { dummy: false } => {
                self.phase = Phase::Done;
                self.fifo.pop_front().unwrap_or(0)
            }
            Phase::FifoBurst if self.burst_dummy_pending => {
                self.burst_dummy_pending = false;
                0x00
            }
            Phase::FifoBurst => self.fifo.pop_front().unwrap_or(0),
            Phase::Command | Phase::WriteValue(_) | Phase::Done => 0x00,
        }
    }
}

impl BusModel for CameraModel {
    fn select(&mut self) {
        self.selected = true;
        self.phase = Phase::Command;
    }

    fn deselect(&mut self) {
        self.selected = false;
        self.phase = Phase::Command;
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SimError> {
        if !self.selected {
            return Ok(());
        }
        for &byte in data {
            let phase = self.phase;
            self.phase = match phase {
                Phase::Command if byte & WRITE_BIT != 0 => Phase::WriteValue(byte & READ_MASK),
                Phase::Command if byte == BURST_FIFO_READ => Phase::FifoBurst,
                Phase::Command if byte == SINGLE_FIFO_READ => Phase::FifoSingle { dummy: true },
                Phase::Command => Phase::ReadRegister {
                    addr: byte & READ_MASK,
                    dummy: true,
                },
                Phase::WriteValue(addr) => {
                    self.write_register(addr, byte);
                    Phase::Done
                }
                other => other,
            };
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), SimError> {
        if self.fail_reads {
            return Err(SimError);
        }
        for slot in buf.iter_mut() {
            *slot = if self.selected { self.next_read_byte() } else { 0xFF };
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SimError> {
        self.write(write)?;
        self.read(read)
    }

    fn events_mut(&mut self) -> &mut Vec<BusEvent> {
        &mut self.events
    }
}

// --- Downstream device ---

/// The consumer at the far end of the relay channel.
#[derive(Debug, Default)]
pub struct DownstreamModel {
    /// Acknowledge after this many refused round trips per handshake; `None`
    /// never acknowledges.
    pub ack_after: Option<u32>,
    /// Every handshake message received, acknowledged or not.
    pub handshakes: Vec<Vec<u8>>,
    /// Burst payloads written while selected.
    pub bursts: Vec<Vec<u8>>,
    pub events: Vec<BusEvent>,
    pub acknowledged: u32,
    round_trips: u32,
    selected: bool,
}

impl DownstreamModel {
    pub fn new(ack_after: Option<u32>) -> Self {
        Self {
            ack_after,
            ..Self::default()
        }
    }

    /// Reassembles the last announced frame from the received bursts.
    pub fn received_frame(&self) -> Result<Vec<u8>, CamError> {
        let handshake = self
            .handshakes
            .last()
            .ok_or_else(|| CamError::ProtocolDesync("no handshake received".into()))?;
        let message = HandshakeMessage::decode(handshake)?;
        let mut frame: Vec<u8> = self.bursts.concat();
        if frame.len() < message.total_length as usize {
            return Err(CamError::ProtocolDesync(format!(
                "received {} bytes of a {} byte frame",
                frame.len(),
                message.total_length
            )));
        }
        frame.truncate(message.total_length as usize);
        Ok(frame)
    }
}

impl BusModel for DownstreamModel {
    fn select(&mut self) {
        self.selected = true;
        self.round_trips = 0;
    }

    fn deselect(&mut self) {
        self.selected = false;
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SimError> {
        if self.selected {
            self.bursts.push(data.to_vec());
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), SimError> {
        buf.fill(0);
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SimError> {
        read.fill(0);
        if !self.selected {
            return Ok(());
        }
        self.handshakes.push(write.to_vec());
        self.round_trips += 1;
        let ready = self.ack_after.is_some_and(|refusals| self.round_trips > refusals);
        if ready {
            if let Some(first) = read.first_mut() {
                *first = ACK_SENTINEL;
            }
            self.acknowledged += 1;
        }
        Ok(())
    }

    fn events_mut(&mut self) -> &mut Vec<BusEvent> {
        &mut self.events
    }
}

// --- Test frames ---

/// A marker-delimited frame of `length` bytes (at least 4) whose body never
/// contains `0xFF`.
pub fn synthetic_jpeg(length: usize) -> Vec<u8> {
    let body = length.saturating_sub(4);
    let mut frame = Vec::with_capacity(body + 4);
    frame.extend_from_slice(&SOI);
    frame.extend((0..body).map(|i| ((i * 31 + 7) % 0xFF) as u8));
    frame.extend_from_slice(&EOI);
    frame
}

/// What the FIFO holds around a JPEG: `leading` filler bytes, the frame,
/// then `trailing` zero padding.
pub fn fifo_image(jpeg: &[u8], leading: usize, trailing: usize) -> Vec<u8> {
    let mut image = Vec::with_capacity(leading + jpeg.len() + trailing);
    image.extend((0..leading).map(|i| (i % 0x7F) as u8));
    image.extend_from_slice(jpeg);
    image.resize(image.len() + trailing, 0);
    image
}
