use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use tracing::trace;

use crate::constants::{BURST_FIFO_READ, READ_MASK, SINGLE_FIFO_READ, WRITE_BIT, WRITE_SETTLE_MS};
use crate::error::CamError;

/// Chip-select gated register access to the camera module.
///
/// Every transaction asserts chip-select, performs a handful of single-byte
/// SPI operations, flushes, and releases chip-select again, also when the
/// transfer itself failed.
pub struct RegisterBus<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
}

impl<SPI, CS, D> RegisterBus<SPI, CS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, cs: CS, delay: D) -> Self {
        Self { spi, cs, delay }
    }

    /// `addr | WRITE_BIT`, then `value`, under one chip-select assertion,
    /// followed by the write settle delay.
    pub fn write_reg(&mut self, addr: u8, value: u8) -> Result<(), CamError> {
        trace!("Register write {addr:#04x} <- {value:#04x}");
        self.selected(|spi| {
            spi.write(&[addr | WRITE_BIT])?;
            spi.write(&[value])
        })?;
        self.delay.delay_ms(WRITE_SETTLE_MS);
        Ok(())
    }

    /// `addr & READ_MASK`, then two one-byte reads. The first byte is clocked
    /// out during the address phase and is not data.
    pub fn read_reg(&mut self, addr: u8) -> Result<u8, CamError> {
        let value = self.command_read(addr & READ_MASK)?;
        trace!("Register read {addr:#04x} -> {value:#04x}");
        Ok(value)
    }

    /// Pops one byte off the FIFO with the single-byte read command.
    pub fn read_fifo_byte(&mut self) -> Result<u8, CamError> {
        self.command_read(SINGLE_FIFO_READ)
    }

    /// Fills `buf` from the FIFO with one burst command. On the first burst of a
    /// capture the module emits a throwaway byte before the data, which is
    /// dropped when `skip_leading` is set.
    pub fn read_burst(&mut self, skip_leading: bool, buf: &mut [u8]) -> Result<(), CamError> {
        trace!(len = buf.len(), skip_leading, "Burst read");
        self.selected(|spi| {
            spi.write(&[BURST_FIFO_READ])?;
            if skip_leading {
                let mut throwaway = [0u8; 1];
                spi.read(&mut throwaway)?;
            }
            spi.read(buf)
        })
    }

    pub fn pause_ms(&mut self, ms: u32) {
        if ms > 0 {
            self.delay.delay_ms(ms);
        }
    }

    /// Hands the underlying peripherals back.
    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }

    fn command_read(&mut self, command: u8) -> Result<u8, CamError> {
        let mut value = [0u8; 1];
        self.selected(|spi| {
            let mut address_phase = [0u8; 1];
            spi.write(&[command])?;
            spi.read(&mut address_phase)?;
            spi.read(&mut value)
        })?;
        Ok(value[0])
    }

    fn selected<F>(&mut self, op: F) -> Result<(), CamError>
    where
        F: FnOnce(&mut SPI) -> Result<(), SPI::Error>,
    {
        self.cs.set_low().map_err(CamError::pin)?;
        let result = op(&mut self.spi).and_then(|()| self.spi.flush());
        let released = self.cs.set_high();
        result.map_err(CamError::spi)?;
        released.map_err(CamError::pin)
    }
}
