use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use std::time::Duration;
use strum_macros::Display;
use tracing::{debug, info, warn};

use crate::constants::*;
use crate::error::CamError;
use crate::poll::PollBudget;
use crate::sensor::Camera;

/// Where the controller is within one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CaptureState {
    Idle,
    Configuring,
    Triggered,
    LengthKnown,
}

/// One captured frame waiting in the module FIFO.
///
/// `remaining_length` only ever decreases; once it reaches zero the frame has
/// been drained and the session is spent. A session only reads from the camera
/// that produced it, and only until that camera captures again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSession {
    total_length: u32,
    remaining_length: u32,
    first_burst: bool,
    generation: u32,
}

impl CaptureSession {
    /// A detached session, e.g. for sizing a handshake. No camera accepts it.
    pub fn new(total_length: u32) -> Self {
        Self::for_capture(total_length, 0)
    }

    pub(crate) fn for_capture(total_length: u32, generation: u32) -> Self {
        Self {
            total_length,
            remaining_length: total_length,
            first_burst: true,
            generation,
        }
    }

    /// Capture number this session belongs to; 0 for detached sessions.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn total_length(&self) -> u32 {
        self.total_length
    }

    pub fn remaining_length(&self) -> u32 {
        self.remaining_length
    }

    pub fn is_drained(&self) -> bool {
        self.remaining_length == 0
    }

    /// True until the first burst read of this session has completed.
    pub fn is_first_burst(&self) -> bool {
        self.first_burst
    }

    /// Number of bursts of `capacity` bytes needed for the whole frame.
    pub fn burst_count(&self, capacity: usize) -> u32 {
        let capacity = u32::try_from(capacity).unwrap_or(u32::MAX).max(1);
        self.total_length.div_ceil(capacity)
    }

    /// Size of the next burst for a buffer of `capacity` bytes.
    pub fn next_burst_length(&self, capacity: usize) -> usize {
        (self.remaining_length as usize).min(capacity)
    }

    pub(crate) fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.remaining_length as usize);
        self.remaining_length = self.remaining_length.saturating_sub(count as u32);
    }

    pub(crate) fn finish_burst(&mut self, count: usize) {
        self.consume(count);
        self.first_burst = false;
    }
}

impl<SPI, CS, D> Camera<SPI, CS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// False while a 5MP sensor that skipped its blocking warm-up is still
    /// inside the white balance window.
    pub fn is_warmed_up(&self) -> bool {
        if !self.variant.needs_warmup() || self.warmed_up {
            return true;
        }
        self.started_at.elapsed() >= Duration::from_millis(u64::from(self.config.warmup_ms))
    }

    /// Triggers one capture and returns the session describing the frame now
    /// sitting in the FIFO.
    ///
    /// Returns `Ok(None)` without touching the device while the white balance
    /// warm-up is still running; the caller has to try again later. On any
    /// error the controller returns to [`CaptureState::Idle`] with the mode it
    /// had last written, so the capture can simply be retried.
    pub fn capture(&mut self) -> Result<Option<CaptureSession>, CamError> {
        if !self.is_warmed_up() {
            warn!(
                warmup_ms = self.config.warmup_ms,
                "Auto white balance still settling, capture skipped"
            );
            return Ok(None);
        }

        let result = self.run_capture();
        self.state = CaptureState::Idle;
        if let Err(err) = &result {
            warn!(error = %err, "Capture failed");
        }
        result.map(Some)
    }

    /// Fails with `ProtocolDesync` when `session` did not come from this
    /// camera's latest capture; the FIFO no longer holds its frame.
    pub(crate) fn check_session(&self, session: &CaptureSession) -> Result<(), CamError> {
        if session.generation == 0 || session.generation != self.generation {
            return Err(CamError::ProtocolDesync(format!(
                "capture session {} is stale, current capture is {}",
                session.generation, self.generation
            )));
        }
        Ok(())
    }

    fn run_capture(&mut self) -> Result<CaptureSession, CamError> {
        // Earlier sessions die with the FIFO clear, even if this capture fails.
        self.generation = self.generation.wrapping_add(1).max(1);
        self.state = CaptureState::Configuring;
        self.apply_mode()?;

        self.bus.write_reg(REG_FIFO_CONTROL, FIFO_CLEAR_MASK)?;
        self.wait_idle()?;
        self.bus.write_reg(REG_FIFO_CONTROL, FIFO_START_MASK)?;
        self.state = CaptureState::Triggered;

        self.wait_capture_done()?;
        let total_length = self.read_fifo_length()?;
        self.state = CaptureState::LengthKnown;

        if total_length == 0 {
            warn!("FIFO reports an empty frame");
        }
        if self.config.debug {
            info!(length = total_length, resolution = %self.resolution.pending(), "Frame captured");
        } else {
            debug!(length = total_length, "Frame captured");
        }
        Ok(CaptureSession::for_capture(total_length, self.generation))
    }

    /// Writes pixel format and resolution when they differ from what the
    /// module last received.
    fn apply_mode(&mut self) -> Result<(), CamError> {
        if self.pixel_format.needs_write() {
            let format = self.pixel_format.pending();
            debug!("Applying pixel format {:#04x}", format);
            self.bus.write_reg(REG_FORMAT, format)?;
            self.pixel_format.commit();
            self.wait_idle()?;
        }
        if self.resolution.needs_write() {
            let resolution = self.resolution.pending();
            debug!(%resolution, "Applying resolution");
            self.bus.write_reg(REG_CAPTURE_RESOLUTION, resolution.into())?;
            self.resolution.commit();
            self.wait_idle()?;
        }
        Ok(())
    }

    fn wait_capture_done(&mut self) -> Result<(), CamError> {
        let mut budget = PollBudget::new(self.config.capture_poll, "wait for capture done");
        loop {
            if self.read_status()?.capture_done() {
                return Ok(());
            }
            budget.spend()?;
            self.bus.pause_ms(budget.interval_ms());
        }
    }

    fn read_fifo_length(&mut self) -> Result<u32, CamError> {
        let low = self.bus.read_reg(REG_FIFO_SIZE1)?;
        let mid = self.bus.read_reg(REG_FIFO_SIZE2)?;
        let high = self.bus.read_reg(REG_FIFO_SIZE3)?;
        Ok(u32::from_le_bytes([low, mid, high, 0]) & FIFO_LENGTH_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_count_rounds_up() {
        assert_eq!(CaptureSession::new(5000).burst_count(1024), 5);
        assert_eq!(CaptureSession::new(4096).burst_count(1024), 4);
        assert_eq!(CaptureSession::new(1).burst_count(1024), 1);
        assert_eq!(CaptureSession::new(0).burst_count(1024), 0);
    }

    #[test]
    fn bursts_shrink_at_the_tail() {
        let mut session = CaptureSession::new(2500);
        assert!(session.is_first_burst());
        assert_eq!(session.next_burst_length(1024), 1024);
        session.finish_burst(1024);
        assert!(!session.is_first_burst());
        session.finish_burst(1024);
        assert_eq!(session.next_burst_length(1024), 452);
        session.finish_burst(452);
        assert!(session.is_drained());
        assert_eq!(session.total_length(), 2500);
    }
}
