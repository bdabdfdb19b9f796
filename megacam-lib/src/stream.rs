use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use std::io::Write;
use tracing::{debug, trace};

use crate::capture::CaptureSession;
use crate::error::CamError;
use crate::marker::{JpegScanner, ScanStep};
use crate::sensor::Camera;

/// Reusable burst buffer. Bytes past `valid_length` are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    data: Vec<u8>,
    valid_length: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            valid_length: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn valid_length(&self) -> usize {
        self.valid_length
    }

    /// The whole buffer, padding included.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Only the bytes filled by the last burst.
    pub fn valid(&self) -> &[u8] {
        &self.data[..self.valid_length]
    }
}

impl<SPI, CS, D> Camera<SPI, CS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    /// A buffer sized for this camera's bursts.
    pub fn frame_buffer(&self) -> FrameBuffer {
        FrameBuffer::new(self.config.buffer_capacity)
    }

    /// Reads the next burst of `session` into `buffer`.
    ///
    /// Returns the number of valid bytes, or `None` once the session is
    /// drained. A short final burst leaves the rest of the buffer zeroed. The
    /// session only advances when the bus read succeeded; a session from an
    /// earlier capture is refused with `ProtocolDesync`.
    pub fn read_burst(
        &mut self,
        session: &mut CaptureSession,
        buffer: &mut FrameBuffer,
    ) -> Result<Option<usize>, CamError> {
        self.check_session(session)?;
        if session.is_drained() {
            return Ok(None);
        }
        if buffer.capacity() == 0 {
            return Err(CamError::InvalidArgument("burst buffer has zero capacity".into()));
        }

        let length = session.next_burst_length(buffer.capacity());
        self.bus.read_burst(session.is_first_burst(), &mut buffer.data[..length])?;
        buffer.data[length..].fill(0);
        buffer.valid_length = length;
        session.finish_burst(length);

        trace!(
            length,
            remaining = session.remaining_length(),
            head = %hex::encode(&buffer.data[..length.min(8)]),
            "Burst read"
        );
        Ok(Some(length))
    }

    /// Drains `session` one byte at a time and copies the JPEG span into `sink`.
    ///
    /// Returns the number of bytes written. Fails with `ProtocolDesync` unless
    /// exactly one `FF D8 .. FF D9` span was found; the session is fully
    /// drained either way unless the bus itself fails.
    pub fn drain_marked<W: Write>(&mut self, session: &mut CaptureSession, sink: &mut W) -> Result<usize, CamError> {
        self.check_session(session)?;
        let mut scanner = JpegScanner::new();
        while !session.is_drained() {
            let byte = self.bus.read_fifo_byte()?;
            session.consume(1);
            match scanner.push(byte) {
                ScanStep::Skip => {}
                ScanStep::Open => {
                    trace!(remaining = session.remaining_length(), "Start-Of-Image found");
                    sink.write_all(ScanStep::Open.bytes())?;
                }
                step => sink.write_all(step.bytes())?,
            }
        }
        sink.flush()?;
        let written = scanner.finish()?;
        debug!(written, total = session.total_length(), "Marker drain complete");
        Ok(written)
    }

    /// Empties the FIFO through the burst path, dropping the data.
    pub fn discard(&mut self, mut session: CaptureSession) -> Result<(), CamError> {
        let mut buffer = self.frame_buffer();
        while self.read_burst(&mut session, &mut buffer)?.is_some() {}
        debug!(length = session.total_length(), "Frame discarded");
        Ok(())
    }
}
