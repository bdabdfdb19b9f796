//! End-to-end flows built from the controller, the streamer and the relay.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::capture::CaptureSession;
use crate::error::CamError;
use crate::relay::{HandshakeMessage, RelayLink};
use crate::sensor::Camera;
use crate::stream::FrameBuffer;

/// Outcome and timing of one relayed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayReport {
    pub total_length: u32,
    pub bursts: u32,
    pub handshake_attempts: u32,
    pub capture_time: Duration,
    pub handshake_time: Duration,
    pub fifo_read_time: Duration,
    pub relay_write_time: Duration,
}

impl RelayReport {
    pub fn total_time(&self) -> Duration {
        self.capture_time + self.handshake_time + self.fifo_read_time + self.relay_write_time
    }

    fn log(&self) {
        info!(
            length = self.total_length,
            bursts = self.bursts,
            handshake_attempts = self.handshake_attempts,
            capture_ms = self.capture_time.as_millis() as u64,
            handshake_ms = self.handshake_time.as_millis() as u64,
            fifo_read_ms = self.fifo_read_time.as_millis() as u64,
            relay_write_ms = self.relay_write_time.as_millis() as u64,
            "Frame relayed"
        );
    }
}

/// Captures one frame and forwards it downstream.
///
/// Returns `Ok(None)` when the camera declined to capture because its white
/// balance is still settling.
pub fn relay_frame<SPI, CS, D, RS, RC, RD>(
    camera: &mut Camera<SPI, CS, D>,
    link: &mut RelayLink<RS, RC, RD>,
) -> Result<Option<RelayReport>, CamError>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    RS: SpiBus<u8>,
    RC: OutputPin,
    RD: DelayNs,
{
    let started = Instant::now();
    let Some(mut session) = camera.capture()? else {
        return Ok(None);
    };
    let capture_time = started.elapsed();

    let mut report = relay_session(camera, link, &mut session)?;
    report.capture_time = capture_time;
    report.log();
    Ok(Some(report))
}

/// Handshakes `session` with the downstream device and streams all of its
/// bursts. `capture_time` in the returned report is zero.
pub fn relay_session<SPI, CS, D, RS, RC, RD>(
    camera: &mut Camera<SPI, CS, D>,
    link: &mut RelayLink<RS, RC, RD>,
    session: &mut CaptureSession,
) -> Result<RelayReport, CamError>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    RS: SpiBus<u8>,
    RC: OutputPin,
    RD: DelayNs,
{
    let capacity = camera.buffer_capacity();
    let message = HandshakeMessage::for_session(session, capacity);

    let started = Instant::now();
    let handshake_attempts = link.handshake(&message)?;
    let handshake_time = started.elapsed();

    let mut buffer = camera.frame_buffer();
    let mut timing = BurstTiming::default();

    link.begin_transfer()?;
    let streamed = stream_bursts(camera, link, session, &mut buffer, &mut timing);
    let released = link.end_transfer();
    streamed?;
    released?;

    let bursts = timing.bursts;
    if bursts != message.burst_count {
        return Err(CamError::ProtocolDesync(format!(
            "announced {} bursts but sent {bursts}",
            message.burst_count
        )));
    }

    Ok(RelayReport {
        total_length: message.total_length,
        bursts,
        handshake_attempts,
        capture_time: Duration::ZERO,
        handshake_time,
        fifo_read_time: timing.fifo_read,
        relay_write_time: timing.relay_write,
    })
}

#[derive(Default)]
struct BurstTiming {
    bursts: u32,
    fifo_read: Duration,
    relay_write: Duration,
}

fn stream_bursts<SPI, CS, D, RS, RC, RD>(
    camera: &mut Camera<SPI, CS, D>,
    link: &mut RelayLink<RS, RC, RD>,
    session: &mut CaptureSession,
    buffer: &mut FrameBuffer,
    timing: &mut BurstTiming,
) -> Result<(), CamError>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    RS: SpiBus<u8>,
    RC: OutputPin,
    RD: DelayNs,
{
    loop {
        let started = Instant::now();
        if camera.read_burst(session, buffer)?.is_none() {
            return Ok(());
        }
        timing.fifo_read += started.elapsed();

        let started = Instant::now();
        link.send_burst(buffer)?;
        timing.relay_write += started.elapsed();
        timing.bursts += 1;
    }
}

/// Captures one frame and writes its JPEG span to `sink`.
///
/// Returns the number of bytes written, or `None` while the white balance is
/// still settling.
pub fn capture_jpeg<SPI, CS, D, W>(camera: &mut Camera<SPI, CS, D>, sink: &mut W) -> Result<Option<usize>, CamError>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
    W: Write,
{
    let Some(mut session) = camera.capture()? else {
        return Ok(None);
    };
    camera.drain_marked(&mut session, sink).map(Some)
}

/// Captures one frame into a JPEG file at `path`.
///
/// Nothing is left on disk when the frame has no valid marker span.
pub fn save_jpeg<SPI, CS, D>(camera: &mut Camera<SPI, CS, D>, path: impl AsRef<Path>) -> Result<Option<usize>, CamError>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    let path = path.as_ref();
    let Some(mut session) = camera.capture()? else {
        return Ok(None);
    };

    let mut file = BufWriter::new(File::create(path)?);
    let result = camera.drain_marked(&mut session, &mut file);
    drop(file);

    match result {
        Ok(written) => {
            info!(path = %path.display(), bytes = written, "Image saved");
            Ok(Some(written))
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Discarding partial image");
            if let Err(remove_err) = fs::remove_file(path) {
                warn!(error = %remove_err, "Could not remove partial image");
            }
            Err(err)
        }
    }
}
