//! Downstream relay channel.
//!
//! Before a frame is forwarded the downstream device is told its size with a
//! handshake message of exactly one burst:
//!
//! ```text
//! [total_length: u32 BE][burst_count: u32 BE][zero padding ...][222][22]
//! ```
//!
//! The message is exchanged full-duplex until the first byte clocked back
//! equals 222. After that every burst buffer is written whole, padding
//! included, under a single chip-select assertion.

use bytes::{BufMut, Bytes, BytesMut};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use tracing::{debug, trace};
use zerocopy::byteorder::big_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::capture::CaptureSession;
use crate::config::RelayConfig;
use crate::constants::{ACK_SENTINEL, HANDSHAKE_HEADER_SIZE, HANDSHAKE_MIN_SIZE, TAIL_SENTINEL};
use crate::error::CamError;
use crate::poll::PollBudget;
use crate::stream::FrameBuffer;

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct HandshakeHeader {
    total_length: U32,
    burst_count: U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub total_length: u32,
    pub burst_count: u32,
    /// Size of the encoded message, equal to the burst buffer capacity.
    pub capacity: usize,
}

impl HandshakeMessage {
    pub fn for_session(session: &CaptureSession, capacity: usize) -> Self {
        Self {
            total_length: session.total_length(),
            burst_count: session.burst_count(capacity),
            capacity,
        }
    }

    pub fn encode(&self) -> Result<Bytes, CamError> {
        if self.capacity < HANDSHAKE_MIN_SIZE {
            return Err(CamError::InvalidArgument(format!(
                "handshake needs at least {HANDSHAKE_MIN_SIZE} bytes, capacity is {}",
                self.capacity
            )));
        }
        let header = HandshakeHeader {
            total_length: U32::new(self.total_length),
            burst_count: U32::new(self.burst_count),
        };
        let mut buf = BytesMut::with_capacity(self.capacity);
        buf.put_slice(header.as_bytes());
        buf.put_bytes(0, self.capacity - HANDSHAKE_MIN_SIZE);
        buf.put_u8(ACK_SENTINEL);
        buf.put_u8(TAIL_SENTINEL);
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CamError> {
        if data.len() < HANDSHAKE_MIN_SIZE {
            return Err(CamError::ProtocolDesync(format!(
                "handshake message of {} bytes is too short",
                data.len()
            )));
        }
        let tail = &data[data.len() - 2..];
        if tail != [ACK_SENTINEL, TAIL_SENTINEL] {
            return Err(CamError::ProtocolDesync(format!(
                "handshake sentinels missing, found {}",
                hex::encode(tail)
            )));
        }
        let header = HandshakeHeader::ref_from_bytes(&data[..HANDSHAKE_HEADER_SIZE])
            .map_err(|_| CamError::ProtocolDesync("unreadable handshake header".into()))?;
        Ok(Self {
            total_length: header.total_length.get(),
            burst_count: header.burst_count.get(),
            capacity: data.len(),
        })
    }
}

/// Driver side of the downstream serial channel.
pub struct RelayLink<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
    config: RelayConfig,
    transfer_active: bool,
}

impl<SPI, CS, D> RelayLink<SPI, CS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, cs: CS, delay: D, config: RelayConfig) -> Result<Self, CamError> {
        config.validate()?;
        Ok(Self {
            spi,
            cs,
            delay,
            config,
            transfer_active: false,
        })
    }

    /// Repeats the handshake exchange until the downstream device acknowledges.
    ///
    /// Returns the number of round trips. Chip-select is held for the whole
    /// exchange and released afterwards, also on failure.
    pub fn handshake(&mut self, message: &HandshakeMessage) -> Result<u32, CamError> {
        let outgoing = message.encode()?;
        let mut reply = vec![0u8; outgoing.len()];
        debug!(
            total_length = message.total_length,
            bursts = message.burst_count,
            "Starting downstream handshake"
        );

        self.cs.set_low().map_err(CamError::pin)?;
        let result = self.exchange_until_ack(&outgoing, &mut reply);
        let released = self.cs.set_high().map_err(CamError::pin);
        let attempts = result?;
        released?;

        debug!(attempts, "Downstream acknowledged");
        Ok(attempts)
    }

    fn exchange_until_ack(&mut self, outgoing: &[u8], reply: &mut [u8]) -> Result<u32, CamError> {
        let mut budget = PollBudget::new(self.config.handshake, "downstream handshake");
        loop {
            self.spi.transfer(reply, outgoing).map_err(CamError::spi)?;
            self.spi.flush().map_err(CamError::spi)?;
            if reply[0] == ACK_SENTINEL {
                return Ok(budget.attempts());
            }
            trace!(reply = %hex::encode(&reply[..reply.len().min(4)]), "No acknowledgement yet");
            budget.spend()?;
            let interval = budget.interval_ms();
            if interval > 0 {
                self.delay.delay_ms(interval);
            }
        }
    }

    /// Asserts chip-select for a run of bursts.
    pub fn begin_transfer(&mut self) -> Result<(), CamError> {
        self.cs.set_low().map_err(CamError::pin)?;
        self.transfer_active = true;
        Ok(())
    }

    /// Writes the whole buffer, zero padding included, as one transaction.
    pub fn send_burst(&mut self, buffer: &FrameBuffer) -> Result<(), CamError> {
        if !self.transfer_active {
            return Err(CamError::ProtocolDesync("burst sent outside a transfer".into()));
        }
        self.spi.write(buffer.as_slice()).map_err(CamError::spi)?;
        self.spi.flush().map_err(CamError::spi)
    }

    /// Releases chip-select. Safe to call when no transfer is running.
    pub fn end_transfer(&mut self) -> Result<(), CamError> {
        if !self.transfer_active {
            return Ok(());
        }
        self.transfer_active = false;
        self.cs.set_high().map_err(CamError::pin)
    }

    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_header_padding_and_sentinels() {
        let message = HandshakeMessage {
            total_length: 5000,
            burst_count: 5,
            capacity: 16,
        };
        let bytes = message.encode().unwrap();
        assert_eq!(hex::encode(&bytes), "0000138800000005000000000000de16");
    }

    #[test]
    fn session_size_sets_burst_count() {
        let message = HandshakeMessage::for_session(&CaptureSession::new(5000), 1024);
        assert_eq!(message.burst_count, 5);
        let decoded = HandshakeMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn rejects_too_small_capacity_and_bad_tail() {
        let message = HandshakeMessage {
            total_length: 1,
            burst_count: 1,
            capacity: 9,
        };
        assert!(matches!(message.encode(), Err(CamError::InvalidArgument(_))));

        let mut bytes = HandshakeMessage {
            capacity: 12,
            ..message
        }
        .encode()
        .unwrap()
        .to_vec();
        bytes[11] = 0;
        assert!(matches!(HandshakeMessage::decode(&bytes), Err(CamError::ProtocolDesync(_))));
    }
}
