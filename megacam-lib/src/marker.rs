//! JPEG frame boundary detection over a raw byte stream.
//!
//! [`JpegScanner`] is fed one byte at a time and says which bytes belong to
//! the frame: everything from the first `FF D8` up to and including the next
//! `FF D9`. It knows nothing about where the bytes come from, so the same
//! scanner serves the FIFO drain and in-memory buffers.

use std::slice;

use crate::constants::{EOI_SUFFIX, MARKER_PREFIX, SOI, SOI_SUFFIX};
use crate::error::CamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Seeking,
    InFrame,
    Complete,
}

/// What to do with the byte just pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    /// Outside the frame.
    Skip,
    /// Start-Of-Image seen; emit both marker bytes.
    Open,
    /// Frame content.
    Byte(u8),
    /// Last byte of the End-Of-Image marker; the frame is complete.
    Close,
}

impl ScanStep {
    /// Bytes this step contributes to the frame.
    pub fn bytes(&self) -> &[u8] {
        match self {
            ScanStep::Skip => &[],
            ScanStep::Open => &SOI,
            ScanStep::Byte(byte) => slice::from_ref(byte),
            ScanStep::Close => slice::from_ref(&EOI_SUFFIX),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JpegScanner {
    state: ScanState,
    previous: Option<u8>,
    frame_length: usize,
    stray_markers: usize,
}

impl Default for JpegScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl JpegScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::Seeking,
            previous: None,
            frame_length: 0,
            stray_markers: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn push(&mut self, byte: u8) -> ScanStep {
        let after_prefix = self.previous == Some(MARKER_PREFIX);
        self.previous = Some(byte);

        let step = match self.state {
            ScanState::Seeking if after_prefix && byte == SOI_SUFFIX => {
                self.state = ScanState::InFrame;
                ScanStep::Open
            }
            ScanState::Seeking => ScanStep::Skip,
            ScanState::InFrame if after_prefix && byte == EOI_SUFFIX => {
                self.state = ScanState::Complete;
                // The closing FF must not pair with a following byte.
                self.previous = None;
                ScanStep::Close
            }
            ScanState::InFrame => ScanStep::Byte(byte),
            ScanState::Complete => {
                if after_prefix && byte == SOI_SUFFIX {
                    self.stray_markers += 1;
                }
                ScanStep::Skip
            }
        };
        self.frame_length += step.bytes().len();
        step
    }

    /// Checks that exactly one complete frame was seen and returns its length.
    pub fn finish(&self) -> Result<usize, CamError> {
        match self.state {
            ScanState::Seeking => Err(CamError::ProtocolDesync(
                "no Start-Of-Image marker in the drained frame".into(),
            )),
            ScanState::InFrame => Err(CamError::ProtocolDesync(format!(
                "End-Of-Image marker missing after {} frame bytes",
                self.frame_length
            ))),
            ScanState::Complete if self.stray_markers > 0 => Err(CamError::ProtocolDesync(format!(
                "{} extra Start-Of-Image marker(s) after the frame",
                self.stray_markers
            ))),
            ScanState::Complete => Ok(self.frame_length),
        }
    }
}

/// Returns the single `FF D8 .. FF D9` span inside `data`.
pub fn extract_frame(data: &[u8]) -> Result<&[u8], CamError> {
    let mut scanner = JpegScanner::new();
    let mut start = 0;
    let mut end = 0;
    for (index, &byte) in data.iter().enumerate() {
        match scanner.push(byte) {
            ScanStep::Open => start = index - 1,
            ScanStep::Close => end = index + 1,
            ScanStep::Skip | ScanStep::Byte(_) => {}
        }
    }
    scanner.finish()?;
    Ok(&data[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(data: &[u8]) -> (Vec<u8>, JpegScanner) {
        let mut scanner = JpegScanner::new();
        let mut out = Vec::new();
        for &byte in data {
            out.extend_from_slice(scanner.push(byte).bytes());
        }
        (out, scanner)
    }

    #[test]
    fn emits_only_the_marked_span() {
        let data = [0x00, 0x12, 0xFF, 0xD8, 0xAA, 0xFF, 0x00, 0xFF, 0xD9, 0x55, 0x66];
        let (out, scanner) = scan(&data);
        assert_eq!(out, vec![0xFF, 0xD8, 0xAA, 0xFF, 0x00, 0xFF, 0xD9]);
        assert_eq!(scanner.finish().unwrap(), 7);
    }

    #[test]
    fn minimal_frame() {
        let (out, scanner) = scan(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(out, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(scanner.state(), ScanState::Complete);
    }

    #[test]
    fn lone_d9_before_soi_is_ignored() {
        let (out, _) = scan(&[0xFF, 0xD9, 0xFF, 0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
        assert_eq!(out, vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
    }

    #[test]
    fn missing_markers_are_desync() {
        let (_, scanner) = scan(&[0x01, 0x02, 0x03]);
        assert!(matches!(scanner.finish(), Err(CamError::ProtocolDesync(_))));

        let (_, scanner) = scan(&[0xFF, 0xD8, 0x01, 0x02]);
        assert!(matches!(scanner.finish(), Err(CamError::ProtocolDesync(_))));
    }

    #[test]
    fn second_frame_is_desync() {
        let (out, scanner) = scan(&[0xFF, 0xD8, 0xFF, 0xD9, 0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        assert_eq!(out, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        assert!(matches!(scanner.finish(), Err(CamError::ProtocolDesync(_))));
    }

    #[test]
    fn extract_frame_slices_the_input() {
        let data = [0x10, 0xFF, 0xD8, 0x42, 0xFF, 0xD9, 0x00, 0x00];
        assert_eq!(extract_frame(&data).unwrap(), &data[1..6]);
        assert!(extract_frame(&[]).is_err());
    }
}
