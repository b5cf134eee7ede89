//! Frame synchronization
//!
//! Splits an unbounded byte stream into validated frames. The synchronizer
//! works on a caller-owned [`BytesMut`] accumulator and never does I/O, so
//! it can be driven by hand or plugged into `FramedRead` as a [`Decoder`].

use bytes::{Buf, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use super::{Frame, ProtocolError, FRAME_SIZE, START_MARKER};

/// Bytes dropped per call when a long run of noise holds no start marker
const NOISE_SKIP: usize = 10;

/// Counters kept by the synchronizer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Frames accepted
    pub frames: u64,
    /// Aligned candidates rejected for a bad checksum
    pub crc_errors: u64,
    /// Bytes thrown away while hunting for a frame
    pub bytes_discarded: u64,
}

/// Locates frame boundaries and validates frames
#[derive(Debug, Default)]
pub struct FrameSynchronizer {
    /// Start marker sits at offset 0 of the accumulator
    aligned: bool,
    stats: SyncStats,
}

impl FrameSynchronizer {
    /// Create a synchronizer with no alignment
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters since creation
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Pull the next valid frame out of `buf`
    ///
    /// Returns `None` when more bytes are needed. Invalid candidates cost
    /// exactly one byte each, so a stray byte injected in front of a good
    /// frame never takes that frame down with it.
    pub fn next_frame(&mut self, buf: &mut BytesMut) -> Option<Frame> {
        loop {
            if !self.aligned && !self.align(buf) {
                return None;
            }

            if buf.len() < FRAME_SIZE {
                return None;
            }

            match Frame::from_bytes(&buf[..FRAME_SIZE]) {
                Ok(frame) => {
                    buf.advance(FRAME_SIZE);
                    self.aligned = false;
                    self.stats.frames += 1;
                    return Some(frame);
                }
                Err(err) => {
                    if let ProtocolError::CrcMismatch { .. } = err {
                        self.stats.crc_errors += 1;
                    }
                    warn!("Dropping misaligned candidate frame: {}", err);
                    self.discard(buf, 1);
                    self.aligned = false;
                }
            }
        }
    }

    /// Move the start marker to offset 0, or trim noise if there is none
    fn align(&mut self, buf: &mut BytesMut) -> bool {
        match find_marker(buf) {
            Some(pos) => {
                if pos > 0 {
                    debug!("Resync: skipping {} bytes before start marker", pos);
                    self.discard(buf, pos);
                }
                self.aligned = true;
                true
            }
            None => {
                if buf.len() > FRAME_SIZE {
                    // Skip noise in fixed steps until at most one frame's worth remains
                    let steps = (buf.len() - FRAME_SIZE).div_ceil(NOISE_SKIP);
                    let skip = (steps * NOISE_SKIP).min(buf.len());
                    debug!("No start marker in {} bytes, skipping {}", buf.len(), skip);
                    self.discard(buf, skip);
                }

                // Keep a possible marker head that the next read completes
                let keep = partial_marker_len(buf);
                let drop = buf.len() - keep;
                if drop > 0 {
                    debug!("No start marker in {} bytes, clearing", buf.len());
                    self.discard(buf, drop);
                }
                false
            }
        }
    }

    fn discard(&mut self, buf: &mut BytesMut, count: usize) {
        buf.advance(count);
        self.stats.bytes_discarded += count as u64;
    }
}

/// Offset of the first complete start marker
fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(START_MARKER.len())
        .position(|window| window == START_MARKER)
}

/// Length of the longest suffix of `buf` that is a proper prefix of the marker
fn partial_marker_len(buf: &[u8]) -> usize {
    (1..START_MARKER.len())
        .rev()
        .find(|&len| buf.len() >= len && buf[buf.len() - len..] == START_MARKER[..len])
        .unwrap_or(0)
}

impl Decoder for FrameSynchronizer {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Errors would end the stream, so framing trouble is always handled here
        Ok(self.next_frame(src))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame = self.next_frame(buf);
        if frame.is_none() && !buf.is_empty() {
            debug!("Stream ended with {} unframed bytes", buf.len());
            let len = buf.len();
            self.discard(buf, len);
        }
        Ok(frame)
    }
}

impl Encoder<Frame> for FrameSynchronizer {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(frame.as_bytes());
        Ok(())
    }
}
