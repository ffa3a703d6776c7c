//! Length-prefixed frame reassembly and encoding.
//!
//! The peer wire format is `[u32 big-endian length][length payload bytes]`.
//! Inbound payloads are zlib-compressed JSON; outbound payloads are raw
//! JSON with the same prefix. The protocol carries no resync token, so a
//! corrupt length prefix forces a full buffer reset — recovery happens at
//! the next length boundary the peer produces.

use thiserror::Error;

/// Maximum accepted frame payload size (50 MiB).
///
/// A length prefix above this is a protocol violation, not a size to
/// accumulate.
pub const MAX_FRAME_BYTES: usize = 50 * 1024 * 1024;

/// Number of bytes in the length prefix.
const LEN_PREFIX: usize = 4;

/// Errors raised while decoding the peer byte stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The length prefix exceeds [`MAX_FRAME_BYTES`].
    #[error("frame length {actual} exceeds maximum {max}")]
    Oversize {
        /// Maximum allowed payload size.
        max: usize,
        /// Length the prefix declared.
        actual: usize,
    },
    /// The length prefix was zero.
    #[error("frame length must be non-zero")]
    ZeroLength,
}

/// Stateful decoder turning arbitrary byte chunks into complete frames.
///
/// Append transport chunks with [`extend`](Self::extend), then drain
/// complete frames with [`next_frame`](Self::next_frame). The decoder
/// never emits a partial frame and never blocks — it is a pure
/// transformation over buffered state.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    pending_len: Option<usize>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transport chunk to the inbound buffer.
    ///
    /// Zero-length chunks (keepalives) are accepted and have no effect.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Attempts to extract the next complete frame.
    ///
    /// Returns `Ok(Some(payload))` when a full frame is buffered,
    /// `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when a length prefix is zero or oversized.
    /// The buffer and pending length are discarded before returning, so
    /// the caller may keep the connection open and continue feeding bytes;
    /// anything already buffered is lost.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if self.pending_len.is_none() {
            if self.buf.len() < LEN_PREFIX {
                return Ok(None);
            }
            let mut prefix = [0u8; LEN_PREFIX];
            prefix.copy_from_slice(&self.buf[..LEN_PREFIX]);
            let declared = u32::from_be_bytes(prefix) as usize;
            self.buf.drain(..LEN_PREFIX);

            if declared == 0 {
                self.reset();
                return Err(FrameError::ZeroLength);
            }
            if declared > MAX_FRAME_BYTES {
                self.reset();
                return Err(FrameError::Oversize {
                    max: MAX_FRAME_BYTES,
                    actual: declared,
                });
            }
            self.pending_len = Some(declared);
        }

        match self.pending_len {
            Some(len) if self.buf.len() >= len => {
                let payload: Vec<u8> = self.buf.drain(..len).collect();
                self.pending_len = None;
                Ok(Some(payload))
            }
            _ => Ok(None),
        }
    }

    /// Discards all buffered bytes and any pending length.
    ///
    /// Called on protocol violation and when a peer connection is
    /// replaced — buffered bytes belong to the old stream.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pending_len = None;
    }

    /// Number of bytes currently buffered (excluding a consumed prefix).
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if a length prefix has been read but its payload is
    /// still incomplete.
    #[must_use]
    pub fn mid_frame(&self) -> bool {
        self.pending_len.is_some()
    }
}

/// Encodes a payload with the `[u32 BE length][payload]` prefix.
///
/// Used for the relay→peer direction, which is not compressed.
///
/// # Panics
///
/// Panics if `payload` exceeds `u32::MAX` bytes; forwarded edits are
/// orders of magnitude below that.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).expect("payload exceeds u32 range");
    let mut v = Vec::with_capacity(LEN_PREFIX + payload.len());
    v.extend_from_slice(&len.to_be_bytes());
    v.extend_from_slice(payload);
    v
}
