//! Zlib payload decompression.
//!
//! Peer→relay frame payloads are zlib-deflated UTF-8 JSON. A bad payload
//! costs only that frame; the stream position is untouched because the
//! frame was already sliced off by the decoder.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

/// Errors raised while inflating a frame payload.
#[derive(Debug, Error)]
pub enum InflateError {
    /// The payload is not a valid zlib stream.
    #[error("zlib decompression failed: {0}")]
    Zlib(#[source] std::io::Error),
    /// The decompressed bytes are not valid UTF-8.
    #[error("inflated payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Inflates a zlib-compressed payload into JSON text.
///
/// No amplification limit is applied beyond the frame cap: the compressed
/// input is already bounded, and the peer is trusted on this network.
///
/// # Errors
///
/// Returns [`InflateError`] when the deflate stream is malformed or the
/// output is not UTF-8.
pub fn inflate(payload: &[u8]) -> Result<String, InflateError> {
    let mut decoder = ZlibDecoder::new(payload);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(InflateError::Zlib)?;
    Ok(String::from_utf8(out)?)
}

/// Compresses text the way the peer does (zlib, default level).
///
/// The relay itself never compresses — this exists for tests, benches and
/// peer-side tooling.
#[must_use]
pub fn deflate(text: &str) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .expect("writing to an in-memory encoder cannot fail");
    encoder
        .finish()
        .expect("finishing an in-memory encoder cannot fail")
}
