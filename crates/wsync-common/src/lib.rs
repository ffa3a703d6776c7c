//! Common wire-protocol pieces shared across the wsync stack.
//!
//! This crate provides:
//! - Length-prefixed frame reassembly and encoding ([`frame`])
//! - Zlib payload decompression ([`inflate`])
//! - Viewer message definitions ([`protocol`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod frame;
pub mod inflate;
pub mod protocol;

pub use frame::{FrameDecoder, FrameError, MAX_FRAME_BYTES};
pub use inflate::{inflate, InflateError};
pub use protocol::{Rotation, TransformEdit, ViewerMessage};
