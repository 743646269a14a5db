//! # Typed Frame Codec
//!
//! Frame structs, decode dispatch on the leading type byte, and
//! serialization with exact-length accounting.

pub mod parse;
pub mod types;
pub mod write;

pub use parse::{FrameDecoder, FrameIter};
pub use types::*;
pub use write::FrameEncoder;
