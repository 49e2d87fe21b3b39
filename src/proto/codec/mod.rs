//! RESP protocol encoder and decoder.
//!
//! - [`encoder`] - Frame encoding to bytes, buffered until taken
//! - [`decoder`] - Streaming frame decoder from bytes

/// Streaming RESP decoder.
pub mod decoder;
/// Buffered RESP encoder.
pub mod encoder;

pub use decoder::Decoder;
pub use encoder::Encoder;
