//! RESP2 wire layer.
//!
//! - [`codec`] - Encoder and streaming decoder
//! - [`error`] - Crate-wide error taxonomy
//! - [`frame`] - Frames and the tagged [`Reply`](frame::Reply) view

pub mod codec;
/// Error types.
pub mod error;
pub mod frame;
