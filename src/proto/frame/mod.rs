//! RESP frame types.
//!
//! This module defines the frame types used on the wire and the
//! [`Reply`] view that separates meta-states (absent, empty collection)
//! from user payloads.

/// Frame type definitions.
pub mod types;

mod reply;

pub use reply::{Reply, EMPTY_COLLECTION};
pub use types::Frame;
