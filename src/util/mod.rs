//! # Utility Modules
//!
//! Small helpers shared across the crate.

pub mod hex;

pub use hex::{decode_hex, split_hex};
