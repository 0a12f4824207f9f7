//! Core deterministic primitives.
//!
//! Everything here must behave identically on every client so that a wave
//! seed reproduces the same duck set everywhere.

pub mod rng;

// Re-export core types
pub use rng::{SequenceGenerator, derive_wave_seed};
