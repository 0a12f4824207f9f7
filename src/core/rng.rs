//! Deterministic Sequence Generator
//!
//! Linear congruential generator (Numerical Recipes constants) shared by every
//! client in a room. Given the same seed, produces an identical sequence on all
//! platforms because the only state is a `u32` advanced with wrapping integer
//! arithmetic.

use serde::{Serialize, Deserialize};

/// LCG multiplier.
const MULTIPLIER: u32 = 1_664_525;

/// LCG increment.
const INCREMENT: u32 = 1_013_904_223;

/// 2^32 as a float, the exclusive upper bound of `next_u32`.
const TWO_POW_32: f64 = 4_294_967_296.0;

/// Seeded pseudo-random source used to reproduce a wave on every client.
///
/// # Determinism Guarantee
///
/// Two generators built from the same seed produce bit-identical sequences
/// for any number of calls. Floating-point values are derived from the integer
/// state on every call and never fed back into it.
///
/// # Example
///
/// ```
/// use duck_sync::core::rng::SequenceGenerator;
///
/// let mut rng = SequenceGenerator::new(1);
/// assert_eq!(rng.next_u32(), 1_015_568_748);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGenerator {
    state: u32,
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SequenceGenerator {
    /// Create a generator from a 32-bit seed.
    ///
    /// A seed of 0 is normalized to 1.
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Advance the state and return it.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(MULTIPLIER).wrapping_add(INCREMENT);
        self.state
    }

    /// Next value scaled to `[0, 1)`.
    ///
    /// Divides by 2^32 rather than 0xFFFFFFFF, so 1.0 is never returned.
    /// Values differ in the last bits from generators using the latter divisor.
    #[inline]
    pub fn next_float(&mut self) -> f64 {
        f64::from(self.next_u32()) / TWO_POW_32
    }

    /// Next value scaled to `[min, max)`.
    #[inline]
    pub fn range(&mut self, min: f64, max: f64) -> f64 {
        min + (max - min) * self.next_float()
    }

    /// Next integer in `[0, max)`. Returns 0 when `max` is 0.
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_float() * f64::from(max)) as u32
    }

    /// Current internal state (for diagnostics).
    pub fn state(&self) -> u32 {
        self.state
    }
}

/// Derive a wave seed from the wave-start timestamp in milliseconds.
///
/// Keeps the low 32 bits of the timestamp, the same value every client
/// receives in `wave-started`.
pub fn derive_wave_seed(wave_start_ms: i64) -> u32 {
    (wave_start_ms as u64 & 0xFFFF_FFFF) as u32
}

// =============================================================================
// TESTS
// =============================================================================
