//! Quote pricing.
//!
//! Quotes are placed symmetrically around the mark price, with the width
//! scaled by a skew ratio that an external risk process may adjust at runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Base fractional half-width applied on each side of the mark price.
pub const DEFAULT_SPREAD_CONSTANT: f64 = 0.001;

/// Buy/sell pair derived from a single mark price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub buy: f64,
    pub sell: f64,
}

/// Compute buy and sell quotes for `price`.
///
/// `buy = price * (1 + ratio * spread)`, `sell = price * (1 - ratio * spread)`.
pub fn quote(price: f64, ratio: f64, spread_constant: f64) -> Quote {
    let width = ratio * spread_constant;
    Quote {
        buy: price * (1.0 + width),
        sell: price * (1.0 - width),
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SkewError {
    #[error("skew ratio must be finite, got {0}")]
    NotFinite(f64),
    #[error("skew ratio must be >= 0, got {0}")]
    Negative(f64),
}

/// Process-wide skew ratio. Lock-free reads from the ingest hot path.
#[derive(Debug)]
pub struct SkewRatio {
    bits: AtomicU64,
}

impl SkewRatio {
    pub const DEFAULT: f64 = 1.0;

    pub fn new(ratio: f64) -> Result<Self, SkewError> {
        validate(ratio)?;
        Ok(Self {
            bits: AtomicU64::new(ratio.to_bits()),
        })
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Replace the ratio. Returns the previous value.
    pub fn set(&self, ratio: f64) -> Result<f64, SkewError> {
        validate(ratio)?;
        Ok(f64::from_bits(self.bits.swap(ratio.to_bits(), Ordering::AcqRel)))
    }
}

impl Default for SkewRatio {
    fn default() -> Self {
        Self {
            bits: AtomicU64::new(Self::DEFAULT.to_bits()),
        }
    }
}

fn validate(ratio: f64) -> Result<(), SkewError> {
    if !ratio.is_finite() {
        return Err(SkewError::NotFinite(ratio));
    }
    if ratio < 0.0 {
        return Err(SkewError::Negative(ratio));
    }
    Ok(())
}
