//! Chart pattern detectors
//!
//! Every detector is a stateless, configurable struct evaluated against the
//! analysis frame and its extrema.
//!
//! # Pattern Categories
//!
//! - **Bottoms**: Double Bottom, Triple Bottom
//! - **Cups**: Cup and Handle, Half Cup (waist)
//! - **Trend**: Long-Term Down Trend

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod bottoms;
pub mod cups;
pub mod trend;

// Re-export all detectors for convenience
pub use bottoms::*;
pub use cups::*;
pub use trend::*;
