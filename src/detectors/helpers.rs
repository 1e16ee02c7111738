//! Window helpers shared by the detector modules

use crate::{Result, ScreenError, OHLCV};

/// Trailing `n` rows, or everything when shorter
#[inline]
pub fn trailing<T>(rows: &[T], n: usize) -> &[T] {
    &rows[rows.len().saturating_sub(n)..]
}

/// Highest high; `NEG_INFINITY` for an empty window
pub fn highest_high<T: OHLCV>(rows: &[T]) -> f64 {
    rows.iter().map(|r| r.high()).fold(f64::NEG_INFINITY, f64::max)
}

/// Lowest low; `INFINITY` for an empty window
pub fn lowest_low<T: OHLCV>(rows: &[T]) -> f64 {
    rows.iter().map(|r| r.low()).fold(f64::INFINITY, f64::min)
}

/// Highest close; `None` for an empty window
pub fn max_close<T: OHLCV>(rows: &[T]) -> Option<f64> {
    rows.iter().map(|r| r.close()).reduce(f64::max)
}

/// Inclusive closed band test. NaN never falls inside.
#[inline]
pub fn within(value: f64, band: (f64, f64)) -> bool {
    value >= band.0 && value <= band.1
}

/// Troughs at or after `cutoff`, in ascending order
pub fn troughs_since(troughs: &[usize], cutoff: usize, len: usize) -> Vec<usize> {
    troughs.iter().copied().filter(|&t| t >= cutoff && t < len).collect()
}

pub fn validate_band(name: &str, band: (f64, f64)) -> Result<()> {
    if !(band.0.is_finite() && band.1.is_finite()) || band.0 < 0.0 || band.0 > band.1 {
        return Err(ScreenError::InvalidConfig(format!(
            "{name} band [{}, {}] must be finite, non-negative and ordered",
            band.0, band.1
        )));
    }
    Ok(())
}
