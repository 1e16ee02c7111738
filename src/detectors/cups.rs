//! Cup-and-handle and half-cup (waist) detectors
//!
//! Both measure the current close inside the range between the trailing
//! window's highest high and lowest low.

use serde::Deserialize;

use super::helpers::{highest_high, lowest_low, trailing, validate_band, within};
use crate::{
    extrema::Extrema, indicators::FrameRow, PatternDetector, PatternKind, PatternResult, Period,
    Ratio, Result, OHLCV,
};

impl_with_defaults!(CupAndHandleDetector, HalfCupDetector);

// ============================================================
// CUP AND HANDLE
// ============================================================

/// Early-stage cup: a deep drop with the close recovering into the handle zone
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CupAndHandleDetector {
    pub window: Period,
    /// (high - low) / high must exceed this
    pub min_depth: Ratio,
    /// Accepted (close - low) / (high - low)
    pub recovery_band: (f64, f64),
    pub depth_weight: f64,
    pub recovery_weight: f64,
}

impl Default for CupAndHandleDetector {
    fn default() -> Self {
        Self {
            window: Period::new_const(250),
            min_depth: Ratio::new_const(0.30),
            recovery_band: (0.25, 0.55),
            depth_weight: 100.0,
            recovery_weight: 50.0,
        }
    }
}

impl PatternDetector for CupAndHandleDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::CupAndHandle
    }

    fn validate_config(&self) -> Result<()> {
        validate_band("cup recovery", self.recovery_band)
    }

    fn detect(&self, rows: &[FrameRow], _extrema: &Extrema) -> PatternResult {
        let len = rows.len();
        if len < self.min_rows() {
            return PatternResult::NO_MATCH;
        }

        let window = trailing(rows, self.window.get());
        let (high, low) = (highest_high(window), lowest_low(window));
        if !(high > 0.0) {
            return PatternResult::NO_MATCH;
        }
        let depth = (high - low) / high;
        if !(depth > self.min_depth.get()) {
            return PatternResult::NO_MATCH;
        }

        let last = &rows[len - 1];
        let recovery = (last.close() - low) / (high - low);
        if !within(recovery, self.recovery_band) || !(last.close() > last.sma20) {
            return PatternResult::NO_MATCH;
        }

        let score = depth * self.depth_weight + recovery * self.recovery_weight;
        PatternResult::potential(high, score)
    }
}

// ============================================================
// HALF CUP (WAIST)
// ============================================================

/// L-shaped base: the close lingers just above the window low
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HalfCupDetector {
    pub window: Period,
    pub recovery_band: (f64, f64),
    /// Close must stay below this fraction of the window high
    pub max_peak_fraction: Ratio,
    /// Trailing closes counted as time spent at the bottom
    pub bottom_days: Period,
    /// A close counts as at the bottom when <= low * (1 + band)
    pub bottom_band: Ratio,
    /// Close must be at least this fraction of SMA20
    pub sma_floor: Ratio,
    pub drop_weight: f64,
    pub day_weight: f64,
}

impl Default for HalfCupDetector {
    fn default() -> Self {
        Self {
            window: Period::new_const(250),
            recovery_band: (0.10, 0.35),
            max_peak_fraction: Ratio::new_const(0.70),
            bottom_days: Period::new_const(40),
            bottom_band: Ratio::new_const(0.15),
            sma_floor: Ratio::new_const(0.98),
            drop_weight: 100.0,
            day_weight: 2.0,
        }
    }
}

impl PatternDetector for HalfCupDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::HalfCup
    }

    fn validate_config(&self) -> Result<()> {
        validate_band("half cup recovery", self.recovery_band)
    }

    fn detect(&self, rows: &[FrameRow], _extrema: &Extrema) -> PatternResult {
        let len = rows.len();
        if len < self.min_rows() {
            return PatternResult::NO_MATCH;
        }

        let window = trailing(rows, self.window.get());
        let (high, low) = (highest_high(window), lowest_low(window));
        let drop = high - low;
        if !(drop > 0.0) {
            return PatternResult::NO_MATCH;
        }

        let last = &rows[len - 1];
        let close = last.close();
        let recovery = (close - low) / drop;
        if !within(recovery, self.recovery_band) || !(close < high * self.max_peak_fraction.get()) {
            return PatternResult::NO_MATCH;
        }
        if !(close >= last.sma20 * self.sma_floor.get()) {
            return PatternResult::NO_MATCH;
        }

        let bottom = low * (1.0 + self.bottom_band.get());
        let days_at_bottom = trailing(window, self.bottom_days.get())
            .iter()
            .filter(|r| r.close() <= bottom)
            .count();

        let score = drop / high * self.drop_weight + days_at_bottom as f64 * self.day_weight;
        PatternResult::potential(high, score)
    }
}
