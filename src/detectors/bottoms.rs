//! Double and triple bottom detectors
//!
//! Both look for the most recent troughs sitting near the window floor at
//! matching prices, then measure the current close against the neckline
//! (highest close between the first and last trough).

use serde::Deserialize;

use super::helpers::{lowest_low, max_close, trailing, troughs_since, validate_band, within};
use crate::{
    extrema::Extrema, indicators::FrameRow, PatternDetector, PatternKind, PatternResult, Period,
    Ratio, Result, OHLCV,
};

impl_with_defaults!(DoubleBottomDetector, TripleBottomDetector);

// ============================================================
// DOUBLE BOTTOM
// ============================================================

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DoubleBottomDetector {
    /// Troughs must fall within this many trailing rows
    pub lookback: Period,
    /// Rows the floor (lowest low) is taken over
    pub floor_window: Period,
    /// Both troughs close at most this far above the floor
    pub floor_tolerance: Ratio,
    /// Max relative gap between the two trough closes
    pub match_tolerance: Ratio,
    /// Current close relative to the neckline
    pub neckline_band: (f64, f64),
}

impl Default for DoubleBottomDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(150),
            floor_window: Period::new_const(250),
            floor_tolerance: Ratio::new_const(0.05),
            match_tolerance: Ratio::new_const(0.02),
            neckline_band: (0.85, 1.10),
        }
    }
}

impl PatternDetector for DoubleBottomDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::DoubleBottom
    }

    fn validate_config(&self) -> Result<()> {
        validate_band("double bottom neckline", self.neckline_band)
    }

    fn detect(&self, rows: &[FrameRow], extrema: &Extrema) -> PatternResult {
        let len = rows.len();
        if len < self.min_rows() {
            return PatternResult::NO_MATCH;
        }

        let recent = troughs_since(&extrema.troughs, len.saturating_sub(self.lookback.get()), len);
        let [.., idx1, idx2] = recent[..] else {
            return PatternResult::NO_MATCH;
        };
        // out-of-order troughs leave no neckline span
        if idx1 >= idx2 {
            return PatternResult::NO_MATCH;
        }

        let floor = lowest_low(trailing(rows, self.floor_window.get()));
        let ceiling = floor * (1.0 + self.floor_tolerance.get());
        let (p1, p2) = (rows[idx1].close(), rows[idx2].close());
        if !(p1 <= ceiling && p2 <= ceiling) {
            return PatternResult::NO_MATCH;
        }
        if !((p1 - p2).abs() / p1.min(p2) <= self.match_tolerance.get()) {
            return PatternResult::NO_MATCH;
        }

        let Some(neckline) = max_close(&rows[idx1..idx2]) else {
            return PatternResult::NO_MATCH;
        };
        let current = rows[len - 1].close();
        if !within(current, (neckline * self.neckline_band.0, neckline * self.neckline_band.1)) {
            return PatternResult::NO_MATCH;
        }

        PatternResult::potential(neckline, neckline)
    }
}

// ============================================================
// TRIPLE BOTTOM
// ============================================================

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TripleBottomDetector {
    pub lookback: Period,
    pub floor_window: Period,
    pub floor_tolerance: Ratio,
    /// Max (highest - lowest) / lowest across the three trough closes
    pub spread_tolerance: Ratio,
    pub neckline_band: (f64, f64),
}

impl Default for TripleBottomDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(200),
            floor_window: Period::new_const(250),
            floor_tolerance: Ratio::new_const(0.07),
            spread_tolerance: Ratio::new_const(0.03),
            neckline_band: (0.80, 1.15),
        }
    }
}

impl PatternDetector for TripleBottomDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::TripleBottom
    }

    fn validate_config(&self) -> Result<()> {
        validate_band("triple bottom neckline", self.neckline_band)
    }

    fn detect(&self, rows: &[FrameRow], extrema: &Extrema) -> PatternResult {
        let len = rows.len();
        if len < self.min_rows() {
            return PatternResult::NO_MATCH;
        }

        let recent = troughs_since(&extrema.troughs, len.saturating_sub(self.lookback.get()), len);
        let [.., idx1, idx2, idx3] = recent[..] else {
            return PatternResult::NO_MATCH;
        };
        if idx1 >= idx3 {
            return PatternResult::NO_MATCH;
        }

        let floor = lowest_low(trailing(rows, self.floor_window.get()));
        let ceiling = floor * (1.0 + self.floor_tolerance.get());
        let prices = [rows[idx1].close(), rows[idx2].close(), rows[idx3].close()];
        if !prices.iter().all(|&p| p <= ceiling) {
            return PatternResult::NO_MATCH;
        }
        let lowest = prices.iter().copied().fold(f64::INFINITY, f64::min);
        let highest = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !((highest - lowest) / lowest <= self.spread_tolerance.get()) {
            return PatternResult::NO_MATCH;
        }

        let Some(neckline) = max_close(&rows[idx1..idx3]) else {
            return PatternResult::NO_MATCH;
        };
        let current = rows[len - 1].close();
        if !within(current, (neckline * self.neckline_band.0, neckline * self.neckline_band.1)) {
            return PatternResult::NO_MATCH;
        }

        PatternResult::potential(neckline, neckline)
    }
}
