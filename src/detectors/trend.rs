//! Long-term downtrend detector

use serde::Deserialize;

use crate::{
    extrema::Extrema, indicators::FrameRow, PatternDetector, PatternKind, PatternResult, Period,
    Ratio, OHLCV,
};

impl_with_defaults!(LongTermDownTrendDetector);

/// Falling SMA200 with a fully bearish moving-average stack and the close
/// well below SMA200
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LongTermDownTrendDetector {
    /// SMA200 is compared against the row this many positions from the end
    pub slope_lag: Period,
    /// (SMA200 - close) / SMA200 must exceed this
    pub min_discount: Ratio,
}

impl Default for LongTermDownTrendDetector {
    fn default() -> Self {
        Self {
            slope_lag: Period::new_const(20),
            min_discount: Ratio::new_const(0.20),
        }
    }
}

impl PatternDetector for LongTermDownTrendDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::LongTermDownTrend
    }

    fn detect(&self, rows: &[FrameRow], _extrema: &Extrema) -> PatternResult {
        let len = rows.len();
        if len < self.min_rows() || len < self.slope_lag.get() {
            return PatternResult::NO_MATCH;
        }

        let curr = &rows[len - 1];
        let then = &rows[len - self.slope_lag.get()];
        let close = curr.close();

        let falling = curr.sma200 < then.sma200;
        let stacked = close < curr.sma20 && curr.sma20 < curr.sma50 && curr.sma50 < curr.sma200;
        if !(falling && stacked) {
            return PatternResult::NO_MATCH;
        }

        let discount = (curr.sma200 - close) / curr.sma200;
        if !(discount > self.min_discount.get()) {
            return PatternResult::NO_MATCH;
        }
        PatternResult::downward(curr.sma200, discount * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bar, PatternStatus};
    use chrono::NaiveDate;

    fn rows(len: usize, f: impl Fn(usize) -> (f64, f64, f64, f64)) -> Vec<FrameRow> {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        (0..len)
            .map(|i| {
                let (close, s20, s50, s200) = f(i);
                FrameRow {
                    sma20: s20,
                    sma50: s50,
                    sma200: s200,
                    ..FrameRow::from_bar(Bar::new(start + chrono::Days::new(i as u64), close, close, close, close, 1.0))
                }
            })
            .collect()
    }

    #[test]
    fn test_downward_match() {
        let r = rows(260, |i| (70.0, 80.0, 90.0, 200.0 - i as f64 * 0.1));
        let result = LongTermDownTrendDetector::default().detect(&r, &Extrema::default());
        assert!(result.matched);
        assert_eq!(result.status, PatternStatus::Downward);
        let sma200 = 200.0 - 259.0 * 0.1;
        assert_eq!(result.reference_price, Some(sma200));
        assert!((result.score - (sma200 - 70.0) / sma200 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_rising_sma200_rejected() {
        let r = rows(260, |i| (70.0, 80.0, 90.0, 150.0 + i as f64 * 0.1));
        assert!(!LongTermDownTrendDetector::default().detect(&r, &Extrema::default()).matched);
    }

    #[test]
    fn test_shallow_discount_rejected() {
        // close 15% under SMA200
        let r = rows(260, |i| (85.0, 90.0, 95.0, 100.0 + (260 - i) as f64 * 1e-3));
        let result = LongTermDownTrendDetector::default().detect(&r, &Extrema::default());
        assert_eq!(result, PatternResult::NO_MATCH);
    }

    #[test]
    fn test_unordered_stack_rejected() {
        let r = rows(260, |i| (70.0, 95.0, 90.0, 200.0 - i as f64 * 0.1));
        assert!(!LongTermDownTrendDetector::default().detect(&r, &Extrema::default()).matched);
    }

    #[test]
    fn test_missing_sma_rejected() {
        let r = rows(260, |i| (70.0, f64::NAN, 90.0, 200.0 - i as f64 * 0.1));
        assert!(!LongTermDownTrendDetector::default().detect(&r, &Extrema::default()).matched);
    }
}
