//! Peak and trough detection over closing prices
//!
//! Local maxima are filtered by topographic prominence and by their width at
//! half prominence. Troughs are the peaks of the negated series. Reported
//! positions index the full frame that was passed in.

use crate::{indicators::FrameRow, OHLCV};

/// Positions of significant highs and lows, ascending
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extrema {
    pub peaks: Vec<usize>,
    pub troughs: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtremaConfig {
    /// Trailing rows searched
    pub window: usize,
    /// Prominence threshold as a multiple of the close's sample std
    pub prominence_ratio: f64,
    /// Minimum width in bars at half prominence
    pub min_width: f64,
}

impl Default for ExtremaConfig {
    fn default() -> Self {
        Self {
            window: 250,
            prominence_ratio: 0.005,
            min_width: 3.0,
        }
    }
}

impl ExtremaConfig {
    pub fn find(&self, rows: &[FrameRow]) -> Extrema {
        let offset = rows.len().saturating_sub(self.window);
        let close: Vec<f64> = rows[offset..].iter().map(|r| r.close()).collect();
        if close.is_empty() {
            return Extrema::default();
        }

        let min_prominence = sample_std(&close) * self.prominence_ratio;
        let negated: Vec<f64> = close.iter().map(|c| -c).collect();
        let shift = |v: Vec<usize>| v.into_iter().map(|i| i + offset).collect();

        Extrema {
            peaks: shift(find_peaks(&close, min_prominence, self.min_width)),
            troughs: shift(find_peaks(&negated, min_prominence, self.min_width)),
        }
    }
}

/// Extrema over the trailing 250 rows with the default thresholds
pub fn find_extrema(rows: &[FrameRow]) -> Extrema {
    ExtremaConfig::default().find(rows)
}

/// Sample standard deviation (n - 1); NaN for fewer than two values
fn sample_std(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    (x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

/// Peaks with prominence >= `min_prominence` and width >= `min_width`.
/// A NaN threshold admits nothing.
pub fn find_peaks(x: &[f64], min_prominence: f64, min_width: f64) -> Vec<usize> {
    local_maxima(x)
        .into_iter()
        .filter_map(|peak| {
            let (prominence, left_base, right_base) = prominence(x, peak);
            if !(prominence >= min_prominence) {
                return None;
            }
            let width = width_at_half(x, peak, prominence, left_base, right_base);
            (width >= min_width).then_some(peak)
        })
        .collect()
}

/// Strict local maxima; flat tops report their (left-biased) midpoint
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                let left_edge = i;
                let right_edge = ahead - 1;
                peaks.push((left_edge + right_edge) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Prominence and the positions of its left and right bases
fn prominence(x: &[f64], peak: usize) -> (f64, usize, usize) {
    let height = x[peak];

    let mut left_base = peak;
    let mut left_min = height;
    let mut i = peak as isize;
    while i >= 0 && x[i as usize] <= height {
        if x[i as usize] < left_min {
            left_min = x[i as usize];
            left_base = i as usize;
        }
        i -= 1;
    }

    let mut right_base = peak;
    let mut right_min = height;
    let mut j = peak;
    while j < x.len() && x[j] <= height {
        if x[j] < right_min {
            right_min = x[j];
            right_base = j;
        }
        j += 1;
    }

    (height - left_min.max(right_min), left_base, right_base)
}

/// Width in samples at half prominence, linearly interpolated
fn width_at_half(x: &[f64], peak: usize, prominence: f64, left_base: usize, right_base: usize) -> f64 {
    let height = x[peak] - prominence * 0.5;

    let mut i = peak;
    while left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left = i as f64;
    if x[i] < height {
        left += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut j = peak;
    while j < right_base && height < x[j] {
        j += 1;
    }
    let mut right = j as f64;
    if x[j] < height {
        right -= (height - x[j]) / (x[j - 1] - x[j]);
    }

    right - left
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;
    use chrono::NaiveDate;

    fn frame(closes: &[f64]) -> Vec<FrameRow> {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| FrameRow::from_bar(Bar::new(start + chrono::Days::new(i as u64), c, c, c, c, 0.0)))
            .collect()
    }

    #[test]
    fn test_local_maxima_plateau_midpoint() {
        let x = [0.0, 1.0, 3.0, 3.0, 3.0, 1.0, 0.0];
        assert_eq!(local_maxima(&x), vec![3]);
        let even = [0.0, 2.0, 2.0, 0.0];
        assert_eq!(local_maxima(&even), vec![1]);
    }

    #[test]
    fn test_edges_are_not_peaks() {
        let x = [5.0, 1.0, 0.0, 1.0, 5.0];
        assert!(local_maxima(&x).is_empty());
    }

    #[test]
    fn test_prominence_uses_higher_base() {
        // left side dips to 0, right side only to 2 before a higher value
        let x = [0.0, 5.0, 2.0, 6.0, 0.0];
        let (prom, left, right) = prominence(&x, 1);
        assert_eq!(prom, 3.0);
        assert_eq!(left, 0);
        assert_eq!(right, 2);
    }

    #[test]
    fn test_width_interpolates() {
        let x = [0.0, 2.0, 4.0, 2.0, 0.0];
        let (prom, l, r) = prominence(&x, 2);
        assert_eq!(prom, 4.0);
        assert!((width_at_half(&x, 2, prom, l, r) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_narrow_spike_filtered_by_width() {
        let mut x = vec![1.0; 30];
        x[15] = 10.0;
        assert!(find_peaks(&x, 0.1, 3.0).is_empty());
        assert_eq!(find_peaks(&x, 0.1, 0.5), vec![15]);
    }

    #[test]
    fn test_sine_wave_extrema() {
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 + 10.0 * (i as f64 * std::f64::consts::TAU / 40.0).sin())
            .collect();
        let ex = find_extrema(&frame(&closes));
        assert_eq!(ex.peaks, vec![10, 50, 90, 130, 170]);
        assert_eq!(ex.troughs, vec![30, 70, 110, 150, 190]);
    }

    #[test]
    fn test_positions_offset_into_full_frame() {
        let closes: Vec<f64> = (0..400)
            .map(|i| 100.0 + 10.0 * (i as f64 * std::f64::consts::TAU / 40.0).sin())
            .collect();
        let ex = find_extrema(&frame(&closes));
        assert!(ex.peaks.iter().chain(&ex.troughs).all(|&i| i > 150 && i < 400));
        assert!(ex.troughs.contains(&390));
        assert!(ex.peaks.contains(&170));
    }

    #[test]
    fn test_flat_and_empty_frames() {
        assert_eq!(find_extrema(&frame(&[50.0; 260])), Extrema::default());
        assert_eq!(find_extrema(&[]), Extrema::default());
    }
}
