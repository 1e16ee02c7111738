//! Market regime labelling
//!
//! Standardizes five indicator features per row and clusters them with
//! seeded k-means (k-means++ greedy initialisation, several restarts, best
//! inertia wins). The whole frame falls back to [`UNCLASSIFIED`] whenever
//! clustering is not meaningful.

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use crate::{indicators::FrameRow, indicators::IndicatorFrame, Result, ScreenError};

/// Label for rows that could not be clustered
pub const UNCLASSIFIED: i32 = -1;
/// Rows a frame needs before it is clustered at all
pub const MIN_REGIME_ROWS: usize = 200;

const FEATURES: usize = 5;
type Point = [f64; FEATURES];

/// K-means settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeConfig {
    pub clusters: usize,
    pub seed: u64,
    pub restarts: usize,
    pub max_iterations: usize,
    /// Relative to the mean per-feature variance of the scaled data
    pub tolerance: f64,
    pub min_rows: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            clusters: 4,
            seed: 42,
            restarts: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            min_rows: MIN_REGIME_ROWS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Result<Self> {
        if config.clusters == 0 {
            return Err(ScreenError::InvalidConfig("regime clusters must be > 0".into()));
        }
        if config.restarts == 0 || config.max_iterations == 0 {
            return Err(ScreenError::InvalidConfig(
                "regime restarts and iterations must be > 0".into(),
            ));
        }
        if !(config.tolerance >= 0.0) {
            return Err(ScreenError::InvalidConfig("regime tolerance must be >= 0".into()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Write a label into every row of `frame`
    pub fn classify(&self, frame: &mut IndicatorFrame) {
        let labels = self.labels(frame.rows());
        for (row, label) in frame.rows_mut().iter_mut().zip(labels) {
            row.regime = label;
        }
    }

    /// One label per row, all [`UNCLASSIFIED`] when clustering does not apply
    pub fn labels(&self, rows: &[FrameRow]) -> Vec<i32> {
        let unclassified = vec![UNCLASSIFIED; rows.len()];
        if rows.len() < self.config.min_rows {
            return unclassified;
        }

        let raw: Vec<Point> = rows.iter().map(features).collect();
        if raw.iter().flatten().any(|v| !v.is_finite()) {
            debug!(rows = rows.len(), "regime features incomplete");
            return unclassified;
        }
        if distinct_points(&raw) < self.config.clusters {
            debug!(rows = rows.len(), "too few distinct feature vectors for regimes");
            return unclassified;
        }

        match self.cluster(&raw) {
            Ok(labels) => labels.into_iter().map(|l| l as i32).collect(),
            Err(e) => {
                debug!(error = %e, "regime clustering failed");
                unclassified
            }
        }
    }

    fn cluster(&self, raw: &[Point]) -> Result<Vec<usize>> {
        let data = standardize(raw);
        let k = self.config.clusters;
        let tolerance = self.config.tolerance * mean_variance(&data);
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut best: Option<(Vec<usize>, f64)> = None;
        for _ in 0..self.config.restarts {
            let centers = init_centers(&data, k, &mut rng);
            let (labels, inertia) = lloyd(&data, centers, self.config.max_iterations, tolerance);
            if !inertia.is_finite() {
                return Err(ScreenError::Clustering("non-finite inertia"));
            }
            if best.as_ref().map_or(true, |(_, b)| inertia < *b) {
                best = Some((labels, inertia));
            }
        }
        best.map(|(labels, _)| labels)
            .ok_or(ScreenError::Clustering("no restart completed"))
    }
}

fn features(row: &FrameRow) -> Point {
    [
        row.rsi,
        row.macd,
        row.bb_width,
        if row.trend_cross { 1.0 } else { 0.0 },
        row.log_return,
    ]
}

fn distinct_points(points: &[Point]) -> usize {
    let mut keys: Vec<[u64; FEATURES]> = points
        .iter()
        .map(|p| p.map(|v| if v == 0.0 { 0u64 } else { v.to_bits() }))
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys.len()
}

/// Z-score each feature with population std; constant features keep scale 1
fn standardize(raw: &[Point]) -> Vec<Point> {
    let n = raw.len() as f64;
    let mut mean = [0.0; FEATURES];
    let mut scale = [1.0; FEATURES];
    for j in 0..FEATURES {
        mean[j] = raw.iter().map(|p| p[j]).sum::<f64>() / n;
        let var = raw.iter().map(|p| (p[j] - mean[j]).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        if std > 0.0 {
            scale[j] = std;
        }
    }
    raw.iter()
        .map(|p| std::array::from_fn(|j| (p[j] - mean[j]) / scale[j]))
        .collect()
}

fn mean_variance(data: &[Point]) -> f64 {
    let n = data.len() as f64;
    let total: f64 = (0..FEATURES)
        .map(|j| {
            let mean = data.iter().map(|p| p[j]).sum::<f64>() / n;
            data.iter().map(|p| (p[j] - mean).powi(2)).sum::<f64>() / n
        })
        .sum();
    total / FEATURES as f64
}

#[inline]
fn sq_dist(a: &Point, b: &Point) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Greedy k-means++: each new center is the best of several sampled candidates
fn init_centers(data: &[Point], k: usize, rng: &mut StdRng) -> Vec<Point> {
    let n = data.len();
    let trials = 2 + (k as f64).ln().floor() as usize;

    let mut centers = vec![data[rng.gen_range(0..n)]];
    let mut closest: Vec<f64> = data.iter().map(|p| sq_dist(p, &centers[0])).collect();
    let mut potential: f64 = closest.iter().sum();

    while centers.len() < k {
        let mut best: Option<(usize, f64, Vec<f64>)> = None;
        for _ in 0..trials {
            let candidate = if potential > 0.0 {
                sample_weighted(&closest, rng.gen::<f64>() * potential)
            } else {
                rng.gen_range(0..n)
            };
            let updated: Vec<f64> = closest
                .iter()
                .zip(data)
                .map(|(d, p)| d.min(sq_dist(p, &data[candidate])))
                .collect();
            let candidate_potential: f64 = updated.iter().sum();
            if best.as_ref().map_or(true, |(_, b, _)| candidate_potential < *b) {
                best = Some((candidate, candidate_potential, updated));
            }
        }
        let Some((index, new_potential, updated)) = best else {
            break;
        };
        centers.push(data[index]);
        closest = updated;
        potential = new_potential;
    }
    centers
}

fn sample_weighted(weights: &[f64], target: f64) -> usize {
    let mut acc = 0.0;
    for (i, w) in weights.iter().enumerate() {
        acc += w;
        if acc > target {
            return i;
        }
    }
    weights.len() - 1
}

fn assign(data: &[Point], centers: &[Point]) -> (Vec<usize>, Vec<f64>) {
    data.iter()
        .map(|p| {
            centers
                .iter()
                .enumerate()
                .map(|(c, center)| (c, sq_dist(p, center)))
                .fold((0, f64::INFINITY), |acc, cur| if cur.1 < acc.1 { cur } else { acc })
        })
        .unzip()
}

/// Lloyd iterations until center shift falls within `tolerance`
fn lloyd(data: &[Point], mut centers: Vec<Point>, max_iterations: usize, tolerance: f64) -> (Vec<usize>, f64) {
    let k = centers.len();
    for _ in 0..max_iterations {
        let (labels, distances) = assign(data, &centers);

        let mut sums = vec![[0.0; FEATURES]; k];
        let mut counts = vec![0usize; k];
        for (p, &l) in data.iter().zip(&labels) {
            counts[l] += 1;
            for j in 0..FEATURES {
                sums[l][j] += p[j];
            }
        }

        let mut next: Vec<Point> = (0..k)
            .map(|c| {
                if counts[c] == 0 {
                    centers[c]
                } else {
                    sums[c].map(|s| s / counts[c] as f64)
                }
            })
            .collect();

        // Empty clusters take over the points farthest from their centers
        let mut order: Vec<usize> = (0..data.len()).collect();
        order.sort_by(|&a, &b| distances[b].total_cmp(&distances[a]));
        let mut far = order.into_iter();
        for c in (0..k).filter(|&c| counts[c] == 0) {
            if let Some(i) = far.next() {
                next[c] = data[i];
            }
        }

        let shift: f64 = centers.iter().zip(&next).map(|(a, b)| sq_dist(a, b)).sum();
        centers = next;
        if shift <= tolerance {
            break;
        }
    }

    let (labels, distances) = assign(data, &centers);
    (labels, distances.iter().sum())
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;
    use chrono::NaiveDate;

    fn rows(n: usize, f: impl Fn(usize) -> (f64, f64, f64, bool, f64)) -> Vec<FrameRow> {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let (rsi, macd, width, cross, lr) = f(i);
                FrameRow {
                    rsi,
                    macd,
                    bb_width: width,
                    trend_cross: cross,
                    log_return: lr,
                    ..FrameRow::from_bar(Bar::new(start + chrono::Days::new(i as u64), 1.0, 1.0, 1.0, 1.0, 0.0))
                }
            })
            .collect()
    }

    fn varied(i: usize) -> (f64, f64, f64, bool, f64) {
        let x = i as f64;
        (
            50.0 + 30.0 * (x * 0.07).sin(),
            (x * 0.11).cos(),
            5.0 + 3.0 * (x * 0.05).sin(),
            (i / 40) % 2 == 0,
            0.01 * (x * 0.3).sin(),
        )
    }

    #[test]
    fn test_short_frame_unclassified() {
        let r = rows(150, varied);
        let labels = RegimeClassifier::default().labels(&r);
        assert!(labels.iter().all(|&l| l == UNCLASSIFIED));
    }

    #[test]
    fn test_constant_features_unclassified() {
        let r = rows(300, |_| (50.0, 0.0, 1.0, false, 0.0));
        let labels = RegimeClassifier::default().labels(&r);
        assert!(labels.iter().all(|&l| l == UNCLASSIFIED));
    }

    #[test]
    fn test_fewer_distinct_than_k_unclassified() {
        let r = rows(300, |i| ((i % 3) as f64, 0.0, 1.0, false, 0.0));
        let labels = RegimeClassifier::default().labels(&r);
        assert!(labels.iter().all(|&l| l == UNCLASSIFIED));
    }

    #[test]
    fn test_missing_feature_unclassified() {
        let mut r = rows(300, varied);
        r[10].macd = f64::NAN;
        let labels = RegimeClassifier::default().labels(&r);
        assert!(labels.iter().all(|&l| l == UNCLASSIFIED));
    }

    #[test]
    fn test_labels_in_range_and_deterministic() {
        let r = rows(320, varied);
        let classifier = RegimeClassifier::default();
        let a = classifier.labels(&r);
        let b = classifier.labels(&r);
        assert_eq!(a, b);
        assert!(a.iter().all(|&l| (0..4).contains(&l)));
    }

    #[test]
    fn test_separated_groups_get_distinct_labels() {
        let centers = [(10.0, -2.0), (90.0, 2.0), (50.0, 0.0), (30.0, 5.0)];
        let r = rows(400, |i| {
            let (rsi, macd) = centers[i % 4];
            let jitter = (i as f64) * 1e-4;
            (rsi + jitter, macd, 2.0, false, 0.0)
        });
        let labels = RegimeClassifier::default().labels(&r);
        for g in 0..4 {
            let first = labels[g];
            assert!(labels.iter().skip(g).step_by(4).all(|&l| l == first));
        }
        let mut distinct = labels[..4].to_vec();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn test_classify_writes_rows() {
        let mut frame = IndicatorFrame::from_rows(rows(300, varied));
        RegimeClassifier::default().classify(&mut frame);
        assert!(frame.rows().iter().all(|r| r.regime >= 0));
    }

    #[test]
    fn test_invalid_config() {
        let config = RegimeConfig {
            clusters: 0,
            ..RegimeConfig::default()
        };
        assert!(RegimeClassifier::new(config).is_err());
    }
}
