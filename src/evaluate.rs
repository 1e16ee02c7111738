//! Per-symbol technical conditions and filter matching

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    detectors::{
        CupAndHandleDetector, DoubleBottomDetector, HalfCupDetector, LongTermDownTrendDetector,
        TripleBottomDetector,
    },
    extrema::{Extrema, ExtremaConfig},
    indicators::FrameRow,
    regime::UNCLASSIFIED,
    BuiltinDetector, PatternKind, PatternResult, PatternStatus, Result, ScreenError, OHLCV,
};

/// Periods with an SMA column; others always report `false`
pub const TRACKED_MA_PERIODS: [usize; 3] = [20, 50, 200];
/// Rows needed for crossover and pattern evaluation
pub const MIN_CONDITION_ROWS: usize = 200;

#[inline]
fn is_tracked(period: usize) -> bool {
    TRACKED_MA_PERIODS.contains(&period)
}

// ============================================================
// PATTERN REPORT
// ============================================================

/// Detector results in evaluation order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternReport {
    entries: Vec<(PatternKind, PatternResult)>,
}

impl PatternReport {
    /// Result for `kind`, `NO_MATCH` when it was not evaluated
    pub fn get(&self, kind: PatternKind) -> PatternResult {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(PatternResult::NO_MATCH, |(_, r)| *r)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(PatternKind, PatternResult)> {
        self.entries.iter()
    }
}

/// Flattened pattern fields of [`TechnicalConditions`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternConditions {
    pub pattern_double_bottom_status: PatternStatus,
    pub db_neckline_price: f64,
    pub pattern_triple_bottom_status: PatternStatus,
    pub pattern_cup_and_handle_status: PatternStatus,
    pub ch_neckline_price: f64,
    pub pattern_half_cup_status: PatternStatus,
    pub hc_l_score: f64,
    pub pattern_long_term_down_trend_status: PatternStatus,
    pub ltd_score: f64,
    #[serde(skip)]
    pub report: PatternReport,
}

impl PatternConditions {
    pub fn from_report(report: PatternReport) -> Self {
        Self {
            pattern_double_bottom_status: report.get(PatternKind::DoubleBottom).status,
            db_neckline_price: report.get(PatternKind::DoubleBottom).score,
            pattern_triple_bottom_status: report.get(PatternKind::TripleBottom).status,
            pattern_cup_and_handle_status: report.get(PatternKind::CupAndHandle).status,
            ch_neckline_price: report.get(PatternKind::CupAndHandle).score,
            pattern_half_cup_status: report.get(PatternKind::HalfCup).status,
            hc_l_score: report.get(PatternKind::HalfCup).score,
            pattern_long_term_down_trend_status: report.get(PatternKind::LongTermDownTrend).status,
            ltd_score: report.get(PatternKind::LongTermDownTrend).score,
            report,
        }
    }

    pub fn status(&self, kind: PatternKind) -> PatternStatus {
        self.report.get(kind).status
    }
}

// ============================================================
// TECHNICAL CONDITIONS
// ============================================================

/// Everything reported about one symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicalConditions {
    /// `above_ma<p>` in request order
    #[serde(flatten)]
    pub above_ma: IndexMap<String, bool>,
    pub goldencross_50_200_detected: bool,
    pub deadcross_50_200_detected: bool,
    #[serde(flatten)]
    pub patterns: Option<PatternConditions>,
    pub market_regime: i32,
}

impl TechnicalConditions {
    pub fn above_ma(&self, period: usize) -> bool {
        self.above_ma
            .get(&format!("above_ma{period}"))
            .copied()
            .unwrap_or(false)
    }

    pub fn pattern_status(&self, kind: PatternKind) -> Option<PatternStatus> {
        self.patterns.as_ref().map(|p| p.status(kind))
    }
}

/// Golden and dead 50/200 crosses on the last two rows
pub fn crossover(rows: &[FrameRow]) -> (bool, bool) {
    if rows.len() < MIN_CONDITION_ROWS {
        return (false, false);
    }
    let (prev, curr) = (&rows[rows.len() - 2], &rows[rows.len() - 1]);
    let golden = prev.sma50 < prev.sma200 && curr.sma50 > curr.sma200;
    let dead = prev.sma50 > prev.sma200 && curr.sma50 < curr.sma200;
    (golden, dead)
}

// ============================================================
// EVALUATOR
// ============================================================

/// Per-detector overrides, keyed by filter name. Omitted detectors and
/// fields keep their defaults.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorSettings {
    pub double_bottom: DoubleBottomDetector,
    pub triple_bottom: TripleBottomDetector,
    pub cup_and_handle: CupAndHandleDetector,
    pub half_cup: HalfCupDetector,
    pub long_term_down_trend: LongTermDownTrendDetector,
}

impl DetectorSettings {
    /// Read settings from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ScreenError::FileNotFound(path.display().to_string()),
            _ => ScreenError::Io(e),
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ScreenError::InvalidConfig(format!("detector settings {}: {e}", path.display()))
        })
    }
}

/// Runs the detector list and condition checks over an analysis frame
#[derive(Debug, Clone)]
pub struct Evaluator {
    detectors: Vec<BuiltinDetector>,
    extrema: ExtremaConfig,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self {
            detectors: BuiltinDetector::all_defaults(),
            extrema: ExtremaConfig::default(),
        }
    }
}

impl Evaluator {
    pub fn new(detectors: Vec<BuiltinDetector>, extrema: ExtremaConfig) -> Result<Self> {
        for d in &detectors {
            d.validate_config()?;
        }
        Ok(Self { detectors, extrema })
    }

    /// Detectors configured from `settings`, in builtin order
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        Self::new(
            vec![
                BuiltinDetector::DoubleBottom(settings.double_bottom),
                BuiltinDetector::TripleBottom(settings.triple_bottom),
                BuiltinDetector::CupAndHandle(settings.cup_and_handle),
                BuiltinDetector::HalfCup(settings.half_cup),
                BuiltinDetector::LongTermDownTrend(settings.long_term_down_trend),
            ],
            ExtremaConfig::default(),
        )
    }

    pub fn detectors(&self) -> &[BuiltinDetector] {
        &self.detectors
    }

    pub fn extrema(&self, rows: &[FrameRow]) -> Extrema {
        self.extrema.find(rows)
    }

    /// Every detector over `rows`, in list order
    pub fn detect_patterns(&self, rows: &[FrameRow]) -> PatternReport {
        let extrema = self.extrema(rows);
        PatternReport {
            entries: self
                .detectors
                .iter()
                .map(|d| (d.kind(), d.detect(rows, &extrema)))
                .collect(),
        }
    }

    pub fn evaluate(&self, rows: &[FrameRow], periods: &[usize], analyze_patterns: bool) -> TechnicalConditions {
        let last = rows.last();

        let above_ma = periods
            .iter()
            .map(|&p| {
                let above = match (last, is_tracked(p)) {
                    (Some(row), true) => row.sma(p).is_some_and(|sma| row.close() > sma),
                    _ => false,
                };
                (format!("above_ma{p}"), above)
            })
            .collect();

        let (golden, dead) = crossover(rows);

        let patterns = (analyze_patterns && rows.len() >= MIN_CONDITION_ROWS)
            .then(|| PatternConditions::from_report(self.detect_patterns(rows)));

        TechnicalConditions {
            above_ma,
            goldencross_50_200_detected: golden,
            deadcross_50_200_detected: dead,
            patterns,
            market_regime: last.map_or(UNCLASSIFIED, |r| r.regime),
        }
    }
}

// ============================================================
// FILTER
// ============================================================

/// Parsed filter identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    AboveMa,
    AllBelowMa,
    GoldenCross,
    DeadCross,
    Pattern(PatternKind),
    /// `None` when the label after `regime:` is not an integer
    Regime(Option<i32>),
    Unrecognized(String),
}

impl Filter {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "ma" => Filter::AboveMa,
            "all_below_ma" => Filter::AllBelowMa,
            "goldencross" => Filter::GoldenCross,
            "deadcross" => Filter::DeadCross,
            _ if raw.starts_with("regime:") => {
                Filter::Regime(raw.split(':').nth(1).and_then(|s| s.trim().parse().ok()))
            }
            _ => PatternKind::from_filter_name(raw)
                .map_or_else(|| Filter::Unrecognized(raw.to_string()), Filter::Pattern),
        }
    }

    /// Whether this filter forces pattern analysis on
    pub fn requires_patterns(&self) -> bool {
        !matches!(self, Filter::AboveMa | Filter::AllBelowMa | Filter::Regime(_))
    }

    pub fn matches(&self, conditions: &TechnicalConditions, rows: &[FrameRow], periods: &[usize]) -> bool {
        match self {
            Filter::AboveMa => periods
                .iter()
                .filter(|&&p| is_tracked(p))
                .all(|&p| conditions.above_ma(p)),
            Filter::AllBelowMa => {
                let Some(last) = rows.last() else {
                    return false;
                };
                periods
                    .iter()
                    .filter(|&&p| is_tracked(p))
                    .all(|&p| last.sma(p).is_some_and(|sma| last.close() < sma))
            }
            Filter::GoldenCross => conditions.goldencross_50_200_detected,
            Filter::DeadCross => conditions.deadcross_50_200_detected,
            Filter::Pattern(kind) => conditions
                .pattern_status(*kind)
                .is_some_and(PatternStatus::is_signal),
            Filter::Regime(Some(label)) => conditions.market_regime == *label,
            Filter::Regime(None) | Filter::Unrecognized(_) => false,
        }
    }

    /// Ranking key for a symbol that passed this filter
    pub fn sort_score(&self, conditions: &TechnicalConditions) -> f64 {
        let patterns = conditions.patterns.as_ref();
        match self {
            Filter::Pattern(PatternKind::HalfCup) => patterns.map_or(0.0, |p| p.hc_l_score),
            Filter::Pattern(PatternKind::LongTermDownTrend) => patterns.map_or(0.0, |p| p.ltd_score),
            _ => f64::from(conditions.market_regime),
        }
    }
}

// ============================================================
// SYMBOL RESULT
// ============================================================

/// One ranked entry of a screening run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolAnalysis {
    pub ticker: String,
    pub name: Option<String>,
    pub technical_conditions: TechnicalConditions,
    #[serde(skip)]
    pub sort_score: f64,
}
