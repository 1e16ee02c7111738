//! # chartscan - daily-bar chart pattern screener
//!
//! Screens a universe of daily OHLCV series for bottoming and downtrend
//! shapes, 50/200 crossovers and k-means market regimes, then ranks the
//! matches.
//!
//! ## Quick Start
//!
//! ```rust
//! use chartscan::prelude::*;
//! use chrono::NaiveDate;
//!
//! let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
//! let bars: Vec<Bar> = (0..500)
//!     .map(|i| {
//!         let close = 800.0 - i as f64;
//!         Bar::new(start + chrono::Days::new(i), close, close + 1.0, close - 1.0, close, 1000.0)
//!     })
//!     .collect();
//! let series = BarSeries::new("DEMO", bars).unwrap();
//!
//! let mut frame = indicators::compute(&series);
//! RegimeClassifier::default().classify(&mut frame);
//!
//! let evaluator = Evaluator::default();
//! let conditions = evaluator.evaluate(frame.tail(250), &[20, 50, 200], true);
//! assert!(conditions.market_regime >= -1);
//! ```

pub mod cache;
pub mod chart;
pub mod detectors;
pub mod evaluate;
pub mod extrema;
pub mod indicators;
pub mod output;
pub mod regime;
pub mod screener;
pub mod store;
pub mod universe;

pub mod prelude {
    pub use crate::{
        // Pipeline stages
        cache::{CacheKey, ResultCache},
        detectors::*,
        evaluate::{DetectorSettings, Evaluator, Filter, PatternConditions, PatternReport, SymbolAnalysis, TechnicalConditions},
        extrema::{ExtremaConfig, Extrema},
        indicators::{self, FrameRow, IndicatorFrame},
        output::{EventSink, NullSink, StdoutSink},
        regime::{RegimeClassifier, RegimeConfig, UNCLASSIFIED},
        screener::{AnalyzeOutcome, AnalyzeRequest, Paths, Screener, ScreenerBuilder, ScreenerConfig},
        store::{BarSource, CsvBarStore},
        universe::SymbolRecord,
        // Core types
        Bar,
        BarSeries,
        BuiltinDetector,
        OHLCVExt,
        PatternDetector,
        PatternKind,
        PatternResult,
        PatternStatus,
        Period,
        Ratio,
        Result,
        // Errors
        ScreenError,
        OHLCV,
    };
}

use chrono::NaiveDate;

use crate::{extrema::Extrema, indicators::FrameRow};

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, ScreenError>;

/// Errors raised while loading, validating or screening bar data
#[derive(Debug, thiserror::Error)]
pub enum ScreenError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} bars, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid bar at index {index}: {reason}")]
    InvalidBar { index: usize, reason: &'static str },

    #[error("No bar file for {0}")]
    FileNotFound(String),

    #[error("Symbol universe is empty")]
    EmptyUniverse,

    #[error("Clustering failed: {0}")]
    Clustering(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl ScreenError {
    /// Code used in the `error` field of the output envelope
    pub fn code(&self) -> &'static str {
        match self {
            ScreenError::EmptyUniverse => "DATA_EMPTY",
            ScreenError::FileNotFound(_) => "FILE_NOT_FOUND",
            ScreenError::Json(_) => "JSON_SERIALIZATION_FAIL",
            ScreenError::InvalidConfig(_) | ScreenError::Pool(_) => "CONFIG_ERROR",
            _ => "ANALYSIS_FAIL",
        }
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(ScreenError::InvalidValue("Ratio cannot be NaN or infinite"));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(ScreenError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

/// Out-of-range values are rejected while deserializing detector settings
impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period in bars (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(ScreenError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core daily-bar data trait
pub trait OHLCV {
    fn date(&self) -> NaiveDate;
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    /// Validate OHLC consistency
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) {
            return Err(ScreenError::InvalidBar {
                index: 0,
                reason: "NaN in OHLC",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) {
            return Err(ScreenError::InvalidBar {
                index: 0,
                reason: "Infinite value in OHLC",
            });
        }
        if self.high() < self.low() {
            return Err(ScreenError::InvalidBar {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// BARS
// ============================================================

/// One trading day for a symbol
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Open")]
    pub open: f64,
    #[serde(rename = "High")]
    pub high: f64,
    #[serde(rename = "Low")]
    pub low: f64,
    #[serde(rename = "Close")]
    pub close: f64,
    #[serde(rename = "Volume")]
    pub volume: f64,
}

impl Bar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Bar {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Ordered daily bars of one symbol with strictly increasing dates
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    symbol: String,
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Validate and wrap bars. Rejects malformed prices and out-of-order dates.
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Result<Self> {
        for (i, bar) in bars.iter().enumerate() {
            bar.validate().map_err(|e| match e {
                ScreenError::InvalidBar { reason, .. } => ScreenError::InvalidBar { index: i, reason },
                other => other,
            })?;
        }
        if let Some(i) = bars.windows(2).position(|w| w[1].date <= w[0].date) {
            return Err(ScreenError::InvalidBar {
                index: i + 1,
                reason: "dates not strictly increasing",
            });
        }
        Ok(Self {
            symbol: symbol.into(),
            bars,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Position of the bar dated `date`
    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.bars.binary_search_by_key(&date, |b| b.date).ok()
    }
}

// ============================================================
// PATTERN RESULT
// ============================================================

/// History every pattern detector needs before it can match
pub const MIN_PATTERN_ROWS: usize = 250;

/// The chart shapes the screener knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    DoubleBottom,
    TripleBottom,
    CupAndHandle,
    HalfCup,
    LongTermDownTrend,
}

impl PatternKind {
    pub const ALL: [PatternKind; 5] = [
        PatternKind::DoubleBottom,
        PatternKind::TripleBottom,
        PatternKind::CupAndHandle,
        PatternKind::HalfCup,
        PatternKind::LongTermDownTrend,
    ];

    /// Identifier accepted by the filter parser
    pub fn filter_name(self) -> &'static str {
        match self {
            PatternKind::DoubleBottom => "double_bottom",
            PatternKind::TripleBottom => "triple_bottom",
            PatternKind::CupAndHandle => "cup_and_handle",
            PatternKind::HalfCup => "half_cup",
            PatternKind::LongTermDownTrend => "long_term_down_trend",
        }
    }

    /// Label used for chart pattern points
    pub fn chart_label(self) -> &'static str {
        match self {
            PatternKind::DoubleBottom => "DoubleBottom",
            PatternKind::TripleBottom => "TripleBottom",
            PatternKind::CupAndHandle => "CupAndHandle",
            PatternKind::HalfCup => "HalfCup",
            PatternKind::LongTermDownTrend => "LongTermDown",
        }
    }

    pub fn from_filter_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.filter_name() == name)
    }
}

/// Stage of a detected pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PatternStatus {
    #[default]
    None,
    Potential,
    Breakout,
    Downward,
}

impl PatternStatus {
    /// True for the statuses a pattern filter accepts
    #[inline]
    pub fn is_signal(self) -> bool {
        matches!(
            self,
            PatternStatus::Potential | PatternStatus::Breakout | PatternStatus::Downward
        )
    }
}

/// Outcome of one detector over one frame - Copy, never mutated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternResult {
    pub matched: bool,
    /// Neckline or peak level the pattern is measured against
    pub reference_price: Option<f64>,
    pub status: PatternStatus,
    pub score: f64,
}

impl PatternResult {
    pub const NO_MATCH: Self = Self {
        matched: false,
        reference_price: None,
        status: PatternStatus::None,
        score: 0.0,
    };

    pub fn potential(reference_price: f64, score: f64) -> Self {
        Self {
            matched: true,
            reference_price: Some(reference_price),
            status: PatternStatus::Potential,
            score,
        }
    }

    pub fn downward(reference_price: f64, score: f64) -> Self {
        Self {
            matched: true,
            reference_price: Some(reference_price),
            status: PatternStatus::Downward,
            score,
        }
    }
}

impl Default for PatternResult {
    fn default() -> Self {
        Self::NO_MATCH
    }
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

/// Stateless pattern detector over an indicator frame and its extrema
pub trait PatternDetector: Send + Sync {
    fn kind(&self) -> PatternKind;

    fn min_rows(&self) -> usize {
        MIN_PATTERN_ROWS
    }

    /// Total function: data conditions never error, they produce `NO_MATCH`
    fn detect(&self, rows: &[FrameRow], extrema: &Extrema) -> PatternResult;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - enum dispatch, evaluated in declaration order
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            #[inline]
            pub fn detect(&self, rows: &[FrameRow], extrema: &Extrema) -> PatternResult {
                if rows.len() < self.min_rows() {
                    return PatternResult::NO_MATCH;
                }
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, rows, extrema)),*
                }
            }

            #[inline]
            pub fn kind(&self) -> PatternKind {
                match self {
                    $(Self::$variant(d) => PatternDetector::kind(d)),*
                }
            }

            #[inline]
            pub fn min_rows(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::min_rows(d)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }

            /// Every builtin detector with default configuration
            pub fn all_defaults() -> Vec<Self> {
                vec![$(Self::$variant(<$detector>::default())),*]
            }
        }
    };
}

define_builtin_detectors! {
    DoubleBottom(DoubleBottomDetector),
    TripleBottom(TripleBottomDetector),
    CupAndHandle(CupAndHandleDetector),
    HalfCup(HalfCupDetector),
    LongTermDownTrend(LongTermDownTrendDetector),
}

// ============================================================
// TESTS
// ============================================================
