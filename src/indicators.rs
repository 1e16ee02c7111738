//! Indicator pipeline
//!
//! Derives RSI, MACD, Bollinger band width, simple moving averages and log
//! returns from a bar series, then drops the warm-up rows that lack any of
//! the required columns.

use chrono::NaiveDate;

use crate::{regime::UNCLASSIFIED, Bar, BarSeries, OHLCV};

// ============================================================
// WINDOWS
// ============================================================

pub const RSI_WINDOW: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BOLLINGER_WINDOW: usize = 20;
pub const BOLLINGER_DEVIATIONS: f64 = 2.0;
/// Moving averages carried as frame columns
pub const FRAME_MA_PERIODS: [usize; 3] = [20, 50, 200];
/// Longest warm-up window; frames built from fewer bars are empty
pub const LONGEST_WINDOW: usize = 200;

// ============================================================
// FRAME
// ============================================================

/// One bar with its derived columns. Undefined optional columns hold NaN.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct FrameRow {
    pub bar: Bar,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub bb_width: f64,
    pub sma20: f64,
    pub sma50: f64,
    pub sma200: f64,
    pub log_return: f64,
    /// SMA50 above SMA200
    pub trend_cross: bool,
    pub regime: i32,
}

impl FrameRow {
    /// Row with every derived column undefined
    pub fn from_bar(bar: Bar) -> Self {
        Self {
            bar,
            rsi: f64::NAN,
            macd: f64::NAN,
            macd_signal: f64::NAN,
            macd_hist: f64::NAN,
            bb_width: f64::NAN,
            sma20: f64::NAN,
            sma50: f64::NAN,
            sma200: f64::NAN,
            log_return: f64::NAN,
            trend_cross: false,
            regime: UNCLASSIFIED,
        }
    }

    /// Frame SMA column for `period`, if it is one of [`FRAME_MA_PERIODS`]
    pub fn sma(&self, period: usize) -> Option<f64> {
        match period {
            20 => Some(self.sma20),
            50 => Some(self.sma50),
            200 => Some(self.sma200),
            _ => None,
        }
    }
}

impl OHLCV for FrameRow {
    fn date(&self) -> NaiveDate {
        self.bar.date
    }

    fn open(&self) -> f64 {
        self.bar.open
    }

    fn high(&self) -> f64 {
        self.bar.high
    }

    fn low(&self) -> f64 {
        self.bar.low
    }

    fn close(&self) -> f64 {
        self.bar.close
    }

    fn volume(&self) -> f64 {
        self.bar.volume
    }
}

/// Analysis-ready rows of one symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorFrame {
    rows: Vec<FrameRow>,
}

impl IndicatorFrame {
    pub fn from_rows(rows: Vec<FrameRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FrameRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [FrameRow] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&FrameRow> {
        self.rows.last()
    }

    /// Trailing `n` rows, or the whole frame when shorter
    pub fn tail(&self, n: usize) -> &[FrameRow] {
        &self.rows[self.rows.len().saturating_sub(n)..]
    }
}

// ============================================================
// PIPELINE
// ============================================================

pub fn compute(series: &BarSeries) -> IndicatorFrame {
    compute_bars(series.bars())
}

/// Derive every indicator column and keep the rows where all are defined
pub fn compute_bars(bars: &[Bar]) -> IndicatorFrame {
    let close: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let rsi = rsi(&close, RSI_WINDOW);
    let (macd_line, macd_signal, macd_hist) = macd(&close, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let bb_width = bollinger_width(&close, BOLLINGER_WINDOW, BOLLINGER_DEVIATIONS);
    let sma20 = sma(&close, 20);
    let sma50 = sma(&close, 50);
    let sma200 = sma(&close, 200);
    let log_return = log_returns(&close);

    let rows = bars
        .iter()
        .enumerate()
        .filter_map(|(i, bar)| {
            let (Some(rsi), Some(macd), Some(width), Some(s200), Some(lr)) =
                (rsi[i], macd_line[i], bb_width[i], sma200[i], log_return[i])
            else {
                return None;
            };
            let trend_cross = matches!((sma50[i], sma200[i]), (Some(a), Some(b)) if a > b);
            Some(FrameRow {
                rsi,
                macd,
                macd_signal: macd_signal[i].unwrap_or(f64::NAN),
                macd_hist: macd_hist[i].unwrap_or(f64::NAN),
                bb_width: width,
                sma20: sma20[i].unwrap_or(f64::NAN),
                sma50: sma50[i].unwrap_or(f64::NAN),
                sma200: s200,
                log_return: lr,
                trend_cross,
                ..FrameRow::from_bar(*bar)
            })
        })
        .collect();

    IndicatorFrame { rows }
}

// ============================================================
// SERIES PRIMITIVES
// ============================================================

#[inline]
fn defined(v: f64) -> Option<f64> {
    (!v.is_nan()).then_some(v)
}

/// Simple moving average, defined once a full window is available
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            defined(slice.iter().sum::<f64>() / window as f64)
        })
        .collect()
}

/// Rolling mean over whatever part of the window is available
pub fn rolling_mean_partial(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let slice = &values[(i + 1).saturating_sub(window)..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Rolling population standard deviation with a full window
fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let mean = slice.iter().sum::<f64>() / window as f64;
            let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window as f64;
            defined(var.sqrt())
        })
        .collect()
}

/// Recursive exponential average `y = y_prev + alpha * (x - y_prev)` seeded
/// with the first defined input, reported once `min_periods` inputs were seen
pub fn ewm(values: &[Option<f64>], alpha: f64, min_periods: usize) -> Vec<Option<f64>> {
    let mut state: Option<f64> = None;
    let mut seen = 0usize;
    values
        .iter()
        .map(|v| {
            if let Some(x) = v {
                state = Some(match state {
                    Some(s) => s + alpha * (x - s),
                    None => *x,
                });
                seen += 1;
            }
            if seen >= min_periods {
                state
            } else {
                None
            }
        })
        .collect()
}

/// Span-based EMA (`alpha = 2 / (span + 1)`)
pub fn ema(values: &[f64], span: usize) -> Vec<Option<f64>> {
    let input: Vec<Option<f64>> = values.iter().copied().map(defined).collect();
    ewm(&input, 2.0 / (span as f64 + 1.0), span)
}

/// Wilder RSI
pub fn rsi(close: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut up = Vec::with_capacity(close.len());
    let mut down = Vec::with_capacity(close.len());
    for i in 0..close.len() {
        let diff = if i == 0 { 0.0 } else { close[i] - close[i - 1] };
        up.push(Some(diff.max(0.0)));
        down.push(Some((-diff).max(0.0)));
    }
    let alpha = 1.0 / window as f64;
    let up = ewm(&up, alpha, window);
    let down = ewm(&down, alpha, window);
    up.into_iter()
        .zip(down)
        .map(|pair| match pair {
            (Some(_), Some(d)) if d == 0.0 => Some(100.0),
            (Some(u), Some(d)) => defined(100.0 - 100.0 / (1.0 + u / d)),
            _ => None,
        })
        .collect()
}

/// MACD line, signal line and histogram
pub fn macd(
    close: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let fast = ema(close, fast);
    let slow = ema(close, slow);
    let line: Vec<Option<f64>> = fast
        .iter()
        .zip(&slow)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal_line = ewm(&line, 2.0 / (signal as f64 + 1.0), signal);
    let hist = line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();
    (line, signal_line, hist)
}

/// Bollinger band width as a percentage of the middle band
pub fn bollinger_width(close: &[f64], window: usize, deviations: f64) -> Vec<Option<f64>> {
    let mid = sma(close, window);
    let std = rolling_std(close, window);
    mid.into_iter()
        .zip(std)
        .map(|(m, s)| {
            let (m, s) = (m?, s?);
            let upper = m + deviations * s;
            let lower = m - deviations * s;
            defined((upper - lower) / m * 100.0)
        })
        .collect()
}

/// Natural log of consecutive close ratios
pub fn log_returns(close: &[f64]) -> Vec<Option<f64>> {
    (0..close.len())
        .map(|i| {
            if i == 0 {
                None
            } else {
                defined((close[i] / close[i - 1]).ln())
            }
        })
        .collect()
}

// ============================================================
// TESTS
// ============================================================
