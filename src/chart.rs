//! Chart export for a single symbol

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;

use crate::{
    evaluate::Evaluator,
    indicators::{rolling_mean_partial, IndicatorFrame},
    output::CHART_MODE,
    PatternStatus, Result, ScreenError, OHLCV,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OhlcvPoint {
    pub x: NaiveDate,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: NaiveDate,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternPoint {
    pub x: NaiveDate,
    pub y: f64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub status: PatternStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub ticker: String,
    pub name: String,
    pub mode: &'static str,
    pub ohlcv_data: Vec<OhlcvPoint>,
    pub ma_data: IndexMap<String, Vec<Point>>,
    pub macd_data: IndexMap<String, Vec<Point>>,
    pub pattern_points: Vec<PatternPoint>,
}

fn series(dates: &[NaiveDate], values: impl IntoIterator<Item = f64>) -> Vec<Point> {
    dates
        .iter()
        .zip(values)
        .filter(|(_, y)| !y.is_nan())
        .map(|(&x, y)| Point { x, y })
        .collect()
}

/// Chart payload over the trailing `chart_period` rows (all rows when 0).
/// Pattern points come from the detectors run over the whole frame.
pub fn build(
    ticker: &str,
    name: String,
    frame: &IndicatorFrame,
    evaluator: &Evaluator,
    ma_periods: &[usize],
    chart_period: usize,
) -> Result<ChartData> {
    let Some(last) = frame.last() else {
        return Err(ScreenError::InsufficientData {
            need: crate::indicators::LONGEST_WINDOW,
            got: 0,
        });
    };

    let window = if chart_period == 0 {
        frame.rows()
    } else {
        frame.tail(chart_period)
    };
    let dates: Vec<NaiveDate> = window.iter().map(|r| r.date()).collect();
    let closes: Vec<f64> = window.iter().map(|r| r.close()).collect();

    let ohlcv_data = window
        .iter()
        .map(|r| OhlcvPoint {
            x: r.date(),
            o: r.open(),
            h: r.high(),
            l: r.low(),
            c: r.close(),
            v: r.volume(),
        })
        .collect();

    let ma_data = ma_periods
        .iter()
        .map(|&p| {
            let values: Vec<f64> = match window.first().and_then(|r| r.sma(p)) {
                Some(_) => window.iter().filter_map(|r| r.sma(p)).collect(),
                None => rolling_mean_partial(&closes, p),
            };
            (format!("MA{p}"), series(&dates, values))
        })
        .collect();

    let mut macd_data = IndexMap::new();
    macd_data.insert("MACD".to_string(), series(&dates, window.iter().map(|r| r.macd)));
    macd_data.insert("Signal".to_string(), series(&dates, window.iter().map(|r| r.macd_signal)));
    macd_data.insert("Histogram".to_string(), series(&dates, window.iter().map(|r| r.macd_hist)));

    let pattern_points = evaluator
        .detect_patterns(frame.rows())
        .iter()
        .filter_map(|(kind, result)| {
            let y = result.reference_price.filter(|p| *p != 0.0)?;
            Some(PatternPoint {
                x: last.date(),
                y,
                kind: kind.chart_label(),
                status: result.status,
            })
        })
        .collect();

    Ok(ChartData {
        ticker: ticker.to_string(),
        name,
        mode: CHART_MODE,
        ohlcv_data,
        ma_data,
        macd_data,
        pattern_points,
    })
}
