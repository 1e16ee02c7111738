//! End-to-end screening runs over a temporary working directory.

use std::sync::Mutex;

use chartscan::prelude::*;
use chrono::NaiveDate;
use serde_json::Value;

/// Records every progress event
#[derive(Default)]
struct Recorder(Mutex<Vec<f64>>);

impl EventSink for Recorder {
    fn progress(&self, percent: f64) {
        self.0.lock().unwrap().push(percent);
    }
}

impl Recorder {
    fn events(&self) -> Vec<f64> {
        self.0.lock().unwrap().clone()
    }
}

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

fn series(symbol: &str, n: usize, close: impl Fn(usize) -> f64) -> BarSeries {
    let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
    let bars = (0..n)
        .map(|i| {
            let c = close(i);
            Bar::new(start + chrono::Days::new(i as u64), c, c + 1.0, c - 1.0, c, 5000.0)
        })
        .collect();
    BarSeries::new(symbol, bars).unwrap()
}

/// DOWN: steady decline, UP: steady rise, FLAT: constant, SHORT: too little history,
/// GONE: listed without a bar file
fn fixture() -> (tempfile::TempDir, Screener) {
    let dir = tempfile::tempdir().unwrap();
    let screener = ScreenerBuilder::new(dir.path())
        .workers(3)
        .as_of(as_of())
        .build()
        .unwrap();

    let store = CsvBarStore::new(&screener.config().paths.data_dir);
    store.write(&series("DOWN", 500, |i| 797.5 - i as f64)).unwrap();
    store.write(&series("UP", 500, |i| 100.0 + i as f64 * 0.5)).unwrap();
    store.write(&series("FLAT", 500, |_| 100.0)).unwrap();
    store.write(&series("SHORT", 100, |i| 50.0 + i as f64)).unwrap();

    std::fs::write(
        &screener.config().paths.listing_file,
        r#"[
            {"Code": "DOWN", "Name": "Downhill Corp"},
            {"Code": "UP", "Name": "Uphill Inc"},
            {"code": "FLAT", "name": "Flatline"},
            {"Code": "SHORT", "Name": "Newly Listed"},
            {"Code": "GONE", "Name": "Delisted"}
        ]"#,
    )
    .unwrap();

    (dir, screener)
}

fn tickers(outcome: &AnalyzeOutcome) -> Vec<String> {
    let body: Value = serde_json::from_str(outcome.body()).unwrap();
    body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["ticker"].as_str().unwrap().to_string())
        .collect()
}

fn cache_files(screener: &Screener) -> Vec<String> {
    std::fs::read_dir(screener.cache().dir())
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".json"))
        .collect()
}

#[test]
fn test_downtrend_filter_and_progress() {
    let (_dir, screener) = fixture();
    let recorder = Recorder::default();
    let request = AnalyzeRequest {
        filter: Some("long_term_down_trend".into()),
        ..AnalyzeRequest::default()
    };

    let outcome = screener.analyze(&request, &recorder).unwrap();
    assert!(!outcome.is_cached());
    assert_eq!(tickers(&outcome), ["DOWN"]);

    let AnalyzeOutcome::Fresh { results, .. } = &outcome else {
        panic!("expected a fresh run");
    };
    let patterns = results[0].technical_conditions.patterns.as_ref().unwrap();
    assert!((patterns.ltd_score - 25.0).abs() < 1e-9);
    assert_eq!(results[0].name.as_deref(), Some("Downhill Corp"));

    let events = recorder.events();
    assert_eq!(events.len(), 5);
    assert_eq!(events.last().copied(), Some(100.0));
    assert!(events.windows(2).all(|w| w[0] < w[1]));

    let body: Value = serde_json::from_str(outcome.body()).unwrap();
    assert_eq!(body["mode"], "analyze_result");
    assert_eq!(body["filter"], "long_term_down_trend");
    assert_eq!(body["results"][0]["technical_conditions"]["pattern_long_term_down_trend_status"], "Downward");
    assert!(body["results"][0].get("sort_score").is_none());
}

#[test]
fn test_same_day_requests_hit_cache() {
    let (_dir, screener) = fixture();
    let request = AnalyzeRequest {
        filter: Some("long_term_down_trend".into()),
        ..AnalyzeRequest::default()
    };

    let first = screener.analyze(&request, &NullSink).unwrap();
    assert_eq!(
        cache_files(&screener),
        ["20240603_long_term_down_trend_pattern_10.json"]
    );

    let recorder = Recorder::default();
    let second = screener.analyze(&request, &recorder).unwrap();
    assert!(second.is_cached());
    assert_eq!(second.body(), first.body());
    assert!(recorder.events().is_empty());

    let forced = AnalyzeRequest {
        force: true,
        ..request
    };
    let third = screener.analyze(&forced, &NullSink).unwrap();
    assert!(!third.is_cached());
    assert_eq!(third.body(), first.body());
}

#[test]
fn test_single_symbol_bypasses_cache() {
    let (_dir, screener) = fixture();
    let request = AnalyzeRequest {
        filter: Some("ma".into()),
        symbol: Some("UP".into()),
        ..AnalyzeRequest::default()
    };

    let recorder = Recorder::default();
    let outcome = screener.analyze(&request, &recorder).unwrap();
    assert_eq!(tickers(&outcome), ["UP"]);
    assert_eq!(recorder.events(), [100.0]);
    assert!(cache_files(&screener).is_empty());
}

#[test]
fn test_unknown_symbol_is_empty_universe() {
    let (_dir, screener) = fixture();
    let request = AnalyzeRequest {
        symbol: Some("NOPE".into()),
        ..AnalyzeRequest::default()
    };
    let err = screener.analyze(&request, &NullSink).unwrap_err();
    assert!(matches!(err, ScreenError::EmptyUniverse));
    assert_eq!(err.code(), "DATA_EMPTY");
}

#[test]
fn test_no_filter_keeps_every_analysed_symbol() {
    let (_dir, screener) = fixture();
    let request = AnalyzeRequest {
        top_n: 0,
        ..AnalyzeRequest::default()
    };
    let outcome = screener.analyze(&request, &NullSink).unwrap();
    let mut found = tickers(&outcome);
    found.sort();
    assert_eq!(found, ["DOWN", "FLAT", "UP"]);

    let body: Value = serde_json::from_str(outcome.body()).unwrap();
    assert_eq!(body["filter"], "ma_only");
    // pattern analysis was not requested
    let conditions = &body["results"][0]["technical_conditions"];
    assert!(conditions.get("pattern_half_cup_status").is_none());
    assert!(conditions.get("above_ma200").is_some());
}

#[test]
fn test_requested_periods_gain_mandatory_ones() {
    let (_dir, screener) = fixture();
    let request = AnalyzeRequest {
        ma_periods: vec![5],
        symbol: Some("UP".into()),
        ..AnalyzeRequest::default()
    };
    let outcome = screener.analyze(&request, &NullSink).unwrap();
    let body: Value = serde_json::from_str(outcome.body()).unwrap();
    let conditions = body["results"][0]["technical_conditions"].as_object().unwrap();
    let keys: Vec<&str> = conditions
        .keys()
        .filter(|k| k.starts_with("above_ma"))
        .map(String::as_str)
        .collect();
    assert_eq!(keys.len(), 3);
    assert_eq!(conditions["above_ma5"], false);
    assert_eq!(conditions["above_ma200"], true);
}

#[test]
fn test_unrecognized_filter_matches_nothing() {
    let (_dir, screener) = fixture();
    let request = AnalyzeRequest {
        filter: Some("sideways".into()),
        ..AnalyzeRequest::default()
    };
    let outcome = screener.analyze(&request, &NullSink).unwrap();
    assert!(tickers(&outcome).is_empty());
    let body: Value = serde_json::from_str(outcome.body()).unwrap();
    assert_eq!(body["filter"], "sideways");
}

#[test]
fn test_chart_export() {
    let (_dir, screener) = fixture();
    let chart = screener.chart("DOWN", &[10, 20, 50, 200], 120).unwrap();
    assert_eq!(chart.name, "Downhill Corp");
    assert_eq!(chart.ohlcv_data.len(), 120);
    assert!(chart.pattern_points.iter().any(|p| p.kind == "LongTermDown"));

    let line = chartscan::output::to_line(&chart);
    let value: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["mode"], "chart_data");
    assert_eq!(value["ohlcv_data"][0]["x"].as_str().unwrap().len(), 10);
    let ma_keys: Vec<&String> = value["ma_data"].as_object().unwrap().keys().collect();
    assert_eq!(ma_keys.len(), 4);
    assert_eq!(value["pattern_points"][0]["type"], "LongTermDown");
}

#[test]
fn test_chart_missing_symbol() {
    let (_dir, screener) = fixture();
    let err = screener.chart("GONE", &[20], 250).unwrap_err();
    assert_eq!(err.code(), "FILE_NOT_FOUND");
}

#[test]
fn test_in_memory_source() {
    let dir = tempfile::tempdir().unwrap();
    let mut bars = std::collections::HashMap::new();
    bars.insert("DOWN".to_string(), series("DOWN", 500, |i| 797.5 - i as f64));

    let screener = ScreenerBuilder::new(dir.path())
        .source(bars)
        .workers(1)
        .as_of(as_of())
        .build()
        .unwrap();
    std::fs::write(&screener.config().paths.listing_file, r#"[{"Code":"DOWN"}]"#).unwrap();

    let request = AnalyzeRequest {
        filter: Some("long_term_down_trend".into()),
        ..AnalyzeRequest::default()
    };
    let outcome = screener.analyze(&request, &NullSink).unwrap();
    assert_eq!(tickers(&outcome), ["DOWN"]);
}
