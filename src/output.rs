//! Single-line JSON messages on stdout

use std::io::Write;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::evaluate::SymbolAnalysis;

pub const PROGRESS_MODE: &str = "progress";
pub const ANALYZE_MODE: &str = "analyze_result";
pub const CHART_MODE: &str = "chart_data";
/// Filter label reported when no filter was requested
pub const NO_FILTER_LABEL: &str = "ma_only";

/// Receives progress as symbols complete
pub trait EventSink: Send + Sync {
    fn progress(&self, percent: f64);
}

/// Prints each event as one JSON line
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn progress(&self, percent: f64) {
        emit(&ProgressEvent::new(percent));
    }
}

/// Discards events
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn progress(&self, _percent: f64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub mode: &'static str,
    pub progress_percent: f64,
}

impl ProgressEvent {
    pub fn new(progress_percent: f64) -> Self {
        Self {
            mode: PROGRESS_MODE,
            progress_percent,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeEnvelope<'a> {
    pub results: &'a [SymbolAnalysis],
    pub mode: &'static str,
    pub filter: &'a str,
}

impl<'a> AnalyzeEnvelope<'a> {
    pub fn new(results: &'a [SymbolAnalysis], filter: &'a str) -> Self {
        Self {
            results,
            mode: ANALYZE_MODE,
            filter,
        }
    }
}

/// `{"error": CODE, ...detail}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            error: code.into(),
            detail: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }
}

/// Completion percentage rounded to two decimals
pub fn progress_percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Serialize to one line; a failure becomes a serialization error envelope
pub fn to_line<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| serialization_failure(&e))
}

/// `{"error":"JSON_SERIALIZATION_FAIL","original_error":...}`
pub fn serialization_failure(err: &serde_json::Error) -> String {
    let fallback = ErrorEnvelope::new("JSON_SERIALIZATION_FAIL").with("original_error", err.to_string());
    serde_json::to_string(&fallback).unwrap_or_else(|_| r#"{"error":"JSON_SERIALIZATION_FAIL"}"#.to_string())
}

pub fn emit<T: Serialize>(value: &T) {
    emit_raw(&to_line(value));
}

/// Print an already serialized line and flush
pub fn emit_raw(line: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}
