//! Screening orchestrator
//!
//! Checks the day cache, fans the universe out over a bounded rayon pool,
//! collects per-symbol results in completion order, ranks them and writes
//! the cache back.

use std::{
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
};

use chrono::{Local, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::{
    cache::{CacheKey, ResultCache, DEFAULT_RETENTION_DAYS},
    chart::{self, ChartData},
    evaluate::{Evaluator, Filter, SymbolAnalysis, MIN_CONDITION_ROWS},
    indicators,
    output::{self, progress_percent, AnalyzeEnvelope, EventSink, NO_FILTER_LABEL},
    regime::{RegimeClassifier, RegimeConfig},
    store::{BarSource, CsvBarStore},
    universe::{self, SymbolRecord},
    Result, ScreenError, MIN_PATTERN_ROWS,
};

/// Periods always evaluated in addition to the requested ones
pub const MANDATORY_MA_PERIODS: [usize; 2] = [50, 200];

// ============================================================
// CONFIGURATION
// ============================================================

/// Working directory layout under a base directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub base: PathBuf,
    pub log_dir: PathBuf,
    pub data_dir: PathBuf,
    pub listing_file: PathBuf,
    pub cache_dir: PathBuf,
}

impl Paths {
    pub fn from_base(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref().to_path_buf();
        Self {
            log_dir: base.join("log"),
            data_dir: base.join("data").join("stock_data"),
            listing_file: base.join("data").join("stock_list").join("stock_listing.json"),
            cache_dir: base.join("cache"),
            base,
        }
    }

    /// Create every directory the screener writes to or reads from
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.cache_dir)?;
        if let Some(dir) = self.listing_file.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Default worker count: twice the available parallelism
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get()) * 2
}

#[derive(Debug, Clone)]
pub struct ScreenerConfig {
    pub paths: Paths,
    pub workers: usize,
    pub cache_retention_days: u64,
    /// Raw bars a symbol needs before it is analysed
    pub min_history: usize,
    /// Trailing frame rows handed to the evaluator
    pub analysis_window: usize,
    /// Analysis rows required after the indicator warm-up
    pub min_analysis_rows: usize,
    /// Fixed cache day; today's local date when unset
    pub as_of: Option<NaiveDate>,
}

impl ScreenerConfig {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            workers: default_workers(),
            cache_retention_days: DEFAULT_RETENTION_DAYS,
            min_history: MIN_PATTERN_ROWS,
            analysis_window: MIN_PATTERN_ROWS,
            min_analysis_rows: MIN_CONDITION_ROWS,
            as_of: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ScreenError::InvalidConfig("workers must be > 0".into()));
        }
        if self.cache_retention_days == 0 {
            return Err(ScreenError::InvalidConfig("cache retention must be > 0 days".into()));
        }
        if self.analysis_window < self.min_analysis_rows {
            return Err(ScreenError::InvalidConfig(format!(
                "analysis window {} is shorter than the {} rows required",
                self.analysis_window, self.min_analysis_rows
            )));
        }
        Ok(())
    }
}

// ============================================================
// BUILDER
// ============================================================

pub struct ScreenerBuilder<S: BarSource = CsvBarStore> {
    config: ScreenerConfig,
    source: S,
    evaluator: Evaluator,
    regime: RegimeConfig,
}

impl ScreenerBuilder<CsvBarStore> {
    /// Builder over `base` reading bars from its data directory
    pub fn new(base: impl AsRef<Path>) -> Self {
        let paths = Paths::from_base(base);
        Self {
            source: CsvBarStore::new(paths.data_dir.clone()),
            config: ScreenerConfig::new(paths),
            evaluator: Evaluator::default(),
            regime: RegimeConfig::default(),
        }
    }
}

impl<S: BarSource> ScreenerBuilder<S> {
    /// Replace the bar source
    pub fn source<T: BarSource>(self, source: T) -> ScreenerBuilder<T> {
        ScreenerBuilder {
            config: self.config,
            source,
            evaluator: self.evaluator,
            regime: self.regime,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn cache_retention_days(mut self, days: u64) -> Self {
        self.config.cache_retention_days = days;
        self
    }

    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.config.as_of = Some(date);
        self
    }

    pub fn evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn regime(mut self, config: RegimeConfig) -> Self {
        self.regime = config;
        self
    }

    /// Validate configuration and create the working directories
    pub fn build(self) -> Result<Screener<S>> {
        self.config.validate()?;
        self.config.paths.ensure()?;
        for d in self.evaluator.detectors() {
            d.validate_config()?;
        }
        let classifier = RegimeClassifier::new(self.regime)?;

        let cache = ResultCache::new(self.config.paths.cache_dir.clone(), self.config.cache_retention_days);
        let pipeline = SymbolPipeline {
            source: self.source,
            evaluator: self.evaluator,
            classifier,
            min_history: self.config.min_history,
            window: self.config.analysis_window,
            min_rows: self.config.min_analysis_rows,
        };
        Ok(Screener {
            config: self.config,
            cache,
            pipeline: Arc::new(pipeline),
        })
    }
}

// ============================================================
// REQUEST / OUTCOME
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeRequest {
    pub ma_periods: Vec<usize>,
    pub analyze_patterns: bool,
    /// Raw filter identifier
    pub filter: Option<String>,
    /// Results kept after ranking; <= 0 keeps all
    pub top_n: i64,
    /// Skip the cache read
    pub force: bool,
    /// Restrict the universe to one symbol; bypasses the cache entirely
    pub symbol: Option<String>,
}

impl Default for AnalyzeRequest {
    fn default() -> Self {
        Self {
            ma_periods: vec![20, 50, 200],
            analyze_patterns: false,
            filter: None,
            top_n: 10,
            force: false,
            symbol: None,
        }
    }
}

impl AnalyzeRequest {
    /// Pattern analysis as requested, or forced on by the filter
    pub fn patterns_enabled(&self) -> bool {
        self.analyze_patterns
            || self
                .filter
                .as_deref()
                .is_some_and(|f| Filter::parse(f).requires_patterns())
    }

    pub fn filter_label(&self) -> &str {
        self.filter.as_deref().unwrap_or(NO_FILTER_LABEL)
    }
}

/// Parse `"20,50,200"`; entries that are not plain digits are dropped
pub fn parse_periods(raw: &str) -> Vec<usize> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeOutcome {
    /// Served from the day cache
    Cached { body: String },
    Fresh {
        results: Vec<SymbolAnalysis>,
        body: String,
    },
}

impl AnalyzeOutcome {
    /// Serialized result envelope
    pub fn body(&self) -> &str {
        match self {
            AnalyzeOutcome::Cached { body } | AnalyzeOutcome::Fresh { body, .. } => body,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, AnalyzeOutcome::Cached { .. })
    }
}

/// Sort by score descending, ties by ticker, then keep `top_n` (all when <= 0)
pub fn rank(mut results: Vec<SymbolAnalysis>, top_n: i64) -> Vec<SymbolAnalysis> {
    results.sort_by(|a, b| {
        b.sort_score
            .total_cmp(&a.sort_score)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
    if top_n > 0 {
        results.truncate(top_n as usize);
    }
    results
}

// ============================================================
// PER-SYMBOL PIPELINE
// ============================================================

struct Task {
    periods: Vec<usize>,
    analyze_patterns: bool,
    filter: Option<Filter>,
}

struct SymbolPipeline<S> {
    source: S,
    evaluator: Evaluator,
    classifier: RegimeClassifier,
    min_history: usize,
    window: usize,
    min_rows: usize,
}

impl<S: BarSource> SymbolPipeline<S> {
    /// `Ok(None)` for skipped symbols and filter misses
    fn analyze(&self, record: &SymbolRecord, task: &Task) -> Result<Option<SymbolAnalysis>> {
        let ticker = record.code.as_str();
        let Some(series) = self.source.load(ticker)? else {
            debug!(ticker, "no bar data");
            return Ok(None);
        };
        if series.len() < self.min_history {
            debug!(ticker, bars = series.len(), "insufficient history");
            return Ok(None);
        }

        let mut frame = indicators::compute(&series);
        self.classifier.classify(&mut frame);
        let rows = frame.tail(self.window);
        if rows.len() < self.min_rows {
            debug!(ticker, rows = rows.len(), "insufficient rows after warm-up");
            return Ok(None);
        }

        let conditions = self.evaluator.evaluate(rows, &task.periods, task.analyze_patterns);
        let sort_score = match &task.filter {
            Some(filter) if !filter.matches(&conditions, rows, &task.periods) => return Ok(None),
            Some(filter) => filter.sort_score(&conditions),
            None => f64::from(conditions.market_regime),
        };

        Ok(Some(SymbolAnalysis {
            ticker: record.code.clone(),
            name: record.name.clone(),
            technical_conditions: conditions,
            sort_score,
        }))
    }
}

// ============================================================
// SCREENER
// ============================================================

pub struct Screener<S: BarSource = CsvBarStore> {
    config: ScreenerConfig,
    cache: ResultCache,
    pipeline: Arc<SymbolPipeline<S>>,
}

impl<S: BarSource + 'static> Screener<S> {
    pub fn config(&self) -> &ScreenerConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn cache_key(&self, request: &AnalyzeRequest) -> CacheKey {
        CacheKey::new(
            self.today(),
            request.filter.as_deref(),
            request.patterns_enabled(),
            request.top_n,
        )
    }

    fn today(&self) -> NaiveDate {
        self.config.as_of.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Screen the universe, serving same-day requests from the cache
    pub fn analyze(&self, request: &AnalyzeRequest, sink: &dyn EventSink) -> Result<AnalyzeOutcome> {
        let swept = self.cache.sweep();
        if swept > 0 {
            info!(swept, "expired cache entries removed");
        }

        let key = self.cache_key(request);
        if !request.force && request.symbol.is_none() {
            if let Some(body) = self.cache.load(&key) {
                info!(file = %key.file_name(), "serving cached results");
                return Ok(AnalyzeOutcome::Cached { body });
            }
        }

        let mut periods = request.ma_periods.clone();
        for p in MANDATORY_MA_PERIODS {
            if !periods.contains(&p) {
                periods.push(p);
            }
        }

        let mut records = universe::load_listing(&self.config.paths.listing_file);
        if let Some(symbol) = &request.symbol {
            records.retain(|r| &r.code == symbol);
        }
        if records.is_empty() {
            return Err(ScreenError::EmptyUniverse);
        }

        let task = Arc::new(Task {
            periods,
            analyze_patterns: request.patterns_enabled(),
            filter: request.filter.as_deref().map(Filter::parse),
        });
        info!(
            symbols = records.len(),
            workers = self.config.workers,
            filter = request.filter_label(),
            "screening started"
        );

        let results = rank(self.dispatch(records, task, sink)?, request.top_n);
        let line = serde_json::to_string(&AnalyzeEnvelope::new(&results, request.filter_label()));
        info!(matches = results.len(), "screening finished");

        let key = request.symbol.is_none().then_some(&key);
        let body = self.finish_body(key, line);
        Ok(AnalyzeOutcome::Fresh { results, body })
    }

    /// Envelope body for a finished run. Only a serialized envelope is cached;
    /// a serialization failure is returned as its error envelope.
    fn finish_body(&self, key: Option<&CacheKey>, line: serde_json::Result<String>) -> String {
        match line {
            Ok(body) => {
                if let Some(key) = key {
                    if let Err(e) = self.cache.store(key, &body) {
                        warn!(error = %e, "failed to write result cache");
                    }
                }
                body
            }
            Err(e) => {
                error!(error = %e, "result envelope serialization failed");
                output::serialization_failure(&e)
            }
        }
    }

    /// One pool task per symbol; progress is reported in completion order
    fn dispatch(
        &self,
        records: Vec<SymbolRecord>,
        task: Arc<Task>,
        sink: &dyn EventSink,
    ) -> Result<Vec<SymbolAnalysis>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()?;
        let total = records.len();
        let (tx, rx) = mpsc::channel();

        for record in records {
            let tx = tx.clone();
            let pipeline = Arc::clone(&self.pipeline);
            let task = Arc::clone(&task);
            pool.spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.analyze(&record, &task)));
                let _ = tx.send((record, outcome));
            });
        }
        drop(tx);

        let mut results = Vec::new();
        for (done, (record, outcome)) in rx.into_iter().enumerate() {
            sink.progress(progress_percent(done + 1, total));
            match outcome {
                Ok(Ok(Some(analysis))) => results.push(analysis),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => error!(ticker = %record.code, name = ?record.name, error = %e, "symbol analysis failed"),
                Err(_) => error!(ticker = %record.code, name = ?record.name, "symbol analysis panicked"),
            }
        }
        Ok(results)
    }

    /// Chart payload for one symbol
    pub fn chart(&self, symbol: &str, ma_periods: &[usize], chart_period: usize) -> Result<ChartData> {
        let Some(series) = self.pipeline.source.load(symbol)? else {
            return Err(ScreenError::FileNotFound(symbol.to_string()));
        };
        let frame = indicators::compute(&series);
        if frame.is_empty() {
            return Err(ScreenError::InsufficientData {
                need: indicators::LONGEST_WINDOW,
                got: series.len(),
            });
        }
        let records = universe::load_listing(&self.config.paths.listing_file);
        let name = universe::name_for(&records, symbol);
        chart::build(symbol, name, &frame, &self.pipeline.evaluator, ma_periods, chart_period)
    }
}
