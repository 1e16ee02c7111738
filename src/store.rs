//! Per-symbol bar storage

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{Bar, BarSeries, Result};

/// Source of daily bars. `Ok(None)` means the symbol has no data.
pub trait BarSource: Send + Sync {
    fn load(&self, ticker: &str) -> Result<Option<BarSeries>>;
}

/// One `<ticker>.csv` per symbol with a `Date,Open,High,Low,Close,Volume` header
#[derive(Debug, Clone)]
pub struct CsvBarStore {
    dir: PathBuf,
}

impl CsvBarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{ticker}.csv"))
    }

    pub fn write(&self, series: &BarSeries) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut writer = csv::Writer::from_path(self.path_for(series.symbol()))?;
        for bar in series.bars() {
            writer.serialize(bar)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl BarSource for CsvBarStore {
    fn load(&self, ticker: &str) -> Result<Option<BarSeries>> {
        let path = self.path_for(ticker);
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let bars = reader
            .deserialize::<Bar>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        BarSeries::new(ticker, bars).map(Some)
    }
}

impl BarSource for HashMap<String, BarSeries> {
    fn load(&self, ticker: &str) -> Result<Option<BarSeries>> {
        Ok(self.get(ticker).cloned())
    }
}
