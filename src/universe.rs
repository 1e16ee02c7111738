//! Symbol universe listing

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;

/// One listed symbol. Accepts both `Code`/`Name` and `code`/`name` keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    #[serde(rename = "Code", alias = "code")]
    pub code: String,
    #[serde(rename = "Name", alias = "name", default)]
    pub name: Option<String>,
}

impl SymbolRecord {
    pub fn new(code: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            code: code.into(),
            name: name.map(str::to_string),
        }
    }
}

/// Universe used when the listing file cannot be read
pub fn fallback() -> Vec<SymbolRecord> {
    vec![SymbolRecord::new("005930", Some("삼성전자"))]
}

pub fn try_load_listing(path: &Path) -> Result<Vec<SymbolRecord>> {
    let body = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&body)?)
}

/// Listing at `path`, or the single fallback record when it is missing or malformed
pub fn load_listing(path: &Path) -> Vec<SymbolRecord> {
    match try_load_listing(path) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "symbol listing unavailable, using fallback");
            fallback()
        }
    }
}

/// Display name for `code`, the code itself when unnamed or unlisted
pub fn name_for(records: &[SymbolRecord], code: &str) -> String {
    records
        .iter()
        .find(|r| r.code == code)
        .and_then(|r| r.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| code.to_string())
}
