use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Raw record as returned from an upstream source; shape varies by source
pub type RawRecord = serde_json::Value;

/// A region as listed by a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub code: String,
    pub name: Option<String>,
}

impl RegionInfo {
    pub fn new(code: impl Into<String>, name: Option<String>) -> Self {
        Self {
            code: code.into(),
            name,
        }
    }
}

/// Core trait that all upstream data sources must implement
#[async_trait::async_trait]
pub trait RegionSource: Send + Sync {
    /// Unique identifier for this source, used in logs and the ingest ledger
    fn source_name(&self) -> &'static str;

    /// All regions the source knows about
    async fn list_regions(&self) -> Result<Vec<RegionInfo>>;

    /// Full daily history for one region
    async fn fetch_region_series(&self, code: &str) -> Result<Vec<RawRecord>>;

    /// Most recent snapshot for one region
    async fn fetch_region_current(&self, code: &str) -> Result<RawRecord>;

    /// Whole-country daily history; sources without one return an empty series
    async fn fetch_national_series(&self) -> Result<Vec<RawRecord>> {
        Ok(Vec::new())
    }
}
