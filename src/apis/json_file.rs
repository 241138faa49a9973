use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, instrument};

use super::into_records;
use crate::error::{EtlError, Result};
use crate::pipeline::normalize::{extract_path, parse_date};
use crate::types::{RawRecord, RegionInfo, RegionSource};

pub const JSON_FILE_SOURCE: &str = "json_file";

const CODE_KEYS: &[&str] = &["state", "region_code"];
const NAME_KEYS: &[&str] = &["name", "state_name", "region_name"];

/// Offline source: a JSON dump of flat daily records, each tagged with its region code.
///
/// Accepts a top-level array or a `{"data": [...]}` envelope, matching the API bodies.
pub struct JsonFileSource {
    records: Vec<RawRecord>,
}

impl JsonFileSource {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let payload: Value = serde_json::from_str(&content)?;
        let records = into_records(payload, &path.display().to_string())?;
        info!("Loaded {} records from {}", records.len(), path.display());
        Ok(Self { records })
    }

    pub fn from_records(records: Vec<RawRecord>) -> Self {
        Self { records }
    }

    fn region_of(record: &RawRecord) -> Option<&str> {
        CODE_KEYS
            .iter()
            .find_map(|key| extract_path(record, key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }

    fn name_of(record: &RawRecord) -> Option<String> {
        NAME_KEYS
            .iter()
            .find_map(|key| extract_path(record, key).and_then(Value::as_str))
            .map(str::to_string)
    }

    fn series(&self, code: &str) -> Vec<RawRecord> {
        self.records
            .iter()
            .filter(|r| Self::region_of(r).is_some_and(|c| c.eq_ignore_ascii_case(code)))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl RegionSource for JsonFileSource {
    fn source_name(&self) -> &'static str {
        JSON_FILE_SOURCE
    }

    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        let mut regions: Vec<RegionInfo> = Vec::new();
        for record in &self.records {
            let Some(code) = Self::region_of(record) else {
                continue;
            };
            let code = code.to_uppercase();
            match regions.iter().position(|r| r.code == code) {
                Some(i) if regions[i].name.is_none() => regions[i].name = Self::name_of(record),
                Some(_) => {}
                None => regions.push(RegionInfo::new(code, Self::name_of(record))),
            }
        }
        Ok(regions)
    }

    #[instrument(skip(self))]
    async fn fetch_region_series(&self, code: &str) -> Result<Vec<RawRecord>> {
        Ok(self.series(code))
    }

    /// The region's record with the latest parseable date.
    async fn fetch_region_current(&self, code: &str) -> Result<RawRecord> {
        self.series(code)
            .into_iter()
            .filter_map(|r| {
                let date = extract_path(&r, "date").and_then(|d| parse_date(d).ok())?;
                Some((date, r))
            })
            .max_by_key(|(date, _)| *date)
            .map(|(_, r)| r)
            .ok_or_else(|| EtlError::Api {
                message: format!("no dated records for region {code}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> JsonFileSource {
        JsonFileSource::from_records(vec![
            json!({"state": "CA", "date": 20210306, "positive": 10}),
            json!({"state": "ny", "date": 20210307, "positive": 5, "name": "New York"}),
            json!({"state": "CA", "date": 20210307, "positive": 20, "name": "California"}),
            json!({"date": 20210307, "positive": 1}),
        ])
    }

    #[tokio::test]
    async fn regions_in_first_seen_order_with_late_names() {
        let regions = source().list_regions().await.unwrap();
        assert_eq!(
            regions,
            vec![
                RegionInfo::new("CA", Some("California".to_string())),
                RegionInfo::new("NY", Some("New York".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn series_and_current_are_filtered_by_code() {
        let src = source();
        assert_eq!(src.fetch_region_series("ca").await.unwrap().len(), 2);
        let current = src.fetch_region_current("CA").await.unwrap();
        assert_eq!(current["positive"], 20);
        assert!(src.fetch_region_current("TX").await.is_err());
        assert!(src.fetch_national_series().await.unwrap().is_empty());
    }

    #[test]
    fn load_accepts_data_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        fs::write(&path, r#"{"data": [{"state": "WA", "date": "2021-03-07"}]}"#).unwrap();
        let src = JsonFileSource::load(&path).unwrap();
        assert_eq!(src.series("WA").len(), 1);
    }
}
