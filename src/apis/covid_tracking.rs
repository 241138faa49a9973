use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use super::{into_records, unwrap_payload};
use crate::config::Config;
use crate::error::{EtlError, Result};
use crate::types::{RawRecord, RegionInfo, RegionSource};

pub const COVID_TRACKING_SOURCE: &str = "covid_tracking";

/// Client for the COVID Tracking Project v1 JSON API
pub struct CovidTrackingClient {
    client: Client,
    base_url: String,
}

impl CovidTrackingClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        Ok(body)
    }
}

/// Regions from a `states/info.json` payload. Entries without a code are skipped.
pub fn parse_region_list(payload: Value) -> Result<Vec<RegionInfo>> {
    let entries = into_records(payload, "region list")?;
    let regions = entries
        .iter()
        .filter_map(|entry| {
            let code = entry.get("state").and_then(Value::as_str).map(str::trim)?;
            if code.is_empty() {
                return None;
            }
            let name = entry.get("name").and_then(Value::as_str).map(str::to_string);
            Some(RegionInfo::new(code.to_uppercase(), name))
        })
        .collect();
    Ok(regions)
}

#[async_trait::async_trait]
impl RegionSource for CovidTrackingClient {
    fn source_name(&self) -> &'static str {
        COVID_TRACKING_SOURCE
    }

    #[instrument(skip(self))]
    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        let payload = self.get_json(&self.url("states/info.json")).await.map_err(|e| {
            error!("Failed to fetch region list: {}", e);
            e
        })?;
        let regions = parse_region_list(payload)?;
        info!("Fetched {} regions", regions.len());
        Ok(regions)
    }

    #[instrument(skip(self))]
    async fn fetch_region_series(&self, code: &str) -> Result<Vec<RawRecord>> {
        let url = self.url(&format!("states/{}/daily.json", code.to_lowercase()));
        let payload = self.get_json(&url).await.map_err(|e| {
            error!("Failed to fetch daily data for {}: {}", code, e);
            e
        })?;
        let records = into_records(payload, code)?;
        info!("Fetched {} daily records for {}", records.len(), code);
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn fetch_region_current(&self, code: &str) -> Result<RawRecord> {
        let url = self.url(&format!("states/{}/current.json", code.to_lowercase()));
        let payload = self.get_json(&url).await.map_err(|e| {
            error!("Failed to fetch current data for {}: {}", code, e);
            e
        })?;
        match unwrap_payload(payload) {
            record @ Value::Object(_) => Ok(record),
            other => Err(EtlError::Api {
                message: format!("expected a single record for {code}, got {other}"),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_national_series(&self) -> Result<Vec<RawRecord>> {
        let payload = self.get_json(&self.url("us/daily.json")).await.map_err(|e| {
            error!("Failed to fetch national daily data: {}", e);
            e
        })?;
        let records = into_records(payload, "us")?;
        info!("Fetched {} national daily records", records.len());
        Ok(records)
    }
}
