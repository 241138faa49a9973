//! Canonical record shape and the invariants every record satisfies before storage.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::REGION_CODE_LEN;

/// Why a single record was rejected. Always recoverable at batch level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("region code must be exactly 2 characters, got '{0}'")]
    InvalidRegionCode(String),

    #[error("{field} must be non-negative, got {value}")]
    NegativeMetric { field: &'static str, value: i64 },

    #[error("record has no date")]
    MissingDate,

    #[error("unparseable date: {0}")]
    InvalidDate(String),
}

/// Nullable statistics for one region and day. `None` means unknown, never zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub cases_total: Option<i64>,
    pub cases_confirmed: Option<i64>,
    pub deaths_total: Option<i64>,
    pub deaths_confirmed: Option<i64>,
    pub deaths_probable: Option<i64>,
    pub hospitalized_currently: Option<i64>,
    pub hospitalized_cumulative: Option<i64>,
    pub in_icu_currently: Option<i64>,
    pub tests_total: Option<i64>,
}

impl Metrics {
    /// Field names paired with their values, in storage column order.
    pub fn fields(&self) -> [(&'static str, Option<i64>); 9] {
        [
            ("cases_total", self.cases_total),
            ("cases_confirmed", self.cases_confirmed),
            ("deaths_total", self.deaths_total),
            ("deaths_confirmed", self.deaths_confirmed),
            ("deaths_probable", self.deaths_probable),
            ("hospitalized_currently", self.hospitalized_currently),
            ("hospitalized_cumulative", self.hospitalized_cumulative),
            ("in_icu_currently", self.in_icu_currently),
            ("tests_total", self.tests_total),
        ]
    }

    /// Mutable slot for a field by name; `None` for unknown names.
    pub fn slot_mut(&mut self, field: &str) -> Option<&mut Option<i64>> {
        match field {
            "cases_total" => Some(&mut self.cases_total),
            "cases_confirmed" => Some(&mut self.cases_confirmed),
            "deaths_total" => Some(&mut self.deaths_total),
            "deaths_confirmed" => Some(&mut self.deaths_confirmed),
            "deaths_probable" => Some(&mut self.deaths_probable),
            "hospitalized_currently" => Some(&mut self.hospitalized_currently),
            "hospitalized_cumulative" => Some(&mut self.hospitalized_cumulative),
            "in_icu_currently" => Some(&mut self.in_icu_currently),
            "tests_total" => Some(&mut self.tests_total),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in self.fields() {
            if let Some(v) = value {
                if v < 0 {
                    return Err(ValidationError::NegativeMetric { field, value: v });
                }
            }
        }
        Ok(())
    }
}

/// One region's statistics for one calendar day. Only constructible through [`CanonicalRecord::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalRecord {
    region_code: String,
    region_name: String,
    date: NaiveDate,
    #[serde(flatten)]
    metrics: Metrics,
}

impl CanonicalRecord {
    /// Validates and builds a record.
    ///
    /// The code is trimmed and uppercased before the length check. A missing or blank
    /// name falls back to the normalized code.
    pub fn new(
        region_code: &str,
        region_name: Option<&str>,
        date: NaiveDate,
        metrics: Metrics,
    ) -> Result<Self, ValidationError> {
        let code = region_code.trim().to_uppercase();
        if code.is_empty() || code.chars().count() != REGION_CODE_LEN {
            return Err(ValidationError::InvalidRegionCode(region_code.to_string()));
        }
        metrics.validate()?;

        let name = region_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| code.clone());

        Ok(Self {
            region_code: code,
            region_name: name,
            date,
            metrics,
        })
    }

    pub fn region_code(&self) -> &str {
        &self.region_code
    }

    pub fn region_name(&self) -> &str {
        &self.region_name
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn metric(&self, metric: Metric) -> Option<i64> {
        match metric {
            Metric::Cases => self.metrics.cases_total,
            Metric::Deaths => self.metrics.deaths_total,
        }
    }
}

/// A record as read back from the store, with the storage-assigned load time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record: CanonicalRecord,
    pub loaded_at: NaiveDateTime,
}

/// Ranking metric for top-N queries and charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cases,
    Deaths,
}

impl Metric {
    pub fn column(self) -> &'static str {
        match self {
            Metric::Cases => "cases_total",
            Metric::Deaths => "deaths_total",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::Cases => "cases",
            Metric::Deaths => "deaths",
        }
    }
}

/// Aggregates over the latest row of every region.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_regions: i64,
    pub total_cases: i64,
    pub total_deaths: i64,
    pub total_hospitalized: i64,
    /// Mean over regions that report cases; `None` when none do.
    pub avg_cases_per_region: Option<f64>,
    pub latest_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn code_is_uppercased_and_name_defaults_to_code() {
        let record = CanonicalRecord::new(" ca ", None, day("2021-03-07"), Metrics::default()).unwrap();
        assert_eq!(record.region_code(), "CA");
        assert_eq!(record.region_name(), "CA");

        let named = CanonicalRecord::new("ny", Some("New York"), day("2021-03-07"), Metrics::default()).unwrap();
        assert_eq!(named.region_name(), "New York");

        let blank = CanonicalRecord::new("ny", Some("  "), day("2021-03-07"), Metrics::default()).unwrap();
        assert_eq!(blank.region_name(), "NY");
    }

    #[test]
    fn rejects_bad_region_codes() {
        for code in ["", "C", "CAL", "   "] {
            let err = CanonicalRecord::new(code, None, day("2021-03-07"), Metrics::default()).unwrap_err();
            assert!(matches!(err, ValidationError::InvalidRegionCode(_)), "code {code:?}");
        }
    }

    #[test]
    fn rejects_negative_metrics_but_keeps_zero_and_absent() {
        let metrics = Metrics {
            deaths_probable: Some(-1),
            ..Default::default()
        };
        let err = CanonicalRecord::new("TX", None, day("2021-03-07"), metrics).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NegativeMetric {
                field: "deaths_probable",
                value: -1
            }
        );

        let metrics = Metrics {
            cases_total: Some(0),
            ..Default::default()
        };
        let record = CanonicalRecord::new("TX", None, day("2021-03-07"), metrics).unwrap();
        assert_eq!(record.metrics().cases_total, Some(0));
        assert_eq!(record.metrics().deaths_total, None);
    }

    #[test]
    fn serializes_flat_with_nulls() {
        let metrics = Metrics {
            cases_total: Some(10),
            ..Default::default()
        };
        let record = CanonicalRecord::new("WA", Some("Washington"), day("2021-03-05"), metrics).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["region_code"], "WA");
        assert_eq!(json["date"], "2021-03-05");
        assert_eq!(json["cases_total"], 10);
        assert!(json["tests_total"].is_null());
    }

    #[test]
    fn slot_names_match_fields() {
        let mut metrics = Metrics::default();
        for (name, _) in Metrics::default().fields() {
            *metrics.slot_mut(name).unwrap() = Some(1);
        }
        assert!(metrics.fields().iter().all(|(_, v)| *v == Some(1)));
        assert!(metrics.slot_mut("nope").is_none());
    }
}
