use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::{debug, warn};

use crate::schema::{CanonicalRecord, Metrics, ValidationError};
use crate::types::{RawRecord, RegionInfo};

pub mod field_map;

use field_map::{FieldPaths, DATE_PATHS, METRIC_PATHS, REGION_NAME_PATHS};

/// Walks a dotted path through nested objects.
///
/// Returns `None` for an empty path, a missing key, a non-object encountered before the
/// last segment, or a null at the end.
pub fn extract_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = record;
    for key in path.split('.') {
        current = current.as_object()?.get(key)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// First candidate path that yields a value, with the path that matched.
pub fn first_present<'a>(record: &'a Value, paths: &FieldPaths) -> Option<(&'static str, &'a Value)> {
    paths
        .candidates
        .iter()
        .find_map(|path| extract_path(record, path).map(|v| (*path, v)))
}

/// Coerces a raw scalar to a whole count.
///
/// `Ok(None)` means absent (null or empty string). `Err` carries a description of a value
/// that cannot be read as a number; callers treat it as absent.
pub fn coerce_count(value: &Value) -> Result<Option<i64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i))
            } else if let Some(f) = n.as_f64() {
                truncate_float(f).map(Some).ok_or_else(|| format!("number {n} out of range"))
            } else {
                Err(format!("number {n} out of range"))
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Some(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(truncate_float)
                .map(Some)
                .ok_or_else(|| format!("non-numeric string '{s}'"))
        }
        other => Err(format!("unsupported value {other}")),
    }
}

fn truncate_float(f: f64) -> Option<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

/// Parses `YYYY-MM-DD`, `YYYYMMDD` (string or integer) or an RFC 3339 timestamp.
pub fn parse_date(value: &Value) -> Result<NaiveDate, ValidationError> {
    match value {
        Value::Null => Err(ValidationError::MissingDate),
        Value::Number(n) => n
            .as_u64()
            .and_then(|compact| parse_compact(&compact.to_string()))
            .ok_or_else(|| ValidationError::InvalidDate(n.to_string())),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(ValidationError::MissingDate);
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_compact(s))
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                        .ok()
                        .map(|dt| dt.date())
                })
                .ok_or_else(|| ValidationError::InvalidDate(s.to_string()))
        }
        other => Err(ValidationError::InvalidDate(other.to_string())),
    }
}

fn parse_compact(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = s[0..4].parse().ok()?;
    let month = s[4..6].parse().ok()?;
    let day = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Outcome of normalizing a batch: accepted records in input order, plus what was dropped.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<CanonicalRecord>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Position of the raw record in the input batch
    pub index: usize,
    pub error: ValidationError,
}

/// Trait for normalizing raw upstream records into canonical records
pub trait Normalizer {
    /// Convert one raw record for `region`, or reject it.
    fn normalize(&self, raw: &RawRecord, region: &RegionInfo) -> Result<CanonicalRecord, ValidationError>;

    /// Normalize every record, logging and skipping the ones that fail validation.
    fn normalize_batch(&self, raws: &[RawRecord], region: &RegionInfo) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for (index, raw) in raws.iter().enumerate() {
            match self.normalize(raw, region) {
                Ok(record) => batch.records.push(record),
                Err(error) => {
                    warn!(region = %region.code, index, %error, "Skipping invalid record");
                    batch.rejected.push(Rejection { index, error });
                }
            }
        }
        debug!(
            region = %region.code,
            accepted = batch.records.len(),
            rejected = batch.rejected.len(),
            "Normalized batch"
        );
        batch
    }
}

/// Table-driven normalizer: every field is resolved through its candidate path list.
pub struct PathNormalizer {
    date_paths: &'static FieldPaths,
    name_paths: &'static FieldPaths,
    metric_paths: &'static [FieldPaths],
}

impl Default for PathNormalizer {
    fn default() -> Self {
        Self {
            date_paths: &DATE_PATHS,
            name_paths: &REGION_NAME_PATHS,
            metric_paths: METRIC_PATHS,
        }
    }
}

impl PathNormalizer {
    pub fn new(
        date_paths: &'static FieldPaths,
        name_paths: &'static FieldPaths,
        metric_paths: &'static [FieldPaths],
    ) -> Self {
        Self {
            date_paths,
            name_paths,
            metric_paths,
        }
    }

    fn extract_metrics(&self, raw: &RawRecord, region: &str) -> Metrics {
        let mut metrics = Metrics::default();
        for paths in self.metric_paths {
            let value = resolve_count(raw, paths, region);
            match metrics.slot_mut(paths.field) {
                Some(slot) => *slot = value,
                None => warn!(field = paths.field, "Field map names an unknown metric"),
            }
        }
        metrics
    }
}

/// First candidate whose value coerces to a count. Candidates that are empty or
/// uncoercible are skipped, the latter with a warning.
fn resolve_count(raw: &RawRecord, paths: &FieldPaths, region: &str) -> Option<i64> {
    for path in paths.candidates {
        let Some(value) = extract_path(raw, path) else {
            continue;
        };
        match coerce_count(value) {
            Ok(Some(count)) => return Some(count),
            Ok(None) => {}
            Err(reason) => {
                warn!(region, field = paths.field, path, %reason, "Skipping uncoercible value");
            }
        }
    }
    None
}

impl Normalizer for PathNormalizer {
    fn normalize(&self, raw: &RawRecord, region: &RegionInfo) -> Result<CanonicalRecord, ValidationError> {
        let date = first_present(raw, self.date_paths)
            .map(|(_, v)| parse_date(v))
            .unwrap_or(Err(ValidationError::MissingDate))?;

        let source_name = first_present(raw, self.name_paths).and_then(|(_, v)| v.as_str());
        let name = region.name.as_deref().or(source_name);

        let metrics = self.extract_metrics(raw, &region.code);
        CanonicalRecord::new(&region.code, name, date, metrics)
    }
}
