//! Canonical field → candidate source paths.
//!
//! Each canonical field lists dotted paths into a raw record, highest priority first.
//! Nested paths match the v2-style shape (`cases.total`); flat keys match the v1 daily
//! shape (`positive`). Supporting a new source shape means adding paths here.

/// One canonical field and the raw paths it may be read from.
#[derive(Debug)]
pub struct FieldPaths {
    pub field: &'static str,
    pub candidates: &'static [&'static str],
}

impl FieldPaths {
    const fn new(field: &'static str, candidates: &'static [&'static str]) -> Self {
        Self { field, candidates }
    }
}

pub static DATE_PATHS: FieldPaths = FieldPaths::new("date", &["date", "dateChecked"]);

pub static REGION_NAME_PATHS: FieldPaths = FieldPaths::new("region_name", &["name", "state_name"]);

/// Numeric fields, in storage column order.
pub static METRIC_PATHS: &[FieldPaths] = &[
    FieldPaths::new("cases_total", &["cases.total", "positive"]),
    FieldPaths::new(
        "cases_confirmed",
        &["cases.confirmed", "positiveCasesViral", "positive"],
    ),
    FieldPaths::new("deaths_total", &["outcomes.death.total", "death"]),
    FieldPaths::new(
        "deaths_confirmed",
        &["outcomes.death.confirmed", "deathConfirmed"],
    ),
    FieldPaths::new(
        "deaths_probable",
        &["outcomes.death.probable", "deathProbable"],
    ),
    FieldPaths::new(
        "hospitalized_currently",
        &["hospitalization.hospitalized.currently", "hospitalizedCurrently"],
    ),
    FieldPaths::new(
        "hospitalized_cumulative",
        &["outcomes.hospitalized.total", "hospitalizedCumulative"],
    ),
    FieldPaths::new(
        "in_icu_currently",
        &["hospitalization.in_icu.currently", "inIcuCurrently"],
    ),
    FieldPaths::new("tests_total", &["tests.pcr.total", "totalTestResults"]),
];

pub fn metric_paths(field: &str) -> Option<&'static FieldPaths> {
    METRIC_PATHS.iter().find(|p| p.field == field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Metrics;

    #[test]
    fn every_metric_column_has_paths() {
        let columns: Vec<&str> = Metrics::default().fields().iter().map(|(f, _)| *f).collect();
        let mapped: Vec<&str> = METRIC_PATHS.iter().map(|p| p.field).collect();
        assert_eq!(columns, mapped);
        assert!(METRIC_PATHS.iter().all(|p| !p.candidates.is_empty()));
    }

    #[test]
    fn nested_path_comes_before_flat_fallback() {
        let cases = metric_paths("cases_total").unwrap();
        assert_eq!(cases.candidates, &["cases.total", "positive"]);
        assert!(metric_paths("unknown").is_none());
    }
}
