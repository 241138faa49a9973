//! SQLite store for canonical records, keyed by (region_code, date).
//!
//! Every operation opens its own connection and drops it before returning. Writes happen
//! inside one transaction per batch; an uncommitted transaction rolls back on drop, so an
//! error part way through a batch leaves no rows from it behind.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::constants::NATIONAL_REGION_CODE;
use crate::error::{EtlError, Result};
use crate::schema::{CanonicalRecord, Metric, Metrics, StoredRecord, SummaryStats};

pub mod ingest_log;

pub use ingest_log::{IngestLog, RunRecord, RunStatus};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA_SQL: &str = r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS region_daily (
        region_code             TEXT NOT NULL,
        region_name             TEXT NOT NULL,
        date                    TEXT NOT NULL,
        cases_total             INTEGER,
        cases_confirmed         INTEGER,
        deaths_total            INTEGER,
        deaths_confirmed        INTEGER,
        deaths_probable         INTEGER,
        hospitalized_currently  INTEGER,
        hospitalized_cumulative INTEGER,
        in_icu_currently        INTEGER,
        tests_total             INTEGER,
        loaded_at               TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (region_code, date)
    );
    CREATE INDEX IF NOT EXISTS idx_region_daily_region ON region_daily(region_code);
    CREATE INDEX IF NOT EXISTS idx_region_daily_date ON region_daily(date DESC);
    CREATE INDEX IF NOT EXISTS idx_region_daily_cases ON region_daily(cases_total DESC);
    CREATE INDEX IF NOT EXISTS idx_region_daily_deaths ON region_daily(deaths_total DESC);
"#;

const COLUMNS: &str = "region_code, region_name, date, \
    cases_total, cases_confirmed, deaths_total, deaths_confirmed, deaths_probable, \
    hospitalized_currently, hospitalized_cumulative, in_icu_currently, tests_total, loaded_at";

// Whole-row replacement on conflict; loaded_at records the last write
const UPSERT_SQL: &str = r#"
    INSERT INTO region_daily (
        region_code, region_name, date,
        cases_total, cases_confirmed, deaths_total, deaths_confirmed, deaths_probable,
        hospitalized_currently, hospitalized_cumulative, in_icu_currently, tests_total
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
    ON CONFLICT(region_code, date) DO UPDATE SET
        region_name             = excluded.region_name,
        cases_total             = excluded.cases_total,
        cases_confirmed         = excluded.cases_confirmed,
        deaths_total            = excluded.deaths_total,
        deaths_confirmed        = excluded.deaths_confirmed,
        deaths_probable         = excluded.deaths_probable,
        hospitalized_currently  = excluded.hospitalized_currently,
        hospitalized_cumulative = excluded.hospitalized_cumulative,
        in_icu_currently        = excluded.in_icu_currently,
        tests_total             = excluded.tests_total,
        loaded_at               = CURRENT_TIMESTAMP
"#;

// Phase one of every latest-per-region query: reduce each region to its max-date row.
// The national pseudo-region is a roll-up of the others and never takes part.
fn latest_rows_cte() -> String {
    format!(
        r#"
    WITH latest AS (
        SELECT region_code, MAX(date) AS max_date
        FROM region_daily
        WHERE region_code <> '{NATIONAL_REGION_CODE}'
        GROUP BY region_code
    ),
    latest_rows AS (
        SELECT r.*
        FROM region_daily r
        INNER JOIN latest l
            ON r.region_code = l.region_code
           AND r.date = l.max_date
    )
"#
    )
}

pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Opens (creating if needed) the database at `db_path` and ensures the schema exists.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { db_path };
        store.connect()?.execute_batch(SCHEMA_SQL)?;
        info!(path = %store.db_path.display(), "Store initialized");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    /// Inserts or fully replaces every record in one transaction. Returns the rows written.
    #[instrument(skip(self, records), fields(batch_size = records.len()))]
    pub fn upsert_batch(&self, records: &[CanonicalRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for record in records {
                let m = record.metrics();
                stmt.execute(params![
                    record.region_code(),
                    record.region_name(),
                    record.date().format(DATE_FORMAT).to_string(),
                    m.cases_total,
                    m.cases_confirmed,
                    m.deaths_total,
                    m.deaths_confirmed,
                    m.deaths_probable,
                    m.hospitalized_currently,
                    m.hospitalized_cumulative,
                    m.in_icu_currently,
                    m.tests_total,
                ])?;
            }
        }
        tx.commit()?;
        info!("Upserted {} records", records.len());
        Ok(records.len())
    }

    /// The row with the greatest date for `region_code`, if any.
    ///
    /// (region_code, date) is the primary key, so there is never a tie on date.
    pub fn latest_for_region(&self, region_code: &str) -> Result<Option<StoredRecord>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM region_daily WHERE region_code = ?1 ORDER BY date DESC LIMIT 1"
        );
        let row = conn
            .query_row(&sql, params![normalize_code(region_code)], RawRow::from_row)
            .optional()?;
        row.map(RawRow::into_stored).transpose()
    }

    /// Up to `limit` regions ranked by `metric`, one row per region.
    ///
    /// Without `as_of`, each region contributes its latest row. With `as_of`, only rows on
    /// that date are ranked. Regions lacking the metric sort last; ties break on region code.
    /// The national pseudo-region is never ranked.
    #[instrument(skip(self))]
    pub fn top_by(&self, metric: Metric, limit: usize, as_of: Option<NaiveDate>) -> Result<Vec<StoredRecord>> {
        let col = metric.column();
        let order = format!("ORDER BY {col} IS NULL, {col} DESC, region_code ASC");
        let conn = self.connect()?;
        let rows = match as_of {
            None => {
                let cte = latest_rows_cte();
                let sql = format!("{cte} SELECT {COLUMNS} FROM latest_rows {order} LIMIT ?1");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![limit as i64], RawRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            Some(date) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM region_daily WHERE date = ?2 AND region_code <> ?3 {order} LIMIT ?1"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        params![limit as i64, date.format(DATE_FORMAT).to_string(), NATIONAL_REGION_CODE],
                        RawRow::from_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        debug!(returned = rows.len(), "Top query complete");
        rows.into_iter().map(RawRow::into_stored).collect()
    }

    pub fn top_by_cases(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        self.top_by(Metric::Cases, limit, None)
    }

    pub fn top_by_deaths(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        self.top_by(Metric::Deaths, limit, None)
    }

    /// Up to `days` most recent rows for a region, newest first.
    pub fn time_series(&self, region_code: &str, days: usize) -> Result<Vec<StoredRecord>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM region_daily WHERE region_code = ?1 ORDER BY date DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![normalize_code(region_code), days as i64], RawRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRow::into_stored).collect()
    }

    /// Totals over each region's latest row. Absent metrics contribute nothing; the
    /// national pseudo-region is left out.
    pub fn summary(&self) -> Result<SummaryStats> {
        let conn = self.connect()?;
        let cte = latest_rows_cte();
        let sql = format!(
            "{cte}
            SELECT
                COUNT(DISTINCT region_code),
                COALESCE(SUM(cases_total), 0),
                COALESCE(SUM(deaths_total), 0),
                COALESCE(SUM(hospitalized_currently), 0),
                AVG(cases_total),
                MAX(date)
            FROM latest_rows"
        );
        let (total_regions, total_cases, total_deaths, total_hospitalized, avg, latest) =
            conn.query_row(&sql, [], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?;
        let latest_date = latest.as_deref().map(parse_stored_date).transpose()?;
        Ok(SummaryStats {
            total_regions,
            total_cases,
            total_deaths,
            total_hospitalized,
            avg_cases_per_region: avg,
            latest_date,
        })
    }

    /// Total stored rows.
    pub fn count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM region_daily", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Deletes every row. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.connect()?;
        let removed = conn.execute("DELETE FROM region_daily", [])?;
        info!(removed, "Store cleared");
        Ok(removed)
    }
}

fn normalize_code(region_code: &str) -> String {
    region_code.trim().to_uppercase()
}

fn parse_stored_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| EtlError::CorruptRow(format!("bad date '{raw}': {e}")))
}

/// Column values exactly as SQLite returns them, before validation.
struct RawRow {
    region_code: String,
    region_name: String,
    date: String,
    metrics: Metrics,
    loaded_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            region_code: row.get(0)?,
            region_name: row.get(1)?,
            date: row.get(2)?,
            metrics: Metrics {
                cases_total: row.get(3)?,
                cases_confirmed: row.get(4)?,
                deaths_total: row.get(5)?,
                deaths_confirmed: row.get(6)?,
                deaths_probable: row.get(7)?,
                hospitalized_currently: row.get(8)?,
                hospitalized_cumulative: row.get(9)?,
                in_icu_currently: row.get(10)?,
                tests_total: row.get(11)?,
            },
            loaded_at: row.get(12)?,
        })
    }

    fn into_stored(self) -> Result<StoredRecord> {
        let date = parse_stored_date(&self.date)?;
        let loaded_at = NaiveDateTime::parse_from_str(&self.loaded_at, TIMESTAMP_FORMAT)
            .map_err(|e| EtlError::CorruptRow(format!("bad loaded_at '{}': {e}", self.loaded_at)))?;
        let record = CanonicalRecord::new(&self.region_code, Some(&self.region_name), date, self.metrics)
            .map_err(|e| EtlError::CorruptRow(format!("{}/{}: {e}", self.region_code, self.date)))?;
        Ok(StoredRecord { record, loaded_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn record(code: &str, date: &str, cases: Option<i64>, deaths: Option<i64>) -> CanonicalRecord {
        let metrics = Metrics {
            cases_total: cases,
            deaths_total: deaths,
            ..Default::default()
        };
        CanonicalRecord::new(code, None, day(date), metrics).unwrap()
    }

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("data").join("epi.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn empty_store_answers_without_errors() {
        let (_dir, store) = temp_store();
        assert!(store.latest_for_region("CA").unwrap().is_none());
        assert!(store.top_by_cases(5).unwrap().is_empty());
        assert!(store.time_series("CA", 30).unwrap().is_empty());
        assert_eq!(store.summary().unwrap(), SummaryStats::default());
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.upsert_batch(&[]).unwrap(), 0);
    }

    #[test]
    fn latest_for_region_picks_max_date() {
        let (_dir, store) = temp_store();
        store
            .upsert_batch(&[
                record("CA", "2021-03-06", Some(10), None),
                record("CA", "2021-03-07", Some(20), None),
            ])
            .unwrap();

        let latest = store.latest_for_region("ca").unwrap().unwrap();
        assert_eq!(latest.record.date(), day("2021-03-07"));
        assert_eq!(latest.record.metrics().cases_total, Some(20));
    }

    #[test]
    fn reupsert_replaces_whole_row() {
        let (_dir, store) = temp_store();
        let first = CanonicalRecord::new(
            "NY",
            Some("New York"),
            day("2021-03-07"),
            Metrics {
                cases_total: Some(100),
                tests_total: Some(5000),
                ..Default::default()
            },
        )
        .unwrap();
        store.upsert_batch(&[first]).unwrap();

        // tests_total absent in the new row: no field-level merge, it becomes NULL
        store.upsert_batch(&[record("NY", "2021-03-07", Some(150), None)]).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let row = store.latest_for_region("NY").unwrap().unwrap();
        assert_eq!(row.record.metrics().cases_total, Some(150));
        assert_eq!(row.record.metrics().tests_total, None);
        assert_eq!(row.record.region_name(), "NY");
    }

    #[test]
    fn top_uses_latest_row_per_region() {
        let (_dir, store) = temp_store();
        store
            .upsert_batch(&[
                // TX's old row is larger than everyone's latest; it must not surface
                record("TX", "2021-03-01", Some(900), None),
                record("TX", "2021-03-07", Some(100), None),
                record("CA", "2021-03-07", Some(200), None),
                record("NY", "2021-03-07", Some(150), None),
            ])
            .unwrap();

        let top = store.top_by_cases(10).unwrap();
        let codes: Vec<&str> = top.iter().map(|r| r.record.region_code()).collect();
        assert_eq!(codes, vec!["CA", "NY", "TX"]);
        assert_eq!(top[2].record.metrics().cases_total, Some(100));
    }

    #[test]
    fn top_as_of_ranks_a_single_day() {
        let (_dir, store) = temp_store();
        store
            .upsert_batch(&[
                record("TX", "2021-03-01", Some(900), None),
                record("TX", "2021-03-07", Some(100), None),
                record("CA", "2021-03-01", Some(50), None),
            ])
            .unwrap();

        let top = store.top_by(Metric::Cases, 5, Some(day("2021-03-01"))).unwrap();
        let pairs: Vec<(&str, Option<i64>)> = top
            .iter()
            .map(|r| (r.record.region_code(), r.record.metrics().cases_total))
            .collect();
        assert_eq!(pairs, vec![("TX", Some(900)), ("CA", Some(50))]);
    }

    #[test]
    fn absent_metric_sorts_last() {
        let (_dir, store) = temp_store();
        store
            .upsert_batch(&[
                record("AK", "2021-03-07", None, None),
                record("WY", "2021-03-07", None, Some(3)),
                record("VT", "2021-03-07", None, Some(7)),
            ])
            .unwrap();

        let top = store.top_by_deaths(3).unwrap();
        let codes: Vec<&str> = top.iter().map(|r| r.record.region_code()).collect();
        assert_eq!(codes, vec!["VT", "WY", "AK"]);
    }

    #[test]
    fn national_rows_stay_out_of_region_aggregates() {
        let (_dir, store) = temp_store();
        store
            .upsert_batch(&[
                record("CA", "2021-03-07", Some(200), Some(4)),
                record("NY", "2021-03-07", Some(100), Some(2)),
                record(NATIONAL_REGION_CODE, "2021-03-07", Some(300), Some(6)),
            ])
            .unwrap();

        let stats = store.summary().unwrap();
        assert_eq!(stats.total_regions, 2);
        assert_eq!(stats.total_cases, 300);
        assert_eq!(stats.total_deaths, 6);

        let codes = |rows: Vec<StoredRecord>| -> Vec<String> {
            rows.iter().map(|r| r.record.region_code().to_string()).collect()
        };
        assert_eq!(codes(store.top_by_cases(5).unwrap()), vec!["CA", "NY"]);
        assert_eq!(
            codes(store.top_by(Metric::Deaths, 5, Some(day("2021-03-07"))).unwrap()),
            vec!["CA", "NY"]
        );
        // still reachable on its own
        let us = store.latest_for_region(NATIONAL_REGION_CODE).unwrap().unwrap();
        assert_eq!(us.record.metrics().cases_total, Some(300));
    }

    #[test]
    fn summary_skips_absent_values() {
        let (_dir, store) = temp_store();
        store
            .upsert_batch(&[
                record("CA", "2021-03-06", Some(1_000), Some(1)),
                record("CA", "2021-03-07", Some(300), Some(30)),
                record("NY", "2021-03-05", Some(100), None),
                record("GU", "2021-03-04", None, Some(2)),
            ])
            .unwrap();

        let stats = store.summary().unwrap();
        assert_eq!(stats.total_regions, 3);
        assert_eq!(stats.total_cases, 400);
        assert_eq!(stats.total_deaths, 32);
        assert_eq!(stats.total_hospitalized, 0);
        assert_eq!(stats.avg_cases_per_region, Some(200.0));
        assert_eq!(stats.latest_date, Some(day("2021-03-07")));
    }

    #[test]
    fn time_series_is_newest_first_and_bounded() {
        let (_dir, store) = temp_store();
        store
            .upsert_batch(&[
                record("WA", "2021-03-05", Some(1), None),
                record("WA", "2021-03-06", Some(2), None),
                record("WA", "2021-03-07", Some(3), None),
                record("OR", "2021-03-07", Some(9), None),
            ])
            .unwrap();

        let series = store.time_series("wa", 2).unwrap();
        let dates: Vec<NaiveDate> = series.iter().map(|r| r.record.date()).collect();
        assert_eq!(dates, vec![day("2021-03-07"), day("2021-03-06")]);
        assert!(store.time_series("WA", 0).unwrap().is_empty());
    }

    #[test]
    fn failed_batch_leaves_no_rows() {
        let (_dir, store) = temp_store();
        store
            .connect()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_zz BEFORE INSERT ON region_daily
                 WHEN NEW.region_code = 'ZZ'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let result = store.upsert_batch(&[
            record("WA", "2021-03-05", Some(1), None),
            record("ZZ", "2021-03-05", Some(2), None),
        ]);
        assert!(matches!(result, Err(EtlError::Database(_))));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn clear_removes_everything() {
        let (_dir, store) = temp_store();
        store
            .upsert_batch(&[record("WA", "2021-03-05", Some(1), None)])
            .unwrap();
        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn reopening_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epi.db");
        Store::open(&path)
            .unwrap()
            .upsert_batch(&[record("WA", "2021-03-05", Some(1), None)])
            .unwrap();
        assert_eq!(Store::open(&path).unwrap().count().unwrap(), 1);
    }
}
