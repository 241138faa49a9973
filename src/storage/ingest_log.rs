use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Outcome of one region run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    NoData,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Done => "done",
            RunStatus::NoData => "no_data",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "done" => Ok(RunStatus::Done),
            "no_data" => Ok(RunStatus::NoData),
            "failed" => Ok(RunStatus::Failed),
            other => anyhow::bail!("unknown run status '{other}'"),
        }
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub source: String,
    pub region_code: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub payload_sha256: Option<String>,
    pub fingerprint: Option<String>,
    pub fetched: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub status: RunStatus,
    pub error: Option<String>,
}

/// Append-only record of region runs, kept in its own SQLite file beside the store.
pub struct IngestLog {
    db_path: PathBuf,
}

impl IngestLog {
    /// Ledger for the store at `store_path`: `<store dir>/ingest_log/meta.db`.
    pub fn open_beside<P: AsRef<Path>>(store_path: P) -> anyhow::Result<Self> {
        let dir = store_path
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::open_at(dir.join("ingest_log").join("meta.db"))
    }

    pub fn open_at<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = Self { db_path };
        log.connect()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS ingest_runs (
                run_id          TEXT PRIMARY KEY,
                source          TEXT NOT NULL,
                region_code     TEXT NOT NULL,
                started_at      INTEGER NOT NULL,
                finished_at     INTEGER NOT NULL,
                payload_sha256  TEXT,
                fingerprint     TEXT,
                fetched         INTEGER NOT NULL,
                accepted        INTEGER NOT NULL,
                rejected        INTEGER NOT NULL,
                status          TEXT NOT NULL,
                error           TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_ingest_runs_finished ON ingest_runs(finished_at DESC);
            "#,
        )?;
        Ok(log)
    }

    fn connect(&self) -> anyhow::Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    pub fn record_run(&self, run: &RunRecord) -> anyhow::Result<()> {
        self.connect()?.execute(
            "INSERT INTO ingest_runs (
                run_id, source, region_code, started_at, finished_at, payload_sha256,
                fingerprint, fetched, accepted, rejected, status, error
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.run_id.to_string(),
                run.source,
                run.region_code,
                run.started_at,
                run.finished_at,
                run.payload_sha256,
                run.fingerprint,
                run.fetched as i64,
                run.accepted as i64,
                run.rejected as i64,
                run.status.as_str(),
                run.error,
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> anyhow::Result<Vec<RunRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, source, region_code, started_at, finished_at, payload_sha256,
                    fingerprint, fetched, accepted, rejected, status, error
             FROM ingest_runs
             ORDER BY finished_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            let run_id: String = row.get(0)?;
            let status: String = row.get(10)?;
            runs.push(RunRecord {
                run_id: Uuid::parse_str(&run_id)?,
                source: row.get(1)?,
                region_code: row.get(2)?,
                started_at: row.get(3)?,
                finished_at: row.get(4)?,
                payload_sha256: row.get(5)?,
                fingerprint: row.get(6)?,
                fetched: row.get::<_, i64>(7)? as usize,
                accepted: row.get::<_, i64>(8)? as usize,
                rejected: row.get::<_, i64>(9)? as usize,
                status: RunStatus::parse(&status)?,
                error: row.get(11)?,
            });
        }
        Ok(runs)
    }
}
