// Region pipeline: extract -> normalize -> persist, plus the query surface over the store

pub mod normalize;

use chrono::{NaiveDate, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::constants::{NATIONAL_REGION_CODE, NATIONAL_REGION_NAME};
use crate::error::Result;
use crate::idempotency::{payload_sha256, run_fingerprint};
use crate::metrics::{
    RECORDS_ACCEPTED_TOTAL, RECORDS_FETCHED_TOTAL, RECORDS_REJECTED_TOTAL, REGION_FAILURES_TOTAL,
    REGION_RUN_DURATION_SECONDS,
};
use crate::schema::{CanonicalRecord, Metric, StoredRecord, SummaryStats};
use crate::storage::{IngestLog, RunRecord, RunStatus, Store};
use crate::types::{RawRecord, RegionInfo, RegionSource};
use normalize::{Normalizer, PathNormalizer};

/// Where a region run currently is. `Failed` is reachable from every other stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStage {
    Extract,
    Normalize,
    Persist,
    Done,
    Failed,
}

/// Which upstream series a run pulls.
#[derive(Debug, Clone, Copy)]
enum Fetch {
    Series,
    Current,
    National,
}

/// Per-run bookkeeping, turned into a ledger row when the run ends
struct RegionRun {
    run_id: Uuid,
    source: &'static str,
    region_code: String,
    started: Instant,
    started_at: i64,
    stage: RunStage,
    fetched: usize,
    accepted: usize,
    rejected: usize,
    payload_sha256: Option<String>,
    error: Option<String>,
}

impl RegionRun {
    fn start(source: &'static str, region_code: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source,
            region_code: region_code.to_string(),
            started: Instant::now(),
            started_at: Utc::now().timestamp(),
            stage: RunStage::Extract,
            fetched: 0,
            accepted: 0,
            rejected: 0,
            payload_sha256: None,
            error: None,
        }
    }

    fn enter(&mut self, stage: RunStage) {
        debug!(region = %self.region_code, from = ?self.stage, to = ?stage, "Stage transition");
        self.stage = stage;
    }

    fn fail(&mut self, message: String) {
        self.enter(RunStage::Failed);
        self.error = Some(message);
    }

    fn into_record(self) -> RunRecord {
        let status = match self.stage {
            RunStage::Failed => RunStatus::Failed,
            _ if self.accepted == 0 => RunStatus::NoData,
            _ => RunStatus::Done,
        };
        let fingerprint = self
            .payload_sha256
            .as_deref()
            .map(|sha| run_fingerprint(self.source, &self.region_code, sha));
        RunRecord {
            run_id: self.run_id,
            source: self.source.to_string(),
            region_code: self.region_code,
            started_at: self.started_at,
            finished_at: Utc::now().timestamp(),
            payload_sha256: self.payload_sha256,
            fingerprint,
            fetched: self.fetched,
            accepted: self.accepted,
            rejected: self.rejected,
            status,
            error: self.error,
        }
    }
}

/// A region that failed during an all-regions run
#[derive(Debug, Clone, Serialize)]
pub struct RegionFailure {
    pub region_code: String,
    pub error: String,
}

/// Result of a complete all-regions run
#[derive(Debug, Default, Serialize)]
pub struct RunAllReport {
    pub regions_attempted: usize,
    pub regions_succeeded: usize,
    pub regions_failed: usize,
    pub total_accepted: usize,
    pub failures: Vec<RegionFailure>,
}

pub struct Pipeline {
    source: Box<dyn RegionSource>,
    normalizer: Box<dyn Normalizer + Send + Sync>,
    store: Store,
    ingest_log: Option<IngestLog>,
}

impl Pipeline {
    pub fn new(source: Box<dyn RegionSource>, store: Store) -> Self {
        Self {
            source,
            normalizer: Box::new(PathNormalizer::default()),
            store,
            ingest_log: None,
        }
    }

    /// Store and ledger at the configured path. A ledger that cannot be opened is logged
    /// and left out; it never blocks ingestion.
    pub fn from_config(config: &Config, source: Box<dyn RegionSource>) -> Result<Self> {
        let store = Store::open(&config.db_path)?;
        let pipeline = Self::new(source, store);
        match IngestLog::open_beside(&config.db_path) {
            Ok(log) => Ok(pipeline.with_ingest_log(log)),
            Err(e) => {
                warn!("Ingest ledger unavailable, continuing without it: {:#}", e);
                Ok(pipeline)
            }
        }
    }

    pub fn with_ingest_log(mut self, log: IngestLog) -> Self {
        self.ingest_log = Some(log);
        self
    }

    pub fn with_normalizer(mut self, normalizer: Box<dyn Normalizer + Send + Sync>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Ingest one region's full history. Returns the accepted records; empty means no data.
    pub async fn run_region(&self, code: &str) -> Result<Vec<CanonicalRecord>> {
        let region = self.resolve_region(code).await;
        self.run(&region, Fetch::Series).await
    }

    /// Ingest only the region's current snapshot.
    pub async fn refresh_current(&self, code: &str) -> Result<Option<CanonicalRecord>> {
        let region = self.resolve_region(code).await;
        Ok(self.run(&region, Fetch::Current).await?.into_iter().next())
    }

    /// The region as the source lists it, so single-region runs store the same name as
    /// all-regions runs. Unlisted codes, or a listing failure, leave the name unset.
    async fn resolve_region(&self, code: &str) -> RegionInfo {
        let code = code.trim().to_uppercase();
        match self.source.list_regions().await {
            Ok(regions) => {
                let name = regions
                    .into_iter()
                    .find(|r| r.code.trim().eq_ignore_ascii_case(&code))
                    .and_then(|r| r.name);
                RegionInfo::new(code, name)
            }
            Err(e) => {
                warn!("Could not list regions to resolve {}'s name: {}", code, e);
                RegionInfo::new(code, None)
            }
        }
    }

    /// Ingest the whole-country series as its own pseudo-region.
    pub async fn run_national(&self) -> Result<Vec<CanonicalRecord>> {
        let region = RegionInfo::new(NATIONAL_REGION_CODE, Some(NATIONAL_REGION_NAME.to_string()));
        self.run(&region, Fetch::National).await
    }

    /// Ingest every listed region (the first `limit`, if given). Returns the total accepted.
    pub async fn run_all(&self, limit: Option<usize>) -> Result<usize> {
        Ok(self.run_all_with_report(limit).await?.total_accepted)
    }

    /// Like [`Pipeline::run_all`], with per-region outcomes. Regions run one after another;
    /// a failing region is logged and skipped. Only a failure to list regions is an error.
    #[instrument(skip(self), fields(source = self.source.source_name()))]
    pub async fn run_all_with_report(&self, limit: Option<usize>) -> Result<RunAllReport> {
        info!("🚀 Starting pipeline for all regions");
        let mut regions = self.source.list_regions().await.map_err(|e| {
            error!("Pipeline failed: could not list regions: {}", e);
            e
        })?;
        if let Some(limit) = limit {
            regions.truncate(limit);
        }

        let mut report = RunAllReport::default();
        for region in regions {
            if region.code.trim().is_empty() {
                continue;
            }
            report.regions_attempted += 1;
            match self.run(&region, Fetch::Series).await {
                Ok(records) => {
                    report.regions_succeeded += 1;
                    report.total_accepted += records.len();
                }
                Err(e) => {
                    error!("Failed to process {}: {}", region.code, e);
                    counter!(REGION_FAILURES_TOTAL, "region" => region.code.clone()).increment(1);
                    report.regions_failed += 1;
                    report.failures.push(RegionFailure {
                        region_code: region.code.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "✅ Pipeline completed. Loaded {} total records ({} regions ok, {} failed)",
            report.total_accepted, report.regions_succeeded, report.regions_failed
        );
        Ok(report)
    }

    async fn run(&self, region: &RegionInfo, fetch: Fetch) -> Result<Vec<CanonicalRecord>> {
        let mut run = RegionRun::start(self.source.source_name(), &region.code);
        let outcome = self.execute(region, fetch, &mut run).await;
        if let Err(e) = &outcome {
            error!("Pipeline failed for {} during {:?}: {}", region.code, run.stage, e);
            run.fail(e.to_string());
        }
        self.finish(run);
        outcome
    }

    #[instrument(skip(self, region, run), fields(region = %region.code))]
    async fn execute(&self, region: &RegionInfo, fetch: Fetch, run: &mut RegionRun) -> Result<Vec<CanonicalRecord>> {
        info!("Extracting data for {}", region.code);
        let raws = match fetch {
            Fetch::Series => self.source.fetch_region_series(&region.code).await?,
            Fetch::Current => vec![self.source.fetch_region_current(&region.code).await?],
            Fetch::National => self.source.fetch_national_series().await?,
        };
        self.process(region, &raws, run)
    }

    fn process(&self, region: &RegionInfo, raws: &[RawRecord], run: &mut RegionRun) -> Result<Vec<CanonicalRecord>> {
        run.fetched = raws.len();
        run.payload_sha256 = Some(payload_sha256(raws));
        counter!(RECORDS_FETCHED_TOTAL, "region" => region.code.clone()).increment(raws.len() as u64);

        run.enter(RunStage::Normalize);
        let batch = self.normalizer.normalize_batch(raws, region);
        run.rejected = batch.rejected.len();
        counter!(RECORDS_REJECTED_TOTAL, "region" => region.code.clone()).increment(batch.rejected.len() as u64);

        if batch.records.is_empty() {
            warn!("No valid records found for {}", region.code);
            run.enter(RunStage::Done);
            return Ok(Vec::new());
        }

        run.enter(RunStage::Persist);
        self.store.upsert_batch(&batch.records)?;
        run.accepted = batch.records.len();
        counter!(RECORDS_ACCEPTED_TOTAL, "region" => region.code.clone()).increment(batch.records.len() as u64);

        run.enter(RunStage::Done);
        info!("Completed {}: {} accepted, {} rejected", region.code, run.accepted, run.rejected);
        Ok(batch.records)
    }

    fn finish(&self, run: RegionRun) {
        histogram!(REGION_RUN_DURATION_SECONDS, "region" => run.region_code.clone())
            .record(run.started.elapsed().as_secs_f64());
        if let Some(log) = &self.ingest_log {
            if let Err(e) = log.record_run(&run.into_record()) {
                warn!("Failed to write ingest ledger entry: {:#}", e);
            }
        }
    }

    pub fn query_top(&self, metric: Metric, limit: usize, as_of: Option<NaiveDate>) -> Result<Vec<StoredRecord>> {
        self.store.top_by(metric, limit, as_of)
    }

    pub fn query_top_cases(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        self.store.top_by_cases(limit)
    }

    pub fn query_top_deaths(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        self.store.top_by_deaths(limit)
    }

    pub fn query_region(&self, code: &str) -> Result<Option<StoredRecord>> {
        self.store.latest_for_region(code)
    }

    pub fn query_time_series(&self, code: &str, days: usize) -> Result<Vec<StoredRecord>> {
        self.store.time_series(code, days)
    }

    pub fn query_summary(&self) -> Result<SummaryStats> {
        self.store.summary()
    }

    /// Latest ledger entries; empty when the pipeline runs without a ledger.
    pub fn recent_runs(&self, limit: usize) -> anyhow::Result<Vec<RunRecord>> {
        match &self.ingest_log {
            Some(log) => log.recent_runs(limit),
            None => Ok(Vec::new()),
        }
    }
}
