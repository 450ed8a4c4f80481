// src/ingest/job.rs
//! Asynchronous ingestion jobs and the queue that runs them.
//!
//! A trigger only learns whether its job was accepted. Outcomes are recorded
//! in the [`JobRegistry`], where they can be polled or awaited, and in logs.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::SubmitError;
use crate::ingest::orchestrator::{FetchOrchestrator, ProviderReport};
use crate::ingest::providers::build_providers;
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::store::{DealStore, SqliteDealStore};
use crate::ingest::types::ProviderSelector;
use crate::ingest::upsert::Upserter;

pub type JobId = Uuid;

/// Everything one ingestion cycle needs, shared by all jobs.
pub struct IngestPipeline {
    orchestrator: FetchOrchestrator,
    upserter: Upserter,
}

impl IngestPipeline {
    pub fn new(orchestrator: FetchOrchestrator, upserter: Upserter) -> Self {
        Self {
            orchestrator,
            upserter,
        }
    }

    /// Production wiring: configured providers, plus rate-limit state and deals
    /// in the same SQLite file, so cooldowns survive across process runs.
    pub fn from_config(cfg: &IngestConfig) -> Result<Self> {
        let providers = build_providers(cfg).context("building providers")?;
        let limiter = RateLimiter::sqlite(&cfg.database_path, cfg.rate_limit.policy())
            .context("opening rate-limit store")?;
        let store = SqliteDealStore::open(&cfg.database_path)
            .with_context(|| format!("opening deal store {}", cfg.database_path.display()))?;
        let store: Arc<dyn DealStore> = Arc::new(store);
        Ok(Self::new(
            FetchOrchestrator::new(providers, limiter),
            Upserter::new(store),
        ))
    }

    pub fn store(&self) -> &Arc<dyn DealStore> {
        self.upserter.store()
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    pub source: ProviderSelector,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed_upserts: usize,
    pub skipped_providers: usize,
    pub failed_providers: usize,
    pub providers: Vec<ProviderReport>,
    pub duration_ms: u64,
}

/// One fetch -> upsert cycle for a provider selector.
pub struct IngestionJob {
    pipeline: Arc<IngestPipeline>,
    selector: ProviderSelector,
}

impl IngestionJob {
    pub fn new(pipeline: Arc<IngestPipeline>, selector: ProviderSelector) -> Self {
        Self { pipeline, selector }
    }

    pub async fn run(&self) -> Result<IngestionSummary> {
        let t0 = std::time::Instant::now();
        let outcome = self.pipeline.orchestrator.fetch_all(self.selector).await;
        let skipped_providers = outcome.skipped();
        let failed_providers = outcome.failed();
        let fetched = outcome.records.len();

        // SQLite writes block; keep them off the async workers.
        let upserter = self.pipeline.upserter.clone();
        let records = outcome.records;
        let report = tokio::task::spawn_blocking(move || upserter.upsert(&records))
            .await
            .context("upsert task")?;

        let summary = IngestionSummary {
            source: self.selector,
            fetched,
            inserted: report.inserted,
            updated: report.updated,
            failed_upserts: report.failed,
            skipped_providers,
            failed_providers,
            providers: outcome.reports,
            duration_ms: t0.elapsed().as_millis() as u64,
        };

        tracing::info!(
            target: "ingest",
            source = %summary.source,
            fetched = summary.fetched,
            inserted = summary.inserted,
            updated = summary.updated,
            failed_upserts = summary.failed_upserts,
            skipped_providers = summary.skipped_providers,
            failed_providers = summary.failed_providers,
            duration_ms = summary.duration_ms,
            "ingestion finished"
        );
        Ok(summary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub source: ProviderSelector,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Option<IngestionSummary>,
    pub error: Option<String>,
}

/// Finished records kept for polling before the oldest are evicted.
pub const DEFAULT_RETAINED_JOBS: usize = 1_000;

/// Polling-accessible job results. Queued and running jobs are always kept;
/// finished ones are capped at `retain_finished`, oldest evicted first.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    changed: Notify,
    retain_finished: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_JOBS)
    }
}

impl JobRegistry {
    pub fn with_retention(retain_finished: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            changed: Notify::new(),
            retain_finished,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.read().get(&id).cloned()
    }

    fn insert(&self, record: JobRecord) {
        {
            let mut jobs = self.jobs.write();
            jobs.insert(record.id, record);
            Self::evict_finished(&mut jobs, self.retain_finished);
        }
        self.changed.notify_waiters();
    }

    fn evict_finished(jobs: &mut HashMap<JobId, JobRecord>, keep: usize) {
        let mut finished: Vec<(DateTime<Utc>, JobId)> = jobs
            .values()
            .filter(|r| r.status.is_terminal())
            .map(|r| (r.finished_at.unwrap_or(r.submitted_at), r.id))
            .collect();
        if finished.len() <= keep {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - keep;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
        }
    }

    fn update(&self, id: JobId, f: impl FnOnce(&mut JobRecord)) {
        {
            let mut jobs = self.jobs.write();
            if let Some(r) = jobs.get_mut(&id) {
                f(r);
            }
            Self::evict_finished(&mut jobs, self.retain_finished);
        }
        self.changed.notify_waiters();
    }

    fn remove(&self, id: JobId) {
        self.jobs.write().remove(&id);
        self.changed.notify_waiters();
    }

    /// Resolves once the job reaches a terminal status. `None` for unknown ids.
    pub async fn wait(&self, id: JobId) -> Option<JobRecord> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.get(id) {
                None => return None,
                Some(r) if r.status.is_terminal() => return Some(r),
                Some(_) => notified.await,
            }
        }
    }
}

struct QueuedJob {
    id: JobId,
    selector: ProviderSelector,
}

/// Work queue for ingestion jobs. Cheap to clone; all clones feed the same
/// dispatcher.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    registry: Arc<JobRegistry>,
}

impl JobQueue {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn start(pipeline: Arc<IngestPipeline>) -> Self {
        Self::start_with_registry(pipeline, JobRegistry::default())
    }

    pub fn start_with_registry(pipeline: Arc<IngestPipeline>, registry: JobRegistry) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();
        let registry = Arc::new(registry);

        let reg = registry.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                tokio::spawn(execute(pipeline.clone(), reg.clone(), job));
            }
            tracing::debug!("ingestion queue closed");
        });

        Self { tx, registry }
    }

    /// Accept a job for asynchronous execution. Success means only that the
    /// job was queued.
    pub fn submit(&self, selector: ProviderSelector) -> Result<JobId, SubmitError> {
        let id = Uuid::new_v4();
        self.registry.insert(JobRecord {
            id,
            source: selector,
            status: JobStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            summary: None,
            error: None,
        });
        if self.tx.send(QueuedJob { id, selector }).is_err() {
            self.registry.remove(id);
            return Err(SubmitError::QueueClosed);
        }
        tracing::info!(job_id = %id, source = %selector, "ingestion job submitted");
        Ok(id)
    }

    pub fn status(&self, id: JobId) -> Option<JobRecord> {
        self.registry.get(id)
    }

    pub async fn wait(&self, id: JobId) -> Option<JobRecord> {
        self.registry.wait(id).await
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }
}

/// Run one job to completion. Errors and panics end up in the registry and
/// the log, never with the submitter.
async fn execute(pipeline: Arc<IngestPipeline>, registry: Arc<JobRegistry>, job: QueuedJob) {
    let QueuedJob { id, selector } = job;
    registry.update(id, |r| {
        r.status = JobStatus::Running;
        r.started_at = Some(Utc::now());
    });

    let handle = tokio::spawn(async move { IngestionJob::new(pipeline, selector).run().await });
    let result = match handle.await {
        Ok(res) => res,
        Err(e) if e.is_panic() => Err(anyhow!("ingestion job panicked")),
        Err(e) => Err(anyhow!("ingestion job aborted: {e}")),
    };

    let status = match &result {
        Ok(_) => JobStatus::Succeeded,
        Err(e) => {
            tracing::error!(job_id = %id, source = %selector, error = ?e, "ingestion job failed");
            JobStatus::Failed
        }
    };
    counter!("ingest_jobs_total", "status" => status.as_str()).increment(1);
    gauge!("ingest_pipeline_last_run_ts").set(Utc::now().timestamp() as f64);

    registry.update(id, |r| {
        r.status = status;
        r.finished_at = Some(Utc::now());
        match result {
            Ok(summary) => r.summary = Some(summary),
            Err(e) => r.error = Some(format!("{e:#}")),
        }
    });
}
