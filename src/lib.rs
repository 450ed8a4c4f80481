// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::error::{ProviderError, StoreError, SubmitError};
pub use crate::ingest::{
    CanonicalDealRecord, IngestPipeline, JobQueue, ProviderKind, ProviderSelector,
};

use std::sync::Arc;

use anyhow::Result;

/// Build the production pipeline from config and start its job queue.
/// Must be called inside a tokio runtime.
pub fn start_queue(cfg: &config::IngestConfig) -> Result<(JobQueue, Arc<IngestPipeline>)> {
    let pipeline = Arc::new(IngestPipeline::from_config(cfg)?);
    let queue = JobQueue::start(pipeline.clone());
    tracing::info!(
        providers = ?pipeline.orchestrator().provider_names(),
        db = %cfg.database_path.display(),
        "ingestion pipeline ready"
    );
    Ok((queue, pipeline))
}
