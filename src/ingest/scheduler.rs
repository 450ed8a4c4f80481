// src/ingest/scheduler.rs
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::ingest::job::JobQueue;
use crate::ingest::types::ProviderSelector;

#[derive(Clone, Copy, Debug)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
    pub selector: ProviderSelector,
}

/// Submit an ingestion job every `interval_secs`, starting immediately.
/// Provider cooldowns still apply, so a short interval mostly yields skips.
pub fn spawn_scheduler(queue: JobQueue, cfg: IngestSchedulerCfg) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match queue.submit(cfg.selector) {
                Ok(job_id) => {
                    tracing::info!(target: "ingest", %job_id, source = %cfg.selector, "scheduled ingest tick")
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", error = %e, "scheduler stopping");
                    break;
                }
            }
        }
    })
}
