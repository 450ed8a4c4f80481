// tests/metrics_ingest.rs
#![cfg(feature = "strict-metrics")]
mod common;

use std::sync::Arc;

use common::{boxed, flight_record, StaticProvider};
use deal_ingest::config::RateLimitConfig;
use deal_ingest::ingest::job::{IngestPipeline, JobQueue};
use deal_ingest::ingest::orchestrator::FetchOrchestrator;
use deal_ingest::ingest::store::SqliteDealStore;
use deal_ingest::ingest::types::{ProviderKind, ProviderSelector};
use deal_ingest::ingest::upsert::Upserter;
use deal_ingest::metrics::Metrics;

#[tokio::test]
async fn metrics_exposed_after_ingest() {
    let metrics = Metrics::init(&RateLimitConfig::default()).expect("recorder");

    let (limiter, _clock) = common::manual_limiter();
    let flight = StaticProvider::ok(ProviderKind::Flight, vec![flight_record("F1", 10)]);
    let hotel = StaticProvider::failing(ProviderKind::Hotel);
    let store = Arc::new(SqliteDealStore::open_in_memory().unwrap());
    let pipeline = IngestPipeline::new(
        FetchOrchestrator::new(vec![boxed(flight), boxed(hotel)], limiter),
        Upserter::new(store),
    );
    let queue = JobQueue::start(Arc::new(pipeline));
    let id = queue.submit(ProviderSelector::All).unwrap();
    queue.wait(id).await.expect("job finishes");

    // Scrape metrics text and check series presence by substring
    let out = metrics.handle.render();
    assert!(out.contains("ingest_records_total"));
    assert!(out.contains("ingest_provider_errors_total"));
    assert!(out.contains("ingest_upsert_inserted_total"));
    assert!(out.contains("ingest_fetch_ms"));
    assert!(out.contains("ingest_jobs_total"));
    assert!(out.contains("ingest_rate_limit_cooldown_secs 1800"));
}
