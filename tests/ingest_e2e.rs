// tests/ingest_e2e.rs
//
// Full cycle through the job queue: wiremock provider -> orchestrator ->
// upserter -> in-memory SQLite, with a controllable rate-limit clock.
mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::Notify;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{boxed, StaticProvider};
use deal_ingest::config::IngestConfig;
use deal_ingest::error::ProviderError;
use deal_ingest::ingest::job::{IngestPipeline, JobQueue, JobRegistry, JobStatus};
use deal_ingest::ingest::orchestrator::{FetchOrchestrator, ProviderStatus};
use deal_ingest::ingest::providers::FlightProvider;
use deal_ingest::ingest::store::{DealStore, SqliteDealStore};
use deal_ingest::ingest::types::{
    CanonicalDealRecord, DealProvider, NaturalKey, ProviderKind, ProviderSelector,
};
use deal_ingest::ingest::upsert::Upserter;

async fn mount_flight(server: &MockServer, price: i64) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/v3/flights/live/search/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "flights": [
                { "origin": "JFK", "destination": "LHR", "carrier": "BA", "price": price, "id": "F123" }
            ] }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn reingesting_same_id_updates_price_without_new_row() {
    let server = MockServer::start().await;
    let (limiter, clock) = common::manual_limiter();
    let store = Arc::new(SqliteDealStore::open_in_memory().unwrap());
    let flight =
        FlightProvider::new(common::flight_cfg(&server.uri()), common::fast_policy(1)).unwrap();
    let pipeline = Arc::new(IngestPipeline::new(
        FetchOrchestrator::new(vec![boxed(flight)], limiter),
        Upserter::new(store.clone()),
    ));
    let queue = JobQueue::start(pipeline);
    let key = NaturalKey {
        source: "flight-provider".into(),
        source_id: "F123".into(),
    };

    mount_flight(&server, 450).await;
    let first = queue.submit(ProviderSelector::All).unwrap();
    let rec = queue.wait(first).await.expect("known job");
    assert_eq!(rec.status, JobStatus::Succeeded);
    assert_eq!(rec.summary.as_ref().unwrap().inserted, 1);

    let stored = store.get(&key).unwrap().expect("row after first run");
    assert_eq!(stored.record.title, "Flight: JFK to LHR");
    assert_eq!(stored.record.price.amount, Decimal::from(450));
    assert_eq!(stored.record.price.currency, "USD");
    let until = stored.record.valid_until.expect("validity");
    assert!((until - (Utc::now() + Duration::days(7))).num_seconds().abs() < 60);

    // Next cycle after the cooldown carries a new price.
    clock.advance(Duration::minutes(31));
    mount_flight(&server, 500).await;
    let second = queue.submit(ProviderSelector::All).unwrap();
    let rec = queue.wait(second).await.expect("known job");
    let summary = rec.summary.expect("summary");
    assert_eq!((summary.inserted, summary.updated), (0, 1));

    let stored = store.get(&key).unwrap().expect("row after second run");
    assert_eq!(stored.record.price.amount, Decimal::from(500));
    assert_eq!(store.count().unwrap(), 1);
}

#[tokio::test]
async fn job_succeeds_with_partial_provider_failure() {
    let (limiter, _clock) = common::manual_limiter();
    let store = Arc::new(SqliteDealStore::open_in_memory().unwrap());
    let hotel = StaticProvider::failing(ProviderKind::Hotel);
    let flight = StaticProvider::ok(
        ProviderKind::Flight,
        vec![common::flight_record("F1", 10), common::flight_record("F2", 20)],
    );
    let pipeline = Arc::new(IngestPipeline::new(
        FetchOrchestrator::new(vec![boxed(flight), boxed(hotel)], limiter),
        Upserter::new(store.clone()),
    ));
    let queue = JobQueue::start(pipeline);

    let id = queue.submit(ProviderSelector::All).unwrap();
    let rec = queue.wait(id).await.unwrap();
    assert_eq!(rec.status, JobStatus::Succeeded);
    let summary = rec.summary.unwrap();
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.failed_providers, 1);
    assert!(matches!(
        summary.providers[1].status,
        ProviderStatus::Failed { .. }
    ));
    assert_eq!(store.count().unwrap(), 2);
}

/// Blocks inside `fetch` until the test releases it.
struct GatedProvider {
    gate: Arc<Notify>,
}

#[async_trait]
impl DealProvider for GatedProvider {
    async fn fetch(&self) -> Result<Vec<CanonicalDealRecord>, ProviderError> {
        self.gate.notified().await;
        Ok(vec![common::flight_record("G1", 42)])
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Flight
    }
}

#[tokio::test]
async fn submit_returns_while_the_job_is_still_running() {
    let (limiter, _clock) = common::manual_limiter();
    let store = Arc::new(SqliteDealStore::open_in_memory().unwrap());
    let gate = Arc::new(Notify::new());
    let pipeline = Arc::new(IngestPipeline::new(
        FetchOrchestrator::new(vec![boxed(GatedProvider { gate: gate.clone() })], limiter),
        Upserter::new(store.clone()),
    ));
    let queue = JobQueue::start(pipeline);

    let id = queue.submit(ProviderSelector::All).unwrap();
    let snapshot = queue.status(id).expect("registered on submit");
    assert!(matches!(snapshot.status, JobStatus::Queued | JobStatus::Running));

    // The job reaches the provider and parks there.
    tokio::time::timeout(StdDuration::from_secs(5), async {
        while queue.status(id).map(|r| r.status) != Some(JobStatus::Running) {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await
    .expect("job starts running");
    assert!(queue.status(id).unwrap().finished_at.is_none());
    assert_eq!(store.count().unwrap(), 0);

    gate.notify_one();
    let done = queue.wait(id).await.unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.summary.unwrap().inserted, 1);
    assert!(queue.wait(uuid::Uuid::new_v4()).await.is_none());
}

#[tokio::test]
async fn finished_jobs_beyond_retention_are_evicted_oldest_first() {
    let (limiter, _clock) = common::manual_limiter();
    let store = Arc::new(SqliteDealStore::open_in_memory().unwrap());
    let pipeline = Arc::new(IngestPipeline::new(
        FetchOrchestrator::new(vec![], limiter),
        Upserter::new(store),
    ));
    let queue = JobQueue::start_with_registry(pipeline, JobRegistry::with_retention(2));

    let mut ids = Vec::new();
    for _ in 0..4 {
        let id = queue.submit(ProviderSelector::All).unwrap();
        queue.wait(id).await.expect("job finishes");
        ids.push(id);
    }

    assert_eq!(queue.registry().len(), 2);
    assert!(queue.status(ids[0]).is_none());
    assert!(queue.status(ids[1]).is_none());
    assert!(queue.status(ids[2]).is_some());
    assert!(queue.status(ids[3]).is_some());
}

#[tokio::test]
async fn cooldown_holds_across_pipelines_built_from_one_config() {
    let server = MockServer::start().await;
    // Counted on drop: only the first run may reach the provider.
    Mock::given(method("GET"))
        .and(path("/v3/flights/live/search/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "flights": [] } })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut cfg = IngestConfig {
        database_path: dir.path().join("deals.sqlite"),
        ..IngestConfig::default()
    };
    cfg.flight = common::flight_cfg(&server.uri());
    cfg.hotel.enabled = false;
    cfg.http.max_attempts = 1;

    // Two separate runs of the CLI each build their own pipeline.
    let first = IngestPipeline::from_config(&cfg).unwrap();
    let out = first.orchestrator().fetch_all(ProviderSelector::All).await;
    assert_eq!(out.reports[0].status, ProviderStatus::Fetched { count: 0 });
    drop(first);

    let second = IngestPipeline::from_config(&cfg).unwrap();
    let out = second.orchestrator().fetch_all(ProviderSelector::All).await;
    assert_eq!(out.reports[0].status, ProviderStatus::Skipped);
}
