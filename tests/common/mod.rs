// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use deal_ingest::config::{FlightConfig, HotelConfig};
use deal_ingest::error::ProviderError;
use deal_ingest::ingest::http::RetryPolicy;
use deal_ingest::ingest::rate_limit::{
    InMemoryRateLimitStore, ManualClock, RateLimitPolicy, RateLimiter,
};
use deal_ingest::ingest::types::{
    CanonicalDealRecord, DealCategory, DealProvider, Price, ProviderKind,
};

/// Retries kept short so failure tests stay fast.
pub fn fast_policy(max_attempts: u8) -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_secs(5),
        max_attempts,
        base_backoff: Duration::from_millis(5),
    }
}

pub fn flight_cfg(base_url: &str) -> FlightConfig {
    FlightConfig {
        base_url: base_url.to_string(),
        api_host: "flights.test".to_string(),
        api_key: "test-key".to_string(),
        ..FlightConfig::default()
    }
}

pub fn hotel_cfg(base_url: &str) -> HotelConfig {
    HotelConfig {
        base_url: base_url.to_string(),
        token_url: format!("{base_url}/v1/security/oauth2/token"),
        client_id: "cid".to_string(),
        client_secret: "secret".to_string(),
        ..HotelConfig::default()
    }
}

/// 30 min cooldown, 60 min state TTL, on a clock the test controls.
pub fn manual_limiter() -> (RateLimiter, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = Arc::new(InMemoryRateLimitStore::new(clock.clone()));
    let limiter = RateLimiter::new(
        store,
        clock.clone(),
        RateLimitPolicy {
            cooldown: ChronoDuration::minutes(30),
            state_ttl: ChronoDuration::minutes(60),
        },
    );
    (limiter, clock)
}

pub fn flight_record(id: &str, price: i64) -> CanonicalDealRecord {
    CanonicalDealRecord {
        title: format!("Flight {id}"),
        description: None,
        category: DealCategory::Flight,
        price: Price::new(Decimal::from(price), None),
        source: ProviderKind::Flight.name().to_string(),
        source_id: id.to_string(),
        source_id_synthetic: false,
        payload: json!({ "id": id, "price": price }),
        valid_until: None,
        url: None,
    }
}

/// In-process provider returning a canned result and counting calls.
pub struct StaticProvider {
    pub kind: ProviderKind,
    pub records: Vec<CanonicalDealRecord>,
    pub fail: bool,
    pub calls: Arc<AtomicUsize>,
}

impl StaticProvider {
    pub fn ok(kind: ProviderKind, records: Vec<CanonicalDealRecord>) -> Self {
        Self {
            kind,
            records,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(kind: ProviderKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
            fail: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl DealProvider for StaticProvider {
    async fn fetch(&self) -> Result<Vec<CanonicalDealRecord>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Network("connection refused".into()));
        }
        Ok(self.records.clone())
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

pub fn boxed(p: impl DealProvider + 'static) -> Box<dyn DealProvider> {
    Box::new(p)
}
