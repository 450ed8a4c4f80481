// src/ingest/providers/flight.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use reqwest::Client;
use serde::Deserialize;

use super::{amount_or_zero, synthetic_id, RawScalar};
use crate::config::FlightConfig;
use crate::error::ProviderError;
use crate::ingest::http::{build_client, read_json, send_with_retry, RetryPolicy};
use crate::ingest::normalize_text;
use crate::ingest::types::{CanonicalDealRecord, DealProvider, Price, ProviderKind};

const SEARCH_PATH: &str = "/v3/flights/live/search/create";
const VALIDITY_DAYS: i64 = 7;

#[derive(Debug, Default, Deserialize)]
pub struct FlightSearchResponse {
    #[serde(default)]
    pub data: Option<FlightData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FlightData {
    /// Kept untyped so one bad entry cannot fail the whole batch. `null` and
    /// a missing list both mean no flights.
    #[serde(default)]
    pub flights: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct RawFlight {
    #[serde(default)]
    pub id: Option<RawScalar>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub price: Option<RawScalar>,
    #[serde(default, rename = "deepLink")]
    pub deep_link: Option<String>,
}

/// Flight search API authenticated with a static key header.
pub struct FlightProvider {
    cfg: FlightConfig,
    policy: RetryPolicy,
    client: Client,
}

impl FlightProvider {
    pub fn new(cfg: FlightConfig, policy: RetryPolicy) -> Result<Self, ProviderError> {
        let client = build_client(policy.timeout)?;
        Ok(Self {
            cfg,
            policy,
            client,
        })
    }

    async fn fetch_raw(&self) -> Result<FlightSearchResponse, ProviderError> {
        if self.cfg.api_key.is_empty() {
            return Err(ProviderError::Config("flight api key not set".into()));
        }
        let url = format!("{}{}", self.cfg.base_url.trim_end_matches('/'), SEARCH_PATH);
        let adults = self.cfg.adults.to_string();
        let query = [
            ("market", self.cfg.market.as_str()),
            ("locale", self.cfg.locale.as_str()),
            ("currency", self.cfg.currency.as_str()),
            ("adults", adults.as_str()),
        ];
        let resp = send_with_retry(&self.policy, "flight search", || {
            self.client
                .get(&url)
                .header("X-RapidAPI-Key", &self.cfg.api_key)
                .header("X-RapidAPI-Host", &self.cfg.api_host)
                .query(&query)
        })
        .await?;
        read_json(resp).await
    }
}

/// Map one search response into canonical records. Entries that are not
/// objects or carry wrongly typed fields are dropped.
pub fn normalize(raw: FlightSearchResponse, now: DateTime<Utc>) -> Vec<CanonicalDealRecord> {
    let provider = ProviderKind::Flight;
    let entries = raw.data.and_then(|d| d.flights).unwrap_or_default();
    let mut out = Vec::with_capacity(entries.len());
    let mut dropped = 0u64;

    for entry in entries {
        let flight: RawFlight = match serde_json::from_value(entry.clone()) {
            Ok(f) if entry.is_object() => f,
            _ => {
                dropped += 1;
                continue;
            }
        };

        let origin = clean(flight.origin.as_deref());
        let destination = clean(flight.destination.as_deref());
        let carrier = clean(flight.carrier.as_deref());

        let (source_id, synthetic) = match flight.id.as_ref().and_then(RawScalar::as_text) {
            Some(id) => (id, false),
            None => (
                synthetic_id(
                    provider.name(),
                    &[
                        origin.as_deref(),
                        destination.as_deref(),
                        carrier.as_deref(),
                        flight.deep_link.as_deref(),
                    ],
                ),
                true,
            ),
        };

        out.push(CanonicalDealRecord {
            title: format!(
                "Flight: {} to {}",
                origin.as_deref().unwrap_or("Unknown"),
                destination.as_deref().unwrap_or("Unknown")
            ),
            description: Some(format!(
                "Fly with {}",
                carrier.as_deref().unwrap_or("Unknown carrier")
            )),
            category: provider.category(),
            price: Price::new(amount_or_zero(flight.price.as_ref()), None),
            source: provider.name().to_string(),
            source_id,
            source_id_synthetic: synthetic,
            payload: entry,
            valid_until: Some(now + Duration::days(VALIDITY_DAYS)),
            url: flight.deep_link.filter(|u| !u.trim().is_empty()),
        });
    }

    if dropped > 0 {
        tracing::debug!(provider = provider.name(), dropped, "dropped malformed entries");
        counter!("ingest_malformed_dropped_total", "provider" => provider.name()).increment(dropped);
    }
    out
}

fn clean(s: Option<&str>) -> Option<String> {
    s.map(normalize_text).filter(|s| !s.is_empty())
}

#[async_trait]
impl DealProvider for FlightProvider {
    async fn fetch(&self) -> Result<Vec<CanonicalDealRecord>, ProviderError> {
        let raw = self.fetch_raw().await?;
        let t0 = std::time::Instant::now();
        let out = normalize(raw, Utc::now());
        histogram!("ingest_normalize_ms", "provider" => self.name())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Flight
    }
}
