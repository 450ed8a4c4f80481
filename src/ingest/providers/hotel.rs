// src/ingest/providers/hotel.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use reqwest::Client;
use serde::Deserialize;

use super::{amount_or_zero, synthetic_id, RawScalar};
use crate::config::HotelConfig;
use crate::error::ProviderError;
use crate::ingest::http::{build_client, read_json, send_with_retry, RetryPolicy};
use crate::ingest::normalize_text;
use crate::ingest::oauth::client_credentials_token;
use crate::ingest::types::{CanonicalDealRecord, DealProvider, Price, ProviderKind};

const OFFERS_PATH: &str = "/v3/shopping/hotel-offers";
const VALIDITY_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct HotelOffersResponse {
    /// `null` and a missing list both mean no hotels.
    #[serde(default)]
    pub data: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct RawHotelEntry {
    #[serde(default)]
    pub hotel: Option<RawHotel>,
    /// Only the first offer is used, so the rest stay unparsed.
    #[serde(default)]
    pub offers: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct RawHotel {
    #[serde(default, rename = "hotelId")]
    pub hotel_id: Option<RawScalar>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "cityCode")]
    pub city_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawOffer {
    #[serde(default)]
    pub price: Option<RawOfferPrice>,
}

#[derive(Debug, Deserialize)]
pub struct RawOfferPrice {
    #[serde(default)]
    pub total: Option<RawScalar>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Hotel offers API behind an OAuth2 client-credentials grant. A new token is
/// requested on every fetch.
pub struct HotelProvider {
    cfg: HotelConfig,
    policy: RetryPolicy,
    client: Client,
}

impl HotelProvider {
    pub fn new(cfg: HotelConfig, policy: RetryPolicy) -> Result<Self, ProviderError> {
        let client = build_client(policy.timeout)?;
        Ok(Self {
            cfg,
            policy,
            client,
        })
    }

    async fn fetch_raw(&self) -> Result<HotelOffersResponse, ProviderError> {
        let token = client_credentials_token(
            &self.client,
            &self.policy,
            &self.cfg.token_url,
            &self.cfg.client_id,
            &self.cfg.client_secret,
        )
        .await?;

        let url = format!("{}{}", self.cfg.base_url.trim_end_matches('/'), OFFERS_PATH);
        let hotel_ids = self.cfg.hotel_ids.join(",");
        let room_quantity = self.cfg.room_quantity.to_string();
        let adults = self.cfg.adults.to_string();
        let query = [
            ("hotelIds", hotel_ids.as_str()),
            ("roomQuantity", room_quantity.as_str()),
            ("adults", adults.as_str()),
            ("bestRateOnly", "true"),
        ];
        let resp = send_with_retry(&self.policy, "hotel offers", || {
            self.client
                .get(&url)
                .bearer_auth(&token.access_token)
                .query(&query)
        })
        .await?;
        read_json(resp).await
    }
}

/// Map one offers response into canonical records. Only the first offer of a
/// hotel is used; hotels without offers are dropped.
pub fn normalize(raw: HotelOffersResponse, now: DateTime<Utc>) -> Vec<CanonicalDealRecord> {
    let provider = ProviderKind::Hotel;
    let entries = raw.data.unwrap_or_default();
    let mut out = Vec::with_capacity(entries.len());
    let mut dropped = 0u64;

    for entry in entries {
        let parsed: Option<RawHotelEntry> = entry
            .is_object()
            .then(|| serde_json::from_value(entry.clone()).ok())
            .flatten();
        let Some(parsed) = parsed else {
            dropped += 1;
            continue;
        };
        let offer: Option<RawOffer> = parsed
            .offers
            .as_deref()
            .and_then(|offers| offers.first())
            .filter(|o| o.is_object())
            .and_then(|o| serde_json::from_value(o.clone()).ok());
        let Some(offer) = offer else {
            dropped += 1;
            continue;
        };

        let hotel = parsed.hotel.as_ref();
        let name = clean(hotel.and_then(|h| h.name.as_deref()));
        let city = clean(hotel.and_then(|h| h.city_code.as_deref()));
        let hotel_name = name.as_deref().unwrap_or("Unknown Hotel");

        let (source_id, synthetic) = match hotel
            .and_then(|h| h.hotel_id.as_ref())
            .and_then(RawScalar::as_text)
        {
            Some(id) => (id, false),
            None => (
                synthetic_id(provider.name(), &[name.as_deref(), city.as_deref()]),
                true,
            ),
        };

        let offer_price = offer.price.as_ref();
        let price = Price::new(
            amount_or_zero(offer_price.and_then(|p| p.total.as_ref())),
            offer_price.and_then(|p| p.currency.as_deref()),
        );

        let offer_json = entry
            .get("offers")
            .and_then(|o| o.get(0))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let hotel_json = entry.get("hotel").cloned().unwrap_or(serde_json::Value::Null);

        out.push(CanonicalDealRecord {
            title: format!("Hotel: {hotel_name}"),
            description: Some(format!(
                "Stay at {hotel_name} in {}",
                city.as_deref().unwrap_or("Unknown Location")
            )),
            category: provider.category(),
            price,
            source: provider.name().to_string(),
            source_id,
            source_id_synthetic: synthetic,
            payload: serde_json::json!({ "hotel": hotel_json, "offer": offer_json }),
            valid_until: Some(now + Duration::days(VALIDITY_DAYS)),
            url: None,
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
impl DealProvider for HotelProvider {
    async fn fetch(&self) -> Result<Vec<CanonicalDealRecord>, ProviderError> {
        let raw = self.fetch_raw().await?;
        let t0 = std::time::Instant::now();
        let out = normalize(raw, Utc::now());
        histogram!("ingest_normalize_ms", "provider" => self.name())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Hotel
    }
}
