// src/ingest/providers/mod.rs
pub mod flight;
pub mod hotel;

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::IngestConfig;
use crate::error::ProviderError;
use crate::ingest::types::DealProvider;

pub use flight::FlightProvider;
pub use hotel::HotelProvider;

/// A JSON scalar providers send as either a string or a number.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawScalar {
    Text(String),
    Number(serde_json::Number),
}

impl RawScalar {
    pub fn as_text(&self) -> Option<String> {
        let s = match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => n.to_string(),
        };
        (!s.is_empty()).then_some(s)
    }

    /// Decimal value, or `None` when the text is not numeric.
    pub fn as_decimal(&self) -> Option<Decimal> {
        let s = self.as_text()?;
        Decimal::from_str(&s)
            .or_else(|_| Decimal::from_scientific(&s))
            .ok()
    }
}

/// Missing or unparseable amounts default to zero instead of rejecting the entry.
pub fn amount_or_zero(raw: Option<&RawScalar>) -> Decimal {
    raw.and_then(RawScalar::as_decimal).unwrap_or(Decimal::ZERO)
}

/// Stable id for entries the provider did not identify: the same identifying
/// fields always give the same id, so re-fetches update instead of duplicating.
pub fn synthetic_id(provider: &str, parts: &[Option<&str>]) -> String {
    let mut h = Sha256::new();
    h.update(provider.as_bytes());
    for p in parts {
        h.update([0x1fu8]);
        h.update(p.unwrap_or_default().trim().to_ascii_lowercase().as_bytes());
    }
    let digest = hex::encode(h.finalize());
    format!("syn-{}", &digest[..16])
}

/// Production providers in their fixed order, skipping disabled ones.
pub fn build_providers(cfg: &IngestConfig) -> Result<Vec<Box<dyn DealProvider>>, ProviderError> {
    let policy = cfg.http.retry_policy();
    let mut out: Vec<Box<dyn DealProvider>> = Vec::new();
    if cfg.flight.enabled {
        out.push(Box::new(FlightProvider::new(cfg.flight.clone(), policy)?));
    }
    if cfg.hotel.enabled {
        out.push(Box::new(HotelProvider::new(cfg.hotel.clone(), policy)?));
    }
    Ok(out)
}
