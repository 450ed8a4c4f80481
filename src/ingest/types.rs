// src/ingest/types.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealCategory {
    Flight,
    Hotel,
    Package,
    Cruise,
    Car,
}

impl DealCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flight => "flight",
            Self::Hotel => "hotel",
            Self::Package => "package",
            Self::Cruise => "cruise",
            Self::Car => "car",
        }
    }
}

impl FromStr for DealCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flight" => Ok(Self::Flight),
            "hotel" => Ok(Self::Hotel),
            "package" => Ok(Self::Package),
            "cruise" => Ok(Self::Cruise),
            "car" => Ok(Self::Car),
            other => Err(anyhow::anyhow!("unknown deal category: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Decimal,
    pub currency: String, // ISO 4217, upper-case
}

impl Price {
    pub const DEFAULT_CURRENCY: &'static str = "USD";

    /// Builds a price, falling back to USD when the code is not three ASCII letters.
    pub fn new(amount: Decimal, currency: Option<&str>) -> Self {
        let currency = currency
            .map(str::trim)
            .filter(|c| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()))
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| Self::DEFAULT_CURRENCY.to_string());
        Self { amount, currency }
    }
}

/// (provider name, provider-assigned id). At most one stored row per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub source: String,
    pub source_id: String,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.source_id)
    }
}

/// Provider-agnostic representation of one deal listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDealRecord {
    pub title: String,
    pub description: Option<String>,
    pub category: DealCategory,
    pub price: Price,
    pub source: String,    // e.g. "flight-provider"
    pub source_id: String, // provider id, or a derived stable id
    pub source_id_synthetic: bool,
    pub payload: serde_json::Value, // raw provider entry, verbatim
    pub valid_until: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

impl CanonicalDealRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            source: self.source.clone(),
            source_id: self.source_id.clone(),
        }
    }
}

/// The closed set of providers this pipeline knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "flight-provider")]
    Flight,
    #[serde(rename = "hotel-provider")]
    Hotel,
}

impl ProviderKind {
    /// Fixed iteration order for "all".
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Flight, ProviderKind::Hotel];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Flight => "flight-provider",
            Self::Hotel => "hotel-provider",
        }
    }

    pub fn category(&self) -> DealCategory {
        match self {
            Self::Flight => DealCategory::Flight,
            Self::Hotel => DealCategory::Hotel,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown provider: {s}"))
    }
}

/// Which providers an ingestion cycle should visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderSelector {
    #[default]
    All,
    Only(ProviderKind),
}

impl ProviderSelector {
    pub fn matches(&self, kind: ProviderKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(k) => *k == kind,
        }
    }

    /// Accepted values, for help texts and error messages.
    pub fn allowed_values() -> Vec<&'static str> {
        let mut v = vec!["all"];
        v.extend(ProviderKind::ALL.iter().map(|k| k.name()));
        v
    }
}

impl fmt::Display for ProviderSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(k) => f.write_str(k.name()),
        }
    }
}

impl FromStr for ProviderSelector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<ProviderKind>().map(Self::Only).map_err(|_| {
            anyhow::anyhow!(
                "invalid source '{}', expected one of: {}",
                s.trim(),
                Self::allowed_values().join(", ")
            )
        })
    }
}

impl Serialize for ProviderSelector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProviderSelector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One external deal source: fetch the raw response and normalize it.
#[async_trait::async_trait]
pub trait DealProvider: Send + Sync {
    async fn fetch(&self) -> Result<Vec<CanonicalDealRecord>, ProviderError>;
    fn kind(&self) -> ProviderKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }
}
