// src/ingest/orchestrator.rs
//! Fan-out across providers with per-provider failure isolation.

use metrics::{counter, histogram};
use serde::Serialize;

use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::{CanonicalDealRecord, DealProvider, ProviderSelector};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderStatus {
    Fetched { count: usize },
    /// Still cooling down; no request was made.
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderReport {
    pub provider: String,
    #[serde(flatten)]
    pub status: ProviderStatus,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<CanonicalDealRecord>,
    pub reports: Vec<ProviderReport>,
}

impl FetchOutcome {
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ProviderStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ProviderStatus::Failed { .. }))
    }

    fn count(&self, f: impl Fn(&ProviderStatus) -> bool) -> usize {
        self.reports.iter().filter(|r| f(&r.status)).count()
    }
}

pub struct FetchOrchestrator {
    providers: Vec<Box<dyn DealProvider>>,
    limiter: RateLimiter,
}

impl FetchOrchestrator {
    /// `providers` are visited in the given order.
    pub fn new(providers: Vec<Box<dyn DealProvider>>, limiter: RateLimiter) -> Self {
        Self { providers, limiter }
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn fetch_all(&self, selector: ProviderSelector) -> FetchOutcome {
        crate::ingest::ensure_metrics_described();

        let mut outcome = FetchOutcome::default();
        for p in self.providers.iter().filter(|p| selector.matches(p.kind())) {
            let name = p.name();
            let status = match self.limiter.try_acquire(name).await {
                Ok(false) => {
                    tracing::warn!(provider = name, "skipping provider fetch due to rate limiting");
                    counter!("ingest_provider_skipped_total", "provider" => name).increment(1);
                    ProviderStatus::Skipped
                }
                Err(e) => {
                    tracing::error!(error = ?e, provider = name, "rate limit store unavailable");
                    counter!("ingest_provider_errors_total", "provider" => name).increment(1);
                    ProviderStatus::Failed {
                        error: format!("rate limit store: {e}"),
                    }
                }
                Ok(true) => {
                    let t0 = std::time::Instant::now();
                    let res = p.fetch().await;
                    histogram!("ingest_fetch_ms", "provider" => name)
                        .record(t0.elapsed().as_secs_f64() * 1_000.0);
                    match res {
                        Ok(mut records) => {
                            let count = records.len();
                            counter!("ingest_records_total", "provider" => name)
                                .increment(count as u64);
                            outcome.records.append(&mut records);
                            ProviderStatus::Fetched { count }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, provider = name, "provider fetch failed");
                            counter!("ingest_provider_errors_total", "provider" => name)
                                .increment(1);
                            ProviderStatus::Failed {
                                error: e.to_string(),
                            }
                        }
                    }
                }
            };
            outcome.reports.push(ProviderReport {
                provider: name.to_string(),
                status,
            });
        }
        outcome
    }
}
