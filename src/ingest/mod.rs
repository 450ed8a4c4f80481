// src/ingest/mod.rs
pub mod http;
pub mod job;
pub mod oauth;
pub mod orchestrator;
pub mod providers;
pub mod rate_limit;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod upsert;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use job::{IngestPipeline, IngestionJob, IngestionSummary, JobQueue, JobRecord, JobStatus};
pub use orchestrator::{FetchOrchestrator, FetchOutcome, ProviderReport, ProviderStatus};
pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use store::{DealStore, SqliteDealStore, StoredDeal};
pub use types::{
    CanonicalDealRecord, DealCategory, DealProvider, NaturalKey, Price, ProviderKind,
    ProviderSelector,
};
pub use upsert::{UpsertOutcome, UpsertReport, Upserter};

const MAX_TEXT_CHARS: usize = 500;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_records_total",
            "Canonical records produced by providers."
        );
        describe_counter!(
            "ingest_malformed_dropped_total",
            "Raw entries dropped because they could not be normalized."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/auth/decode errors."
        );
        describe_counter!(
            "ingest_provider_skipped_total",
            "Provider fetches skipped by the rate limiter."
        );
        describe_counter!("ingest_upsert_inserted_total", "Rows inserted by upsert.");
        describe_counter!("ingest_upsert_updated_total", "Rows updated by upsert.");
        describe_counter!(
            "ingest_upsert_failed_total",
            "Records whose store write failed."
        );
        describe_counter!("ingest_jobs_total", "Ingestion jobs by final status.");
        describe_histogram!("ingest_fetch_ms", "Provider fetch time in milliseconds.");
        describe_histogram!(
            "ingest_normalize_ms",
            "Provider normalization time in milliseconds."
        );
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when an ingestion job last finished."
        );
    });
}

/// Normalize provider text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_ws_and_decodes() {
        let s = "  Grand&nbsp;&nbsp; <b>H&ocirc;tel</b>\n Paris. ";
        assert_eq!(normalize_text(s), "Grand Hôtel Paris.");
    }

    #[test]
    fn normalize_text_caps_length() {
        let s = "x".repeat(2_000);
        assert_eq!(normalize_text(&s).chars().count(), MAX_TEXT_CHARS);
    }
}
