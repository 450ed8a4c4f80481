// src/ingest/upsert.rs
//! Insert-or-update by natural key, one record at a time.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;

use crate::error::StoreError;
use crate::ingest::store::DealStore;
use crate::ingest::types::CanonicalDealRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

impl UpsertReport {
    pub fn processed(&self) -> usize {
        self.inserted + self.updated
    }
}

#[derive(Clone)]
pub struct Upserter {
    store: Arc<dyn DealStore>,
}

impl Upserter {
    pub fn new(store: Arc<dyn DealStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DealStore> {
        &self.store
    }

    /// Merge one record. A conflict on insert means another writer created the
    /// row since the lookup; that case is retried once as an update.
    pub fn upsert_one(&self, record: &CanonicalDealRecord) -> Result<UpsertOutcome, StoreError> {
        let key = record.natural_key();
        if let Some(id) = self.store.find_id(&key)? {
            self.store.update(id, record)?;
            return Ok(UpsertOutcome::Updated(id));
        }
        match self.store.insert(record) {
            Ok(id) => Ok(UpsertOutcome::Inserted(id)),
            Err(StoreError::Conflict { .. }) => {
                let id = self.store.find_id(&key)?.ok_or_else(|| StoreError::Conflict {
                    source_name: key.source.clone(),
                    source_id: key.source_id.clone(),
                })?;
                self.store.update(id, record)?;
                Ok(UpsertOutcome::Updated(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Merge every record. A failed write is logged and counted; the
    /// remaining records are still processed. Not atomic across records.
    pub fn upsert(&self, records: &[CanonicalDealRecord]) -> UpsertReport {
        let mut report = UpsertReport::default();
        for record in records {
            match self.upsert_one(record) {
                Ok(UpsertOutcome::Inserted(_)) => report.inserted += 1,
                Ok(UpsertOutcome::Updated(_)) => report.updated += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        error = %e,
                        source = %record.source,
                        source_id = %record.source_id,
                        "deal upsert failed"
                    );
                }
            }
        }

        counter!("ingest_upsert_inserted_total").increment(report.inserted as u64);
        counter!("ingest_upsert_updated_total").increment(report.updated as u64);
        counter!("ingest_upsert_failed_total").increment(report.failed as u64);
        report
    }
}
