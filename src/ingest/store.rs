// src/ingest/store.rs
//! Durable deal store keyed by (source, source_id).

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::StoreError;
use crate::ingest::types::{CanonicalDealRecord, DealCategory, NaturalKey, Price};

/// Minimal write/read surface the upserter needs.
pub trait DealStore: Send + Sync {
    fn find_id(&self, key: &NaturalKey) -> Result<Option<i64>, StoreError>;
    fn insert(&self, record: &CanonicalDealRecord) -> Result<i64, StoreError>;
    /// Overwrite the mutable fields of row `id`.
    fn update(&self, id: i64, record: &CanonicalDealRecord) -> Result<(), StoreError>;
    fn get(&self, key: &NaturalKey) -> Result<Option<StoredDeal>, StoreError>;
    fn count(&self) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDeal {
    pub id: i64,
    #[serde(flatten)]
    pub record: CanonicalDealRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS deals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT,
    type TEXT NOT NULL,
    price REAL NOT NULL,
    price_exact TEXT NOT NULL,
    currency TEXT NOT NULL DEFAULT 'USD',
    source_id TEXT NOT NULL,
    source_id_synthetic INTEGER NOT NULL DEFAULT 0,
    source TEXT NOT NULL,
    details TEXT,
    valid_until TEXT,
    url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_deals_natural_key ON deals (source, source_id);
CREATE INDEX IF NOT EXISTS idx_deals_type_price ON deals (type, price);
CREATE INDEX IF NOT EXISTS idx_deals_valid_until ON deals (valid_until);
";

const SELECT_COLUMNS: &str = "id, title, description, type, price_exact, currency, source_id, \
     source_id_synthetic, source, details, valid_until, url, created_at, updated_at";

pub struct SqliteDealStore {
    conn: Mutex<Connection>,
}

impl SqliteDealStore {
    /// Create or open a deal database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// All stored deals, oldest first.
    pub fn list(&self) -> Result<Vec<StoredDeal>, StoreError> {
        let raw: Vec<RawRow> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SELECT_COLUMNS} FROM deals ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        raw.into_iter().map(decode_row).collect()
    }
}

/// Columns as read from SQLite, before decoding.
struct RawRow {
    id: i64,
    title: String,
    description: Option<String>,
    category: String,
    price: String,
    currency: String,
    source_id: String,
    source_id_synthetic: bool,
    source: String,
    details: Option<String>,
    valid_until: Option<String>,
    url: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        price: row.get(4)?,
        currency: row.get(5)?,
        source_id: row.get(6)?,
        source_id_synthetic: row.get(7)?,
        source: row.get(8)?,
        details: row.get(9)?,
        valid_until: row.get(10)?,
        url: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn decode_row(r: RawRow) -> Result<StoredDeal, StoreError> {
    let enc = |what: &str, e: &dyn std::fmt::Display| StoreError::Encode(format!("{what}: {e}"));
    let ts = |s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| enc("timestamp", &e))
    };

    let payload = match r.details.as_deref() {
        Some(s) => serde_json::from_str(s).map_err(|e| enc("details", &e))?,
        None => serde_json::Value::Null,
    };
    Ok(StoredDeal {
        id: r.id,
        record: CanonicalDealRecord {
            title: r.title,
            description: r.description,
            category: DealCategory::from_str(&r.category).map_err(|e| enc("type", &e))?,
            price: Price {
                amount: Decimal::from_str(&r.price).map_err(|e| enc("price", &e))?,
                currency: r.currency,
            },
            source: r.source,
            source_id: r.source_id,
            source_id_synthetic: r.source_id_synthetic,
            payload,
            valid_until: r.valid_until.as_deref().map(ts).transpose()?,
            url: r.url,
        },
        created_at: ts(&r.created_at)?,
        updated_at: ts(&r.updated_at)?,
    })
}

/// Numeric copy of the amount for SQL range filters and sorting; the exact
/// decimal is kept alongside in `price_exact`.
fn price_number(amount: &Decimal) -> Result<f64, StoreError> {
    amount
        .to_f64()
        .ok_or_else(|| StoreError::Encode(format!("price out of range: {amount}")))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}

impl DealStore for SqliteDealStore {
    fn find_id(&self, key: &NaturalKey) -> Result<Option<i64>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT id FROM deals WHERE source = ?1 AND source_id = ?2")?;
        let id = stmt
            .query_row(params![key.source, key.source_id], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    fn insert(&self, record: &CanonicalDealRecord) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let details = serde_json::to_string(&record.payload)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO deals ( \
                title, description, type, price, price_exact, currency, source_id, \
                source_id_synthetic, source, details, valid_until, url, created_at, updated_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        )?;
        let res = stmt.execute(params![
            record.title,
            record.description,
            record.category.as_str(),
            price_number(&record.price.amount)?,
            record.price.amount.to_string(),
            record.price.currency,
            record.source_id,
            record.source_id_synthetic,
            record.source,
            details,
            record.valid_until.map(|d| d.to_rfc3339()),
            record.url,
            now,
        ]);
        match res {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict {
                source_name: record.source.clone(),
                source_id: record.source_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn update(&self, id: i64, record: &CanonicalDealRecord) -> Result<(), StoreError> {
        let details = serde_json::to_string(&record.payload)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "UPDATE deals SET \
                title = ?1, description = ?2, price = ?3, price_exact = ?4, currency = ?5, \
                details = ?6, valid_until = ?7, url = ?8, updated_at = ?9 \
             WHERE id = ?10",
        )?;
        stmt.execute(params![
            record.title,
            record.description,
            price_number(&record.price.amount)?,
            record.price.amount.to_string(),
            record.price.currency,
            details,
            record.valid_until.map(|d| d.to_rfc3339()),
            record.url,
            Utc::now().to_rfc3339(),
            id,
        ])?;
        Ok(())
    }

    fn get(&self, key: &NaturalKey) -> Result<Option<StoredDeal>, StoreError> {
        let raw = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SELECT_COLUMNS} FROM deals WHERE source = ?1 AND source_id = ?2"
            ))?;
            let row = stmt
                .query_row(params![key.source, key.source_id], read_row)
                .optional()?;
            row
        };
        raw.map(decode_row).transpose()
    }

    fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM deals", [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, price: i64) -> CanonicalDealRecord {
        CanonicalDealRecord {
            title: "Flight: JFK to LHR".into(),
            description: Some("Fly with BA".into()),
            category: DealCategory::Flight,
            price: Price::new(Decimal::from(price), Some("USD")),
            source: "flight-provider".into(),
            source_id: id.into(),
            source_id_synthetic: false,
            payload: json!({ "id": id, "price": price }),
            valid_until: Some(Utc::now()),
            url: None,
        }
    }

    #[test]
    fn insert_then_get_roundtrips_fields() {
        let store = SqliteDealStore::open_in_memory().unwrap();
        let rec = record("F1", 450);
        let id = store.insert(&rec).unwrap();
        let got = store.get(&rec.natural_key()).unwrap().unwrap();
        assert_eq!(got.id, id);
        assert_eq!(got.record.price.amount, Decimal::from(450));
        assert_eq!(got.record.payload, rec.payload);
        assert_eq!(got.record.category, DealCategory::Flight);
    }

    #[test]
    fn duplicate_natural_key_is_a_conflict() {
        let store = SqliteDealStore::open_in_memory().unwrap();
        store.insert(&record("F1", 450)).unwrap();
        let err = store.insert(&record("F1", 500)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn price_filters_and_sorts_numerically() {
        let store = SqliteDealStore::open_in_memory().unwrap();
        store.insert(&record("A", 450)).unwrap();
        store.insert(&record("B", 1000)).unwrap();
        let mut cheap = record("C", 0);
        cheap.price = Price::new(Decimal::new(9995, 2), Some("USD"));
        store.insert(&cheap).unwrap();

        let conn = store.conn.lock();
        let ids = |sql: &str| -> Vec<String> {
            let mut stmt = conn.prepare(sql).unwrap();
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .unwrap()
                .collect::<rusqlite::Result<Vec<_>>>()
                .unwrap();
            rows
        };
        assert_eq!(ids("SELECT source_id FROM deals WHERE price >= 500"), vec!["B"]);
        assert_eq!(
            ids("SELECT source_id FROM deals ORDER BY price ASC"),
            vec!["C", "A", "B"]
        );
        drop(conn);

        let got = store.get(&cheap.natural_key()).unwrap().unwrap();
        assert_eq!(got.record.price.amount.to_string(), "99.95");
    }

    #[test]
    fn update_keeps_key_and_category() {
        let store = SqliteDealStore::open_in_memory().unwrap();
        let id = store.insert(&record("F1", 450)).unwrap();
        let mut changed = record("F1", 500);
        changed.category = DealCategory::Package;
        store.update(id, &changed).unwrap();
        let got = store.get(&changed.natural_key()).unwrap().unwrap();
        assert_eq!(got.record.price.amount, Decimal::from(500));
        assert_eq!(got.record.category, DealCategory::Flight);
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
