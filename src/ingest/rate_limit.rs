// src/ingest/rate_limit.rs
//! Per-provider fetch cooldown backed by an injected keyed TTL store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

/// Source of "now". Swapped for [`ManualClock`] in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Keyed timestamp store with per-entry expiry.
///
/// Implementations may live in-process or in a shared backend; the limiter only
/// relies on these three operations.
#[async_trait::async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Live value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    /// Unconditionally store `value` for `ttl`.
    async fn put(&self, key: &str, value: DateTime<Utc>, ttl: Duration) -> Result<()>;

    /// Atomically store `value` for `ttl` if there is no live entry or the live
    /// entry is older than `cutoff`. Returns whether the write happened.
    async fn put_if_older(
        &self,
        key: &str,
        value: DateTime<Utc>,
        ttl: Duration,
        cutoff: DateTime<Utc>,
    ) -> Result<bool>;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Process-local store. Entries expire lazily on access.
pub struct InMemoryRateLimitStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimitStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn live(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) -> Option<Entry> {
        match entries.get(key).copied() {
            Some(e) if e.expires_at > now => Some(e),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait::async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Ok(Self::live(&mut entries, key, now).map(|e| e.value))
    }

    async fn put(&self, key: &str, value: DateTime<Utc>, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now() + ttl;
        self.entries
            .lock()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn put_if_older(
        &self,
        key: &str,
        value: DateTime<Utc>,
        ttl: Duration,
        cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if let Some(e) = Self::live(&mut entries, key, now) {
            if e.value >= cutoff {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }
}

const RATE_LIMIT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rate_limits (
    key TEXT PRIMARY KEY,
    value_ns INTEGER NOT NULL,
    expires_at_ns INTEGER NOT NULL
);
";

/// Store shared by every process that opens the same SQLite file, so
/// cooldowns hold across separate CLI runs.
pub struct SqliteRateLimitStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteRateLimitStore {
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening rate-limit store {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn, clock)
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, clock)
    }

    fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(RATE_LIMIT_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&mut conn.lock()))
            .await
            .context("rate-limit store task")?
    }
}

fn to_ns(t: DateTime<Utc>) -> Result<i64> {
    t.timestamp_nanos_opt()
        .ok_or_else(|| anyhow!("timestamp out of range: {t}"))
}

fn live_value(conn: &Connection, key: &str, now_ns: i64) -> Result<Option<i64>> {
    let v = conn
        .query_row(
            "SELECT value_ns FROM rate_limits WHERE key = ?1 AND expires_at_ns > ?2",
            params![key, now_ns],
            |row| row.get(0),
        )
        .optional()?;
    Ok(v)
}

#[async_trait::async_trait]
impl RateLimitStore for SqliteRateLimitStore {
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let now_ns = to_ns(self.clock.now())?;
        let key = key.to_string();
        let v = self
            .with_conn(move |conn| live_value(conn, &key, now_ns))
            .await?;
        Ok(v.map(DateTime::from_timestamp_nanos))
    }

    async fn put(&self, key: &str, value: DateTime<Utc>, ttl: Duration) -> Result<()> {
        let value_ns = to_ns(value)?;
        let expires_ns = to_ns(self.clock.now() + ttl)?;
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO rate_limits (key, value_ns, expires_at_ns) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET value_ns = excluded.value_ns, \
                 expires_at_ns = excluded.expires_at_ns",
                params![key, value_ns, expires_ns],
            )?;
            Ok(())
        })
        .await
    }

    async fn put_if_older(
        &self,
        key: &str,
        value: DateTime<Utc>,
        ttl: Duration,
        cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let now_ns = to_ns(self.clock.now())?;
        let value_ns = to_ns(value)?;
        let expires_ns = to_ns(self.clock.now() + ttl)?;
        let cutoff_ns = to_ns(cutoff)?;
        let key = key.to_string();
        self.with_conn(move |conn| {
            // IMMEDIATE takes the write lock up front, so other processes
            // cannot interleave between the read and the write.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(v) = live_value(&tx, &key, now_ns)? {
                if v >= cutoff_ns {
                    return Ok(false);
                }
            }
            tx.execute(
                "INSERT INTO rate_limits (key, value_ns, expires_at_ns) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET value_ns = excluded.value_ns, \
                 expires_at_ns = excluded.expires_at_ns",
                params![key, value_ns, expires_ns],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub cooldown: Duration,
    pub state_ttl: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::minutes(30),
            state_ttl: Duration::minutes(60),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        policy: RateLimitPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// In-memory limiter on the system clock.
    pub fn in_memory(policy: RateLimitPolicy) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(InMemoryRateLimitStore::new(clock.clone()));
        Self::new(store, clock, policy)
    }

    /// Limiter whose state lives in the SQLite file at `path`.
    pub fn sqlite(path: &Path, policy: RateLimitPolicy) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(SqliteRateLimitStore::open(path, clock.clone())?);
        Ok(Self::new(store, clock, policy))
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn state_key(provider: &str) -> String {
        format!("{provider}_api_last_fetch")
    }

    /// True while the provider's last fetch is younger than the cooldown.
    pub async fn should_skip(&self, provider: &str) -> Result<bool> {
        let Some(last) = self.store.get(&Self::state_key(provider)).await? else {
            return Ok(false);
        };
        Ok(self.clock.now() - last < self.policy.cooldown)
    }

    pub async fn mark_fetched(&self, provider: &str) -> Result<()> {
        self.store
            .put(
                &Self::state_key(provider),
                self.clock.now(),
                self.policy.state_ttl,
            )
            .await
    }

    /// Check-and-mark in one atomic step. Returns false when the provider is
    /// still cooling down; otherwise records the fetch and returns true.
    pub async fn try_acquire(&self, provider: &str) -> Result<bool> {
        let now = self.clock.now();
        // Entries at or after the cutoff are inside the cooldown.
        let cutoff = now - self.policy.cooldown + Duration::nanoseconds(1);
        self.store
            .put_if_older(&Self::state_key(provider), now, self.policy.state_ttl, cutoff)
            .await
    }
}
