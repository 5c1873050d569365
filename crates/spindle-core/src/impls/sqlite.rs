//! SQLite item store - the durable backend.
//!
//! One database file can hold many queues; rows are keyed by `(queue, id)`.
//! Each operation opens its own connection on a blocking thread, so several
//! processes can point at the same file and contend through SQLite's locks
//! (WAL journal, busy timeout) rather than through anything in this process.
//!
//! Atomicity per operation:
//! - lease changes are one conditional `UPDATE`/`DELETE` each
//! - `put` allocates the id and inserts inside one IMMEDIATE transaction
//! - `clear` is a single `DELETE`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::debug;

use crate::domain::{ItemId, LeaseToken};
use crate::error::{QueueError, Result};
use crate::ports::{HeldDelete, ItemStore, LeaseSet, StoreProvider};
use crate::queue::{Lease, QueueItem, QueueName};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS queue_items (
        queue             TEXT    NOT NULL,
        id                INTEGER NOT NULL,
        payload           TEXT    NOT NULL,
        created_at        INTEGER NOT NULL,
        lease_token       TEXT,
        lease_expires_at  INTEGER,
        attempts          INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (queue, id)
    );

    CREATE INDEX IF NOT EXISTS idx_queue_items_lease
        ON queue_items(queue, lease_expires_at);

    CREATE TABLE IF NOT EXISTS queue_sequences (
        queue    TEXT PRIMARY KEY,
        last_id  INTEGER NOT NULL
    );
";

const ITEM_COLUMNS: &str = "id, payload, created_at, lease_token, lease_expires_at, attempts";

/// Location + connection settings shared by every store on one file.
#[derive(Debug)]
struct SqliteDatabase {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteDatabase {
    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.connect()?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

/// Raw row, before payload/lease decoding.
struct ItemRow {
    id: i64,
    payload: String,
    created_at: i64,
    lease_token: Option<String>,
    lease_expires_at: Option<i64>,
    attempts: i64,
}

impl ItemRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload: row.get(1)?,
            created_at: row.get(2)?,
            lease_token: row.get(3)?,
            lease_expires_at: row.get(4)?,
            attempts: row.get(5)?,
        })
    }

    fn into_item(self) -> Result<QueueItem> {
        let id = ItemId::new(self.id as u64);
        let lease = match (self.lease_token, self.lease_expires_at) {
            (Some(token), Some(expires_at)) => {
                let token: LeaseToken = token
                    .parse()
                    .map_err(|e| QueueError::Corrupt(format!("{id}: {e}")))?;
                Some(Lease::new(token, from_millis(expires_at)?))
            }
            (None, None) => None,
            _ => return Err(QueueError::Corrupt(format!("{id} has a half-written lease"))),
        };
        Ok(QueueItem {
            id,
            payload: serde_json::from_str(&self.payload)?,
            created_at: from_millis(self.created_at)?,
            lease,
            attempts: u32::try_from(self.attempts).unwrap_or(u32::MAX),
        })
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Lease deadlines round up, so a stored lease never ends before the one
/// the claimant was handed.
fn deadline_millis(at: DateTime<Utc>) -> i64 {
    let floor = at.timestamp_millis();
    if at.timestamp_subsec_nanos() % 1_000_000 == 0 {
        floor
    } else {
        floor.saturating_add(1)
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn token_text(token: LeaseToken) -> String {
    token.as_ulid().to_string()
}

/// Durable store for one named queue.
pub struct SqliteItemStore {
    db: Arc<SqliteDatabase>,
    queue: QueueName,
}

impl SqliteItemStore {
    /// Open (creating if needed) the database at `path` and bind to `queue`.
    pub fn open(path: impl AsRef<Path>, queue: QueueName) -> Result<Self> {
        let provider = SqliteStoreProvider::open(path)?;
        Ok(provider.store(queue))
    }

    /// Run `op` on a fresh connection off the async executor.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let queue = self.queue.as_str().to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.connect()?;
            op(&mut conn, &queue)
        })
        .await?
    }
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn put(&self, payload: serde_json::Value, created_at: DateTime<Utc>) -> Result<ItemId> {
        let payload = serde_json::to_string(&payload)?;
        let created_at = millis(created_at);
        self.run(move |conn, queue| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id: i64 = tx.query_row(
                "INSERT INTO queue_sequences (queue, last_id) VALUES (?1, 1)
                 ON CONFLICT(queue) DO UPDATE SET last_id = last_id + 1
                 RETURNING last_id",
                params![queue],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO queue_items (queue, id, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![queue, id, payload, created_at],
            )?;
            tx.commit()?;
            Ok(ItemId::new(id as u64))
        })
        .await
    }

    async fn get(&self, id: ItemId) -> Result<QueueItem> {
        self.run(move |conn, queue| {
            let row = conn
                .query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM queue_items WHERE queue = ?1 AND id = ?2"),
                    params![queue, id.get() as i64],
                    ItemRow::read,
                )
                .optional()?;
            row.ok_or(QueueError::NotFound(id))?.into_item()
        })
        .await
    }

    async fn delete(&self, id: ItemId) -> Result<bool> {
        self.run(move |conn, queue| {
            let removed = conn.execute(
                "DELETE FROM queue_items WHERE queue = ?1 AND id = ?2",
                params![queue, id.get() as i64],
            )?;
            Ok(removed == 1)
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.run(|conn, queue| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_items WHERE queue = ?1",
                params![queue],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
        .await
    }

    async fn scan_available(
        &self,
        after: Option<ItemId>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let after = after.map(|id| id.get() as i64).unwrap_or(0);
        let now = millis(now);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn, queue| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM queue_items
                 WHERE queue = ?1 AND id > ?2
                   AND (lease_expires_at IS NULL OR lease_expires_at <= ?3)
                 ORDER BY id ASC
                 LIMIT ?4"
            ))?;
            let rows = stmt
                .query_map(params![queue, after, now, limit], ItemRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(ItemRow::into_item).collect()
        })
        .await
    }

    async fn clear(&self) -> Result<u64> {
        self.run(|conn, queue| {
            let removed = conn.execute("DELETE FROM queue_items WHERE queue = ?1", params![queue])?;
            debug!(queue, removed, "cleared sqlite queue");
            Ok(removed as u64)
        })
        .await
    }

    async fn set_lease_if_available(
        &self,
        id: ItemId,
        lease: Lease,
        now: DateTime<Utc>,
    ) -> Result<LeaseSet> {
        let token = token_text(lease.token);
        let expires_at = deadline_millis(lease.expires_at);
        let now = millis(now);
        self.run(move |conn, queue| {
            let attempts: Option<i64> = conn
                .query_row(
                    "UPDATE queue_items
                     SET lease_token = ?1, lease_expires_at = ?2, attempts = attempts + 1
                     WHERE queue = ?3 AND id = ?4
                       AND (lease_expires_at IS NULL OR lease_expires_at <= ?5)
                     RETURNING attempts",
                    params![token, expires_at, queue, id.get() as i64, now],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(attempts) = attempts {
                return Ok(LeaseSet::Acquired {
                    attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
                });
            }
            let exists = conn
                .query_row(
                    "SELECT 1 FROM queue_items WHERE queue = ?1 AND id = ?2",
                    params![queue, id.get() as i64],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(if exists { LeaseSet::Held } else { LeaseSet::Missing })
        })
        .await
    }

    async fn clear_lease_if_held(
        &self,
        id: ItemId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let token = token_text(token);
        let now = millis(now);
        self.run(move |conn, queue| {
            let changed = conn.execute(
                "UPDATE queue_items SET lease_token = NULL, lease_expires_at = NULL
                 WHERE queue = ?1 AND id = ?2 AND lease_token = ?3 AND lease_expires_at > ?4",
                params![queue, id.get() as i64, token, now],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn replace_lease_if_held(
        &self,
        id: ItemId,
        token: LeaseToken,
        replacement: Lease,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let token = token_text(token);
        let new_token = token_text(replacement.token);
        let new_expiry = deadline_millis(replacement.expires_at);
        let now = millis(now);
        self.run(move |conn, queue| {
            let changed = conn.execute(
                "UPDATE queue_items SET lease_token = ?1, lease_expires_at = ?2
                 WHERE queue = ?3 AND id = ?4 AND lease_token = ?5 AND lease_expires_at > ?6",
                params![new_token, new_expiry, queue, id.get() as i64, token, now],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn delete_if_held(
        &self,
        id: ItemId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> Result<HeldDelete> {
        let token = token_text(token);
        let now = millis(now);
        self.run(move |conn, queue| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let removed = tx.execute(
                "DELETE FROM queue_items
                 WHERE queue = ?1 AND id = ?2 AND lease_token = ?3 AND lease_expires_at > ?4",
                params![queue, id.get() as i64, token, now],
            )?;
            if removed == 1 {
                tx.commit()?;
                return Ok(HeldDelete::Deleted);
            }
            let current: Option<Option<String>> = tx
                .query_row(
                    "SELECT lease_token FROM queue_items WHERE queue = ?1 AND id = ?2",
                    params![queue, id.get() as i64],
                    |row| row.get(0),
                )
                .optional()?;
            tx.commit()?;
            Ok(match current {
                None => HeldDelete::Missing,
                Some(Some(current)) if current == token => HeldDelete::Expired,
                Some(_) => HeldDelete::TokenMismatch,
            })
        })
        .await
    }

    async fn snapshot(&self) -> Result<Vec<QueueItem>> {
        self.run(|conn, queue| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM queue_items WHERE queue = ?1 ORDER BY id ASC"
            ))?;
            let rows = stmt
                .query_map(params![queue], ItemRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(ItemRow::into_item).collect()
        })
        .await
    }
}

/// Opens per-queue stores on one SQLite file.
pub struct SqliteStoreProvider {
    db: Arc<SqliteDatabase>,
}

impl SqliteStoreProvider {
    /// Open (creating if needed) the database file and its schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_busy_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let db = SqliteDatabase {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
        };
        db.init()?;
        debug!(path = %db.path.display(), "opened sqlite queue database");
        Ok(Self { db: Arc::new(db) })
    }

    pub fn path(&self) -> &Path {
        &self.db.path
    }

    fn store(&self, queue: QueueName) -> SqliteItemStore {
        SqliteItemStore {
            db: Arc::clone(&self.db),
            queue,
        }
    }
}

impl StoreProvider for SqliteStoreProvider {
    fn open_store(&self, queue: &QueueName) -> Result<Arc<dyn ItemStore>> {
        Ok(Arc::new(self.store(queue.clone())))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::queue::record::deadline;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn open(dir: &TempDir, queue: &str) -> SqliteItemStore {
        SqliteItemStore::open(dir.path().join("queue.sqlite"), QueueName::new(queue).unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn items_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = open(&dir, "feed_import");
            store
                .put(json!({"title": "t", "body": "b"}), t0())
                .await
                .unwrap()
        };

        // a new process would do exactly this
        let store = open(&dir, "feed_import");
        assert_eq!(store.count().await.unwrap(), 1);
        let item = store.get(id).await.unwrap();
        assert_eq!(item.payload["title"], "t");
        assert_eq!(item.created_at, t0());
        assert!(item.lease.is_none());
    }

    #[tokio::test]
    async fn leases_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "q");
        let id = store.put(json!(1), t0()).await.unwrap();
        let lease = Lease::new(
            LeaseToken::generate(t0()),
            deadline(t0(), Duration::from_secs(60)),
        );
        assert_eq!(
            store.set_lease_if_available(id, lease, t0()).await.unwrap(),
            LeaseSet::Acquired { attempts: 1 }
        );

        let reopened = open(&dir, "q");
        let item = reopened.get(id).await.unwrap();
        assert_eq!(item.lease, Some(lease));
        assert_eq!(item.attempts, 1);
        assert!(reopened.scan_available(None, t0(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sub_millisecond_deadline_is_not_cut_short() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "q");
        let id = store.put(json!({}), t0()).await.unwrap();

        let lease = Lease::new(
            LeaseToken::generate(t0()),
            t0() + chrono::Duration::microseconds(500),
        );
        store.set_lease_if_available(id, lease, t0()).await.unwrap();

        // still inside the lease, in the same millisecond as its end
        let now = t0() + chrono::Duration::microseconds(300);
        assert!(store.scan_available(None, now, 10).await.unwrap().is_empty());
        let stored = store.get(id).await.unwrap().lease.unwrap();
        assert!(stored.expires_at >= lease.expires_at);
        assert!(store.clear_lease_if_held(id, lease.token, now).await.unwrap());
    }

    #[tokio::test]
    async fn queues_in_one_file_are_isolated() {
        let dir = TempDir::new().unwrap();
        let a = open(&dir, "a");
        let b = open(&dir, "b");
        let id_a = a.put(json!("a"), t0()).await.unwrap();
        let id_b = b.put(json!("b"), t0()).await.unwrap();

        // ids are per queue
        assert_eq!(id_a, ItemId::new(1));
        assert_eq!(id_b, ItemId::new(1));

        assert_eq!(a.clear().await.unwrap(), 1);
        assert_eq!(a.count().await.unwrap(), 0);
        assert_eq!(b.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ids_keep_growing_after_clear() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "q");
        store.put(json!(1), t0()).await.unwrap();
        store.put(json!(2), t0()).await.unwrap();
        store.clear().await.unwrap();
        let id = store.put(json!(3), t0()).await.unwrap();
        assert_eq!(id, ItemId::new(3));
    }

    #[tokio::test]
    async fn lease_cas_and_held_delete() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "q");
        let id = store.put(json!({}), t0()).await.unwrap();

        let first = Lease::new(LeaseToken::generate(t0()), deadline(t0(), Duration::from_secs(10)));
        let second = Lease::new(LeaseToken::generate(t0()), deadline(t0(), Duration::from_secs(10)));
        assert!(matches!(
            store.set_lease_if_available(id, first, t0()).await.unwrap(),
            LeaseSet::Acquired { .. }
        ));
        assert_eq!(
            store.set_lease_if_available(id, second, t0()).await.unwrap(),
            LeaseSet::Held
        );
        assert_eq!(
            store
                .set_lease_if_available(ItemId::new(42), second, t0())
                .await
                .unwrap(),
            LeaseSet::Missing
        );

        assert_eq!(
            store.delete_if_held(id, second.token, t0()).await.unwrap(),
            HeldDelete::TokenMismatch
        );
        let lapsed = deadline(t0(), Duration::from_secs(10));
        assert_eq!(
            store.delete_if_held(id, first.token, lapsed).await.unwrap(),
            HeldDelete::Expired
        );

        // the lapsed lease can be taken over, and the old holder can no longer release it
        assert_eq!(
            store.set_lease_if_available(id, second, lapsed).await.unwrap(),
            LeaseSet::Acquired { attempts: 2 }
        );
        assert!(!store.clear_lease_if_held(id, first.token, lapsed).await.unwrap());
        assert_eq!(
            store.delete_if_held(id, second.token, t0()).await.unwrap(),
            HeldDelete::Deleted
        );
        assert_eq!(
            store.delete_if_held(id, second.token, t0()).await.unwrap(),
            HeldDelete::Missing
        );
    }

    #[tokio::test]
    async fn replace_lease_requires_current_holder() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, "q");
        let id = store.put(json!({}), t0()).await.unwrap();
        let lease = Lease::new(LeaseToken::generate(t0()), deadline(t0(), Duration::from_secs(10)));
        store.set_lease_if_available(id, lease, t0()).await.unwrap();

        let backoff = Lease::new(LeaseToken::generate(t0()), deadline(t0(), Duration::from_secs(120)));
        assert!(!store
            .replace_lease_if_held(id, backoff.token, backoff, t0())
            .await
            .unwrap());
        assert!(store
            .replace_lease_if_held(id, lease.token, backoff, t0())
            .await
            .unwrap());
        assert_eq!(store.get(id).await.unwrap().lease, Some(backoff));
    }

    #[tokio::test]
    async fn missing_directory_is_storage_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no-such-dir").join("queue.sqlite");
        let err = SqliteStoreProvider::open(path).err().expect("open should fail");
        assert!(matches!(err, QueueError::StorageUnavailable(_)));
    }
}
