//! SQLite-backed outlet store.
//!
//! Wraps a `rusqlite::Connection` behind an `Arc<Mutex<>>` and dispatches
//! all work onto the blocking thread pool via `tokio::task::spawn_blocking`
//! so the async runtime is never blocked.  The store is read-only for the
//! agent: the only write path is the loader, which runs at startup.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kopi_tools::backend::{BackendError, OutletDatabase, Row};

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One coffee outlet record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outlet {
    /// Outlet name, e.g. "SS2 Mall".
    pub name: String,
    /// Street address.
    pub address: String,
    /// Neighbourhood or suburb.
    pub area: String,
    /// State or federal territory.
    pub state: String,
    /// Opening time as 24-hour `HH:MM` ("00:00" for 24-hour outlets).
    pub opening_time: String,
    /// Closing time as 24-hour `HH:MM` ("23:59" for 24-hour outlets).
    pub closing_time: String,
    /// Map link for directions.
    #[serde(default)]
    pub direction_url: String,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Thread-safe handle to the outlet database.
#[derive(Clone)]
pub struct OutletStore {
    conn: Arc<Mutex<Connection>>,
    loaded: Arc<AtomicBool>,
}

impl OutletStore {
    /// Open (or create) the outlet database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening outlet database");

        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Create an in-memory outlet database — useful for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory outlet database");
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        // WAL mode: concurrent readers, non-blocking writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS outlets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                address TEXT NOT NULL,
                area TEXT NOT NULL,
                state TEXT NOT NULL,
                opening_time TEXT NOT NULL,
                closing_time TEXT NOT NULL,
                direction_url TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_outlets_area ON outlets(area);",
        )?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM outlets", [], |row| row.get(0))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            loaded: Arc::new(AtomicBool::new(count > 0)),
        })
    }

    /// Execute a closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    /// Insert outlet records, replacing any existing data.
    pub async fn replace_all(&self, outlets: Vec<Outlet>) -> StoreResult<usize> {
        let count = outlets.len();
        self.run(move |conn| {
            conn.execute("DELETE FROM outlets", [])?;
            let mut stmt = conn.prepare(
                "INSERT INTO outlets \
                 (name, address, area, state, opening_time, closing_time, direction_url) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for o in &outlets {
                stmt.execute(rusqlite::params![
                    o.name,
                    o.address,
                    o.area,
                    o.state,
                    o.opening_time,
                    o.closing_time,
                    o.direction_url,
                ])?;
            }
            Ok(())
        })
        .await?;

        self.loaded.store(count > 0, Ordering::SeqCst);
        info!(count, "outlet data loaded");
        Ok(count)
    }

    /// Load outlet records from a JSON array file.
    pub async fn load_from_json(&self, path: impl AsRef<Path>) -> StoreResult<usize> {
        let text = std::fs::read_to_string(path)?;
        let outlets: Vec<Outlet> = serde_json::from_str(&text)?;
        self.replace_all(outlets).await
    }

    /// Number of outlets currently stored.
    pub async fn count(&self) -> StoreResult<i64> {
        self.run(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM outlets", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
    }

    fn execute_select(conn: &Connection, sql: &str) -> StoreResult<Vec<Row>> {
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|s| s.to_owned())
            .collect();

        let mut rows = Vec::new();
        let mut raw = stmt.query([])?;
        while let Some(r) = raw.next()? {
            let mut map = Row::new();
            for (i, name) in column_names.iter().enumerate() {
                let value = match r.get_ref(i)? {
                    ValueRef::Null => serde_json::Value::Null,
                    ValueRef::Integer(v) => serde_json::Value::from(v),
                    ValueRef::Real(v) => serde_json::Value::from(v),
                    ValueRef::Text(v) => {
                        serde_json::Value::String(String::from_utf8_lossy(v).into_owned())
                    }
                    ValueRef::Blob(_) => serde_json::Value::Null,
                };
                map.insert(name.clone(), value);
            }
            rows.push(map);
        }
        Ok(rows)
    }
}

#[async_trait]
impl OutletDatabase for OutletStore {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, BackendError> {
        if !self.is_ready() {
            return Err(BackendError::NotLoaded("outlet database empty".into()));
        }
        // Second line of defense behind the adapter's SQL guard.
        let is_select = sql
            .trim_start()
            .get(..6)
            .map(|prefix| prefix.eq_ignore_ascii_case("select"))
            .unwrap_or(false);
        if !is_select {
            return Err(BackendError::Rejected("read-only store".into()));
        }

        let sql = sql.to_owned();
        self.run(move |conn| Self::execute_select(conn, &sql))
            .await
            .map_err(|e| match e {
                StoreError::Sqlite(err) => BackendError::Rejected(err.to_string()),
                other => BackendError::Failed(other.to_string()),
            })
    }

    fn is_ready(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outlets() -> Vec<Outlet> {
        vec![
            Outlet {
                name: "SS2 Mall".into(),
                address: "1 Jalan SS2".into(),
                area: "Petaling Jaya".into(),
                state: "Selangor".into(),
                opening_time: "08:00".into(),
                closing_time: "22:00".into(),
                direction_url: "https://maps.example/ss2".into(),
            },
            Outlet {
                name: "Pavilion".into(),
                address: "168 Jalan Bukit Bintang".into(),
                area: "Kuala Lumpur".into(),
                state: "Kuala Lumpur".into(),
                opening_time: "10:00".into(),
                closing_time: "23:00".into(),
                direction_url: String::new(),
            },
            Outlet {
                name: "Bangsar 24h".into(),
                address: "2 Jalan Bangsar".into(),
                area: "Bangsar".into(),
                state: "Kuala Lumpur".into(),
                opening_time: "00:00".into(),
                closing_time: "23:59".into(),
                direction_url: String::new(),
            },
        ]
    }

    #[tokio::test]
    async fn empty_store_is_not_ready() {
        let store = OutletStore::open_in_memory().unwrap();
        assert!(!store.is_ready());

        let result = store.execute("SELECT name FROM outlets").await;
        assert!(matches!(result, Err(BackendError::NotLoaded(_))));
    }

    #[tokio::test]
    async fn load_and_query() {
        let store = OutletStore::open_in_memory().unwrap();
        store.replace_all(sample_outlets()).await.unwrap();
        assert!(store.is_ready());
        assert_eq!(store.count().await.unwrap(), 3);

        let rows = store
            .execute("SELECT name, closing_time FROM outlets WHERE area LIKE '%Kuala Lumpur%'")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], serde_json::json!("Pavilion"));
        assert_eq!(rows[0]["closing_time"], serde_json::json!("23:00"));
    }

    #[tokio::test]
    async fn aggregate_query() {
        let store = OutletStore::open_in_memory().unwrap();
        store.replace_all(sample_outlets()).await.unwrap();

        let rows = store
            .execute("SELECT COUNT(*) AS count FROM outlets")
            .await
            .unwrap();
        assert_eq!(rows[0]["count"], serde_json::json!(3));
    }

    #[tokio::test]
    async fn rejects_non_select() {
        let store = OutletStore::open_in_memory().unwrap();
        store.replace_all(sample_outlets()).await.unwrap();

        let result = store.execute("DELETE FROM outlets").await;
        assert!(matches!(result, Err(BackendError::Rejected(_))));
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn bad_sql_is_rejected_not_fatal() {
        let store = OutletStore::open_in_memory().unwrap();
        store.replace_all(sample_outlets()).await.unwrap();

        let result = store.execute("SELECT nope FROM outlets").await;
        assert!(matches!(result, Err(BackendError::Rejected(_))));
    }

    #[tokio::test]
    async fn load_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outlets.json");
        std::fs::write(&path, serde_json::to_string(&sample_outlets()).unwrap()).unwrap();

        let store = OutletStore::open_in_memory().unwrap();
        let count = store.load_from_json(&path).await.unwrap();
        assert_eq!(count, 3);
        assert!(store.is_ready());
    }

    #[tokio::test]
    async fn replace_all_overwrites() {
        let store = OutletStore::open_in_memory().unwrap();
        store.replace_all(sample_outlets()).await.unwrap();
        store
            .replace_all(sample_outlets().into_iter().take(1).collect())
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
