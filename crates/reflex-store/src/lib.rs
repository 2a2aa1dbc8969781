//! Durable key/value state store for the reflex hub
//!
//! Three logical tables back the reflex engine: a singleton `config` table,
//! per-device `reflexes` rows (driver name, version, lifecycle state), and
//! per-device `drivers` rows (compiled-driver attribute state). All writes
//! are upserts with last-writer-wins semantics per key; the store never
//! interprets values. The flat `config` table is loaded once at open into an
//! in-memory cache so reads on the dispatch path never touch disk.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::{debug, warn};

use reflex_core::DeviceAddress;

/// Config key tracking the applied schema version
pub const SCHEMA_KEY: &str = "schema";

/// Schema scripts, applied in order; the index after the last applied script
/// is persisted under [`SCHEMA_KEY`].
const MIGRATIONS: &[&str] = &[
    // v1: per-device reflex state and driver attribute state
    "CREATE TABLE IF NOT EXISTS reflexes (
        addr  TEXT NOT NULL,
        key   TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (addr, key)
    );
    CREATE TABLE IF NOT EXISTS drivers (
        addr  TEXT NOT NULL,
        key   TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (addr, key)
    );",
];

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("persisted schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: usize, supported: usize },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// The per-device tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTable {
    /// Driver name, version, and lifecycle state per device
    Reflexes,
    /// Committed driver attribute state per device
    Drivers,
}

impl DeviceTable {
    fn name(self) -> &'static str {
        match self {
            DeviceTable::Reflexes => "reflexes",
            DeviceTable::Drivers => "drivers",
        }
    }
}

/// SQLite-backed state store with a warm config cache
pub struct StateStore {
    conn: Mutex<Connection>,
    config_cache: Mutex<HashMap<String, String>>,
}

impl StateStore {
    /// Open (or create) the store at the given path and apply pending
    /// schema migrations
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (used by tests and diagnostics)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        Self::migrate(&conn)?;

        // Warm the config cache; a failed read degrades to empty state
        let config_cache = match Self::read_config(&conn) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "Failed to load config table, starting empty");
                HashMap::new()
            }
        };

        Ok(Self {
            conn: Mutex::new(conn),
            config_cache: Mutex::new(config_cache),
        })
    }

    fn migrate(conn: &Connection) -> StoreResult<()> {
        let applied: usize = conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![SCHEMA_KEY],
                |row| row.get::<_, String>(0),
            )
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if applied > MIGRATIONS.len() {
            return Err(StoreError::SchemaTooNew {
                found: applied,
                supported: MIGRATIONS.len(),
            });
        }

        for (idx, script) in MIGRATIONS.iter().enumerate().skip(applied) {
            debug!(version = idx + 1, "Applying schema migration");
            conn.execute_batch(script)?;
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![SCHEMA_KEY, (idx + 1).to_string()],
            )?;
        }

        Ok(())
    }

    fn read_config(conn: &Connection) -> StoreResult<HashMap<String, String>> {
        let mut stmt = conn.prepare("SELECT key, value FROM config")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Get a single value for a device
    pub fn get(
        &self,
        table: DeviceTable,
        addr: &DeviceAddress,
        key: &str,
    ) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!("SELECT value FROM {} WHERE addr = ?1 AND key = ?2", table.name());
        let mut stmt = conn.prepare_cached(&sql)?;
        let value = stmt
            .query_row(params![addr.to_string(), key], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(value)
    }

    /// Upsert a batch of rows for a device (last-writer-wins per key)
    pub fn put_all<I, K, V>(&self, table: DeviceTable, addr: &DeviceAddress, rows: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        {
            let sql = format!(
                "INSERT INTO {} (addr, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(addr, key) DO UPDATE SET value = excluded.value",
                table.name()
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            for (key, value) in rows {
                stmt.execute(params![addr.to_string(), key.as_ref(), value.as_ref()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete every row for a device
    pub fn delete_all(&self, table: DeviceTable, addr: &DeviceAddress) -> StoreResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!("DELETE FROM {} WHERE addr = ?1", table.name());
        conn.execute(&sql, params![addr.to_string()])?;
        Ok(())
    }

    /// Load every row of a table, grouped by device address string
    ///
    /// Used once at startup to rebuild processors from persisted state.
    pub fn load_all(
        &self,
        table: DeviceTable,
    ) -> StoreResult<HashMap<String, HashMap<String, String>>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let sql = format!("SELECT addr, key, value FROM {}", table.name());
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut map: HashMap<String, HashMap<String, String>> = HashMap::new();
        for row in rows {
            let (addr, key, value) = row?;
            map.entry(addr).or_default().insert(key, value);
        }
        Ok(map)
    }

    /// Get a config value from the warm cache (no disk I/O)
    pub fn config_get(&self, key: &str) -> Option<String> {
        self.config_cache
            .lock()
            .expect("config cache poisoned")
            .get(key)
            .cloned()
    }

    /// Set a config value
    ///
    /// The cache is updated first; a failed disk write is reported to the
    /// caller but the cached value stands (in-memory and persisted views may
    /// transiently diverge).
    pub fn config_put(&self, key: impl Into<String>, value: impl Into<String>) -> StoreResult<()> {
        let key = key.into();
        let value = value.into();

        self.config_cache
            .lock()
            .expect("config cache poisoned")
            .insert(key.clone(), value.clone());

        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Snapshot of the whole config cache
    pub fn config_all(&self) -> HashMap<String, String> {
        self.config_cache
            .lock()
            .expect("config cache poisoned")
            .clone()
    }
}
