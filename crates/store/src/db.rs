//! Connection handle and migrations
//!
//! One shared connection behind a mutex; repositories run on the caller's
//! thread and the remote drivers are the only suspension points, so the
//! lock is only ever held for short synchronous sections.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use restbench_crypto::FieldCipher;
use rusqlite::Connection;
use tracing::info;

use crate::error::Result;
use crate::schema::{SCHEMA_SQL, SCHEMA_VERSION};

/// Store handle, cheap to clone
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) cipher: FieldCipher,
    pub(crate) invalidation: crate::settings::InvalidationHook,
}

impl Store {
    /// Opens (or creates) the database at `path`.
    ///
    /// `cipher` encrypts sensitive fields at the repository boundary; the
    /// database file itself stays plaintext.
    pub fn open(path: impl AsRef<Path>, cipher: FieldCipher) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self::from_connection(conn, cipher)?;
        info!(path = %path.as_ref().display(), "Opened store");
        Ok(store)
    }

    /// Opens an in-memory database (test helper).
    pub fn open_in_memory(cipher: FieldCipher) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, cipher)
    }

    fn from_connection(conn: Connection, cipher: FieldCipher) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher,
            invalidation: Default::default(),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(SCHEMA_SQL)?;
        let version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| {
                r.get(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match version {
            None => {
                conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [
                    SCHEMA_VERSION,
                ])?;
            }
            Some(v) if v < SCHEMA_VERSION => {
                // Future in-place migrations slot in here, versioned.
                conn.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store connection lock poisoned")
    }

    pub(crate) fn cipher(&self) -> &FieldCipher {
        &self.cipher
    }

    /// RFC3339 timestamp used for every created/updated column.
    pub(crate) fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}
