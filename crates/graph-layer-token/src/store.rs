//! SQLite token store.
//!
//! One table keyed by token id; `value` holds the JSON payload text.
//! Every access goes through a [`TokenTx`], either for a single statement
//! or inside [`SqliteTokenStore::with_transaction`].

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::{Result, TokenError};

/// Current schema version tracked in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

/// Raw `token` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub token_id: String,
    pub app_id: String,
    pub is_user: bool,
    /// Serialized payload, parsed by the manager.
    pub value: String,
}

/// Statement scope over a connection or an open transaction.
pub struct TokenTx<'a> {
    conn: &'a Connection,
    fail_insert: bool,
}

impl TokenTx<'_> {
    pub fn get(&self, token_id: &str) -> Result<Option<TokenRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT token_id, value, app_id, is_user FROM token WHERE token_id = ?1",
                params![token_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn insert(&self, record: &TokenRecord) -> Result<()> {
        if self.fail_insert {
            return Err(TokenError::Storage("injected insert fault".to_string()));
        }
        self.conn.execute(
            "INSERT INTO token (token_id, value, app_id, is_user) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.token_id,
                record.value,
                record.app_id,
                record.is_user as i64
            ],
        )?;
        Ok(())
    }

    /// Delete a record. Returns whether a row was removed.
    pub fn delete(&self, token_id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM token WHERE token_id = ?1", params![token_id])?;
        Ok(n > 0)
    }

    /// Every record, ordered by token id.
    pub fn records(&self) -> Result<Vec<TokenRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT token_id, value, app_id, is_user FROM token ORDER BY token_id")?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM token", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TokenRecord> {
    Ok(TokenRecord {
        token_id: row.get(0)?,
        value: row.get(1)?,
        app_id: row.get(2)?,
        is_user: row.get::<_, i64>(3)? != 0,
    })
}

/// Token persistence backed by one SQLite connection.
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
    #[cfg(test)]
    insert_fault: std::sync::atomic::AtomicBool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl SqliteTokenStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                TokenError::Storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self::from_connection(conn);
        store.initialize()?;

        info!(path = %path.display(), "Token store opened");
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let store = Self::from_connection(Connection::open_in_memory()?);
        store.initialize()?;
        debug!("In-memory token store created");
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            #[cfg(test)]
            insert_fault: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS token (
                token_id TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                app_id TEXT NOT NULL,
                is_user INTEGER NOT NULL
            );
            "#,
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────────────────────────

impl SqliteTokenStore {
    pub fn get(&self, token_id: &str) -> Result<Option<TokenRecord>> {
        let conn = self.conn.lock();
        self.scope(&conn).get(token_id)
    }

    pub fn insert(&self, record: &TokenRecord) -> Result<()> {
        let conn = self.conn.lock();
        TokenTx {
            conn: &conn,
            fail_insert: self.take_insert_fault(),
        }
        .insert(record)
    }

    pub fn delete(&self, token_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        self.scope(&conn).delete(token_id)
    }

    pub fn records(&self) -> Result<Vec<TokenRecord>> {
        let conn = self.conn.lock();
        self.scope(&conn).records()
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        self.scope(&conn).count()
    }

    /// Run several statements atomically.
    ///
    /// Commits when `f` returns `Ok`; any error rolls everything back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TokenTx<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let fail_insert = self.take_insert_fault();
        let tx = conn.transaction()?;

        let result = f(&TokenTx {
            conn: &tx,
            fail_insert,
        });

        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            // Dropping the transaction rolls it back.
            Err(e) => Err(e),
        }
    }

    fn scope<'a>(&self, conn: &'a Connection) -> TokenTx<'a> {
        TokenTx {
            conn,
            fail_insert: false,
        }
    }

    #[cfg(test)]
    fn take_insert_fault(&self) -> bool {
        self.insert_fault
            .swap(false, std::sync::atomic::Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn take_insert_fault(&self) -> bool {
        false
    }

    /// Make the next insert fail, whether standalone or inside a transaction.
    #[cfg(test)]
    pub(crate) fn inject_insert_fault(&self) {
        self.insert_fault
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl std::fmt::Debug for SqliteTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTokenStore").finish_non_exhaustive()
    }
}
