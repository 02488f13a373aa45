//! SQLite persistence for chain session snapshots.
//!
//! Uses rusqlite with WAL mode. The in-memory session store stays
//! authoritative; this table is a write-through copy that lets sessions
//! survive a restart. All async access goes through
//! `tokio::task::spawn_blocking`.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::EngineError;

/// One persisted row of the `chain_sessions` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub session_id: String,
    pub chain_id: String,
    pub snapshot: String,
    pub updated_at: i64,
}

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| EngineError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_tables()?;

        tracing::info!("[Database] Session database opened at: {}", db_path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Database(format!("Failed to open in-memory db: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_tables()?;
        Ok(db)
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| EngineError::Database(e.to_string()))
    }

    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| EngineError::Database(format!("Task join error: {}", e)))?
    }

    fn initialize_tables(&self) -> Result<(), EngineError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS chain_sessions (
                    session_id      TEXT PRIMARY KEY,
                    chain_id        TEXT NOT NULL,
                    snapshot        TEXT NOT NULL,
                    updated_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_chain_sessions_chain ON chain_sessions(chain_id);
                ",
            )
        })
    }

    pub async fn upsert_snapshot(&self, row: SnapshotRow) -> Result<(), EngineError> {
        self.with_conn_async(move |conn| {
            conn.execute(
                "INSERT INTO chain_sessions (session_id, chain_id, snapshot, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                    chain_id = excluded.chain_id,
                    snapshot = excluded.snapshot,
                    updated_at = excluded.updated_at",
                params![row.session_id, row.chain_id, row.snapshot, row.updated_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_snapshot(&self, session_id: &str) -> Result<bool, EngineError> {
        let session_id = session_id.to_string();
        self.with_conn_async(move |conn| {
            let n = conn.execute(
                "DELETE FROM chain_sessions WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn get_snapshot(&self, session_id: &str) -> Result<Option<SnapshotRow>, EngineError> {
        let session_id = session_id.to_string();
        self.with_conn_async(move |conn| {
            conn.query_row(
                "SELECT session_id, chain_id, snapshot, updated_at
                 FROM chain_sessions WHERE session_id = ?1",
                params![session_id],
                row_to_snapshot,
            )
            .optional()
        })
        .await
    }

    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotRow>, EngineError> {
        self.with_conn_async(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, chain_id, snapshot, updated_at
                 FROM chain_sessions ORDER BY updated_at ASC",
            )?;
            let rows = stmt
                .query_map([], row_to_snapshot)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> Result<SnapshotRow, rusqlite::Error> {
    Ok(SnapshotRow {
        session_id: row.get(0)?,
        chain_id: row.get(1)?,
        snapshot: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, chain: &str, at: i64) -> SnapshotRow {
        SnapshotRow {
            session_id: id.to_string(),
            chain_id: chain.to_string(),
            snapshot: "{}".to_string(),
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_list() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_snapshot(row("s1", "chain-a", 2)).await.unwrap();
        db.upsert_snapshot(row("s2", "chain-b", 1)).await.unwrap();
        db.upsert_snapshot(row("s1", "chain-a", 3)).await.unwrap();

        let rows = db.list_snapshots().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].session_id, "s2");
        assert_eq!(db.get_snapshot("s1").await.unwrap().unwrap().updated_at, 3);
    }

    #[tokio::test]
    async fn test_delete_snapshot() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_snapshot(row("s1", "chain-a", 1)).await.unwrap();
        assert!(db.delete_snapshot("s1").await.unwrap());
        assert!(!db.delete_snapshot("s1").await.unwrap());
        assert!(db.get_snapshot("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/sessions.db");
        {
            let db = Database::open(&path).unwrap();
            db.upsert_snapshot(row("s1", "chain-a", 1)).await.unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_snapshots().await.unwrap().len(), 1);
    }
}
