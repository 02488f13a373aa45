//! Chain session store.
//!
//! In-memory and keyed by session id, with a secondary chain id index so a
//! request carrying only a chain definition can rediscover its active
//! session. At most one active session exists per chain id. When a
//! [`Database`] is attached, every mutation is written through as a
//! versioned snapshot and sessions are restored on startup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::identity::generate_session_id;
use super::session::{ChainSession, SessionBlueprint, SessionSnapshot};
use crate::db::{Database, SnapshotRow};
use crate::error::EngineError;

/// Lightweight listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub chain_id: String,
    pub chain_name: String,
    pub current_step: u32,
    pub total_steps: u32,
    pub complete: bool,
    pub awaiting_review: bool,
    pub updated_at: String,
}

impl From<&ChainSession> for SessionSummary {
    fn from(s: &ChainSession) -> Self {
        Self {
            session_id: s.session_id.clone(),
            chain_id: s.chain_id.clone(),
            chain_name: s.blueprint.chain_name(),
            current_step: s.current_step,
            total_steps: s.total_steps,
            complete: s.is_complete(),
            awaiting_review: s.is_awaiting_review(),
            updated_at: s.updated_at.to_rfc3339(),
        }
    }
}

type LockTable = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

fn lock_table(table: &LockTable) -> StdMutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
    // The table is only touched in short synchronous sections; a panic in
    // one of them cannot leave the map half-updated.
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive hold on one chain id. Dropping it releases the chain and
/// removes the table entry when nobody else is holding or waiting on it.
pub struct ChainLockGuard {
    chain_id: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl ChainLockGuard {
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }
}

impl std::fmt::Debug for ChainLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainLockGuard")
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl Drop for ChainLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = lock_table(&self.table);
        // Two references left means the table and this guard: no waiters.
        let idle = locks
            .get(&self.chain_id)
            .is_some_and(|held| Arc::ptr_eq(held, &self.lock) && Arc::strong_count(held) == 2);
        if idle {
            locks.remove(&self.chain_id);
        }
    }
}

pub struct ChainSessionStore {
    sessions: RwLock<HashMap<String, ChainSession>>,
    /// chain id -> session id
    by_chain: RwLock<HashMap<String, String>>,
    chain_locks: LockTable,
    db: Option<Database>,
}

impl Default for ChainSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainSessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            by_chain: RwLock::new(HashMap::new()),
            chain_locks: Arc::new(StdMutex::new(HashMap::new())),
            db: None,
        }
    }

    /// Store with SQLite write-through.
    pub fn with_database(db: Database) -> Self {
        Self {
            db: Some(db),
            ..Self::new()
        }
    }

    /// Load persisted snapshots. Unreadable rows are skipped with a warning.
    pub async fn restore(&self) -> Result<usize, EngineError> {
        let Some(db) = &self.db else {
            return Ok(0);
        };

        let rows = db.list_snapshots().await?;
        let mut sessions = self.sessions.write().await;
        let mut by_chain = self.by_chain.write().await;
        let mut restored = 0;

        for row in rows {
            match SessionSnapshot::from_json(&row.snapshot).and_then(SessionSnapshot::restore) {
                Ok(session) => {
                    by_chain.insert(session.chain_id.clone(), session.session_id.clone());
                    sessions.insert(session.session_id.clone(), session);
                    restored += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "[SessionStore] Skipping snapshot for {}: {}",
                        row.session_id,
                        e
                    );
                }
            }
        }

        tracing::info!("[SessionStore] Restored {} session(s)", restored);
        Ok(restored)
    }

    /// Serialize all requests for one chain id. The guard is held for a
    /// whole pipeline pass.
    pub async fn lock_chain(&self, chain_id: &str) -> ChainLockGuard {
        let lock = lock_table(&self.chain_locks)
            .entry(chain_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.clone().lock_owned().await;
        ChainLockGuard {
            chain_id: chain_id.to_string(),
            lock,
            guard: Some(guard),
            table: self.chain_locks.clone(),
        }
    }

    /// Chain ids with a live lock entry.
    pub fn chain_lock_count(&self) -> usize {
        lock_table(&self.chain_locks).len()
    }

    /// Drop the lock entry for a chain nobody is holding or waiting on.
    fn release_idle_lock(&self, chain_id: &str) {
        let mut locks = lock_table(&self.chain_locks);
        if locks
            .get(chain_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(chain_id);
        }
    }

    /// Create a fresh session for a chain, replacing any previous one.
    pub async fn create(
        &self,
        chain_id: &str,
        blueprint: SessionBlueprint,
    ) -> Result<ChainSession, EngineError> {
        if let Some(previous) = self.find_by_chain(chain_id).await {
            self.clear(&previous.session_id).await?;
        }

        let session = ChainSession::new(generate_session_id(), chain_id.to_string(), blueprint);
        {
            let mut sessions = self.sessions.write().await;
            let mut by_chain = self.by_chain.write().await;
            by_chain.insert(chain_id.to_string(), session.session_id.clone());
            sessions.insert(session.session_id.clone(), session.clone());
        }
        self.persist(&session).await?;

        tracing::info!(
            "[SessionStore] Created session {} for {} ({} steps)",
            session.session_id,
            chain_id,
            session.total_steps
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Option<ChainSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// The session currently bound to a chain id, complete or not.
    pub async fn find_by_chain(&self, chain_id: &str) -> Option<ChainSession> {
        let session_id = self.by_chain.read().await.get(chain_id).cloned()?;
        self.get(&session_id).await
    }

    /// Write back a mutated session.
    pub async fn save(&self, session: &ChainSession) -> Result<(), EngineError> {
        {
            let mut sessions = self.sessions.write().await;
            if !sessions.contains_key(&session.session_id) {
                return Err(EngineError::NotFound(format!(
                    "Session {} no longer exists",
                    session.session_id
                )));
            }
            sessions.insert(session.session_id.clone(), session.clone());
        }
        self.persist(session).await
    }

    pub async fn clear(&self, session_id: &str) -> Result<bool, EngineError> {
        let removed = self.sessions.write().await.remove(session_id);
        let Some(session) = removed else {
            return Ok(false);
        };

        {
            let mut by_chain = self.by_chain.write().await;
            if by_chain.get(&session.chain_id).map(String::as_str) == Some(session_id) {
                by_chain.remove(&session.chain_id);
            }
        }
        self.release_idle_lock(&session.chain_id);
        if let Some(db) = &self.db {
            db.delete_snapshot(session_id).await?;
        }

        tracing::info!("[SessionStore] Cleared session {}", session_id);
        Ok(true)
    }

    pub async fn clear_all(&self) -> Result<usize, EngineError> {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        let mut count = 0;
        for id in ids {
            if self.clear(&id).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut list: Vec<SessionSummary> = self
            .sessions
            .read()
            .await
            .values()
            .map(SessionSummary::from)
            .collect();
        list.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        list
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, session: &ChainSession) -> Result<(), EngineError> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let row = SnapshotRow {
            session_id: session.session_id.clone(),
            chain_id: session.chain_id.clone(),
            snapshot: SessionSnapshot::capture(session).to_json()?,
            updated_at: session.updated_at.timestamp_millis(),
        };
        db.upsert_snapshot(row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionKind, ParsedStep};

    fn blueprint(n: usize) -> SessionBlueprint {
        SessionBlueprint {
            kind: ExecutionKind::Chain {
                steps: (0..n).map(|i| ParsedStep::new(format!("p{}", i), "")).collect(),
            },
            framework: None,
            gate_mode: None,
            category: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_by_chain() {
        let store = ChainSessionStore::new();
        let session = store.create("chain-a", blueprint(3)).await.unwrap();
        let found = store.find_by_chain("chain-a").await.unwrap();
        assert_eq!(found.session_id, session.session_id);
        assert!(store.find_by_chain("chain-b").await.is_none());
    }

    #[tokio::test]
    async fn test_one_active_session_per_chain() {
        let store = ChainSessionStore::new();
        let first = store.create("chain-a", blueprint(2)).await.unwrap();
        let second = store.create("chain-a", blueprint(2)).await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert!(store.get(&first.session_id).await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_save_and_clear() {
        let store = ChainSessionStore::new();
        let mut session = store.create("chain-a", blueprint(2)).await.unwrap();
        session.advance().unwrap();
        store.save(&session).await.unwrap();
        assert_eq!(store.get(&session.session_id).await.unwrap().current_step, 2);

        assert!(store.clear(&session.session_id).await.unwrap());
        assert!(store.find_by_chain("chain-a").await.is_none());
        assert!(matches!(
            store.save(&session).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_write_through_and_restore() {
        let db = Database::open_in_memory().unwrap();
        let store = ChainSessionStore::with_database(db.clone());
        let mut session = store.create("chain-a", blueprint(3)).await.unwrap();
        session.record_placeholder(1);
        store.save(&session).await.unwrap();

        let reopened = ChainSessionStore::with_database(db);
        assert_eq!(reopened.restore().await.unwrap(), 1);
        let restored = reopened.find_by_chain("chain-a").await.unwrap();
        assert!(restored.step_result(1).unwrap().is_placeholder);
    }

    #[tokio::test]
    async fn test_chain_lock_serializes() {
        let store = Arc::new(ChainSessionStore::new());
        let guard = store.lock_chain("chain-a").await;

        let s = store.clone();
        let waiter = tokio::spawn(async move {
            let _g = s.lock_chain("chain-a").await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        let _other = store.lock_chain("chain-b").await;
    }

    #[tokio::test]
    async fn test_chain_locks_released_after_use() {
        let store = ChainSessionStore::new();
        for i in 0..1000 {
            let guard = store.lock_chain(&format!("chain-{}", i)).await;
            assert_eq!(guard.chain_id(), format!("chain-{}", i));
        }
        assert_eq!(store.chain_lock_count(), 0);

        let held = store.lock_chain("chain-held").await;
        assert_eq!(store.chain_lock_count(), 1);
        drop(held);
        assert_eq!(store.chain_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_chain_lock_kept_while_waiter_queued() {
        let store = Arc::new(ChainSessionStore::new());
        let first = store.lock_chain("chain-a").await;

        let s = store.clone();
        let waiter = tokio::spawn(async move {
            let _g = s.lock_chain("chain-a").await;
            s.chain_lock_count()
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // The waiter still needs the same mutex, so the entry must survive.
        drop(first);
        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(store.chain_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_drops_idle_chain_lock() {
        let store = ChainSessionStore::new();
        let session = store.create("chain-a", blueprint(2)).await.unwrap();
        let held = store.lock_chain("chain-a").await;

        // A waiter that gives up after the holder let go leaves the entry behind.
        let mut waiter = Box::pin(store.lock_chain("chain-a"));
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(10), waiter.as_mut()).await;
        assert!(timed_out.is_err());
        drop(held);
        drop(waiter);
        assert_eq!(store.chain_lock_count(), 1);

        assert!(store.clear(&session.session_id).await.unwrap());
        assert_eq!(store.chain_lock_count(), 0);
    }
}
