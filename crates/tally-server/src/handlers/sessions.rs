//! In-memory registry of import sessions
//!
//! Each wizard run lives behind its own async mutex so a background
//! submission can record outcomes while clients poll the snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use tally_core::ImportSession;

/// Session timeout (30 minutes of inactivity)
const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub type SharedSession = Arc<Mutex<ImportSession>>;

struct SessionEntry {
    session: SharedSession,
    last_activity: Instant,
}

impl SessionEntry {
    fn new(session: ImportSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            last_activity: Instant::now(),
        }
    }

    /// Idle past `timeout` and not running a batch
    fn is_expired(&self, timeout: Duration) -> bool {
        if self.last_activity.elapsed() <= timeout {
            return false;
        }
        // A held lock means a handler or the submission task is using it
        match self.session.try_lock() {
            Ok(session) => !session.is_submitting(),
            Err(_) => false,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

pub struct ImportSessionManager {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    timeout: Duration,
}

impl Default for ImportSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportSessionManager {
    pub fn new() -> Self {
        Self::with_timeout(SESSION_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Register a session and return its id
    pub async fn insert(&self, session: ImportSession) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.write().await;

        // Clean up expired sessions while we're here
        sessions.retain(|_, s| !s.is_expired(self.timeout));

        sessions.insert(id, SessionEntry::new(session));
        debug!("Created import session {}", id);
        id
    }

    /// Look up a live session and mark it active
    pub async fn get(&self, id: Uuid) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).filter(|s| !s.is_expired(self.timeout))?;
        entry.touch();
        Some(entry.session.clone())
    }

    pub async fn remove(&self, id: Uuid) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id).map(|s| s.session)
    }

    /// Number of live sessions
    pub async fn count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|s| !s.is_expired(self.timeout)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{ImportStep, MatchConfig, SessionOptions};

    fn session() -> ImportSession {
        ImportSession::new(SessionOptions::default(), MatchConfig::default())
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let manager = ImportSessionManager::new();
        let id = manager.insert(session()).await;
        assert_eq!(manager.count().await, 1);

        let shared = manager.get(id).await.unwrap();
        assert_eq!(shared.lock().await.step(), ImportStep::Upload);

        assert!(manager.remove(id).await.is_some());
        assert!(manager.get(id).await.is_none());
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_running_batch_outlives_timeout() {
        let manager = ImportSessionManager::with_timeout(Duration::ZERO);

        let mut running = session();
        running
            .load_csv("extrato.csv", "Descrição,Valor,Data\nMercado,-150.00,05/01/2024\n")
            .unwrap();
        running.process(Vec::new()).unwrap();
        running.proceed_to_reconciliation().unwrap();
        assert_eq!(running.begin_submission().unwrap().len(), 1);
        assert!(running.is_submitting());

        let busy = manager.insert(running).await;
        let idle = manager.insert(session()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(manager.get(idle).await.is_none());
        assert!(manager.get(busy).await.is_some());
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let manager = ImportSessionManager::new();
        assert!(manager.get(Uuid::new_v4()).await.is_none());
        assert!(manager.remove(Uuid::new_v4()).await.is_none());
    }
}
