//! Account sessions and the process-wide account registry.

pub mod abilities;
pub mod session;

pub use abilities::{AbilityCounts, AbilityRegistry};
pub use session::{AccountSession, StateFlags};

use reach_protocol::AccountId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Process-wide map of account id to session. Sessions are created lazily
/// and never duplicated for the same id.
pub struct AccountRegistry {
    sessions: Mutex<HashMap<AccountId, Arc<AccountSession>>>,
    current: Mutex<Option<AccountId>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        AccountRegistry {
            sessions: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
        }
    }

    /// Returns the session for `account_id`, creating it through `make`
    /// when absent. The boolean is `true` when a new session was created.
    pub fn get_or_create(
        &self,
        account_id: AccountId,
        make: impl FnOnce() -> Arc<AccountSession>,
    ) -> (Arc<AccountSession>, bool) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(&account_id) {
            Some(session) => (session.clone(), false),
            None => {
                let session = make();
                sessions.insert(account_id, session.clone());
                (session, true)
            }
        }
    }

    pub fn get(&self, account_id: AccountId) -> Option<Arc<AccountSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).get(&account_id).cloned()
    }

    pub fn remove(&self, account_id: AccountId) -> Option<Arc<AccountSession>> {
        info!(account = account_id, "removing account session");
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).remove(&account_id)
    }

    pub fn set_current(&self, account_id: AccountId) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(account_id);
    }

    pub fn current_id(&self) -> Option<AccountId> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> Option<Arc<AccountSession>> {
        self.current_id().and_then(|id| self.get(id))
    }

    pub fn all(&self) -> Vec<Arc<AccountSession>> {
        let mut sessions: Vec<Arc<AccountSession>> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.account_id());
        sessions
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        AccountRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_config::MemorySettings;

    fn make_session(id: AccountId) -> Arc<AccountSession> {
        AccountSession::new(id, MemorySettings::new(), 16)
    }

    #[tokio::test]
    async fn test_same_id_never_creates_two_sessions() {
        let registry = AccountRegistry::new();
        let (first, created_first) = registry.get_or_create(100, || make_session(100));
        let (second, created_second) = registry.get_or_create(100, || make_session(100));
        assert!(created_first);
        assert!(!created_second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_current_follows_switches() {
        let registry = AccountRegistry::new();
        assert!(registry.current().is_none());
        registry.get_or_create(100, || make_session(100));
        registry.get_or_create(101, || make_session(101));

        registry.set_current(100);
        assert_eq!(registry.current().unwrap().account_id(), 100);
        registry.set_current(101);
        assert_eq!(registry.current().unwrap().account_id(), 101);
    }
}
