//! Session Store (C10, spec §4.7): a TTL-bounded, process-wide key-value
//! store for conversation state. Ephemeral by design — sessions are not
//! system-of-record data (see Non-goals) and living only in the serving
//! process is sufficient (spec §9).

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{AppError, AppResult};
use crate::models::Session;

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Session>>,
    ttl_secs: i64,
}

impl SessionStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl_secs,
        }
    }

    pub fn create(&self) -> Session {
        let session = Session::new(self.ttl_secs);
        self.sessions.insert(session.session_id.clone(), session.clone());
        session
    }

    /// Lazily evicts on read: a session past its `expires_at` is treated as
    /// absent and removed (I6/P7).
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let now = chrono::Utc::now();
        let expired = self
            .sessions
            .get(session_id)
            .map(|s| s.is_expired(now))
            .unwrap_or(false);
        if expired {
            self.sessions.remove(session_id);
            return None;
        }
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn get_or_create(&self, session_id: Option<&str>) -> Session {
        if let Some(id) = session_id {
            if let Some(s) = self.get(id) {
                return s;
            }
        }
        self.create()
    }

    /// Replaces the stored session and refreshes its TTL (I6).
    pub fn update(&self, mut session: Session) -> AppResult<Session> {
        session.touch(self.ttl_secs);
        self.sessions.insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Extends a session's TTL by `additional_secs` without otherwise
    /// touching it. Returns `NotFound` if the session is absent or expired.
    pub fn extend(&self, session_id: &str, additional_secs: i64) -> AppResult<Session> {
        let mut session = self
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        session.expires_at += chrono::Duration::seconds(additional_secs);
        session.updated_at = chrono::Utc::now();
        self.sessions.insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    /// Zeros intent/current_node/collected_values, preserves history (spec
    /// §4.7).
    pub fn reset(&self, session_id: &str) -> AppResult<Session> {
        let mut session = self
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        session.reset_flow_state();
        self.update(session)
    }

    pub fn add_message(&self, session_id: &str, role: &str, content: &str) -> AppResult<Session> {
        let mut session = self
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        session.add_message(role, content);
        self.update(session)
    }

    pub fn list_active(&self, limit: usize) -> Vec<String> {
        let now = chrono::Utc::now();
        self.sessions
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .take(limit)
            .collect()
    }

    /// Explicit sweep of expired sessions. Lazy eviction on `get` already
    /// reclaims individually-touched sessions; this additionally catches
    /// ones nobody has looked up since expiring.
    pub fn cleanup_expired(&self) -> usize {
        let now = chrono::Utc::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        for id in &expired {
            self.sessions.remove(id);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_round_trips() {
        let store = SessionStore::new(3600);
        let s = store.create();
        let fetched = store.get(&s.session_id).unwrap();
        assert_eq!(fetched.session_id, s.session_id);
    }

    #[test]
    fn get_on_unknown_id_returns_none() {
        let store = SessionStore::new(3600);
        assert!(store.get("does-not-exist").is_none());
    }

    #[test]
    fn update_refreshes_ttl() {
        let store = SessionStore::new(3600);
        let mut s = store.create();
        let original_expiry = s.expires_at;
        s.current_intent = Some("file_claim".into());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let updated = store.update(s).unwrap();
        assert!(updated.expires_at >= original_expiry);
        assert_eq!(updated.current_intent.as_deref(), Some("file_claim"));
    }

    #[test]
    fn reset_clears_slots_but_preserves_history() {
        let store = SessionStore::new(3600);
        let mut s = store.create();
        s.add_message("user", "hi");
        s.current_intent = Some("file_claim".into());
        s.collected_values.insert("product_type".into(), serde_json::json!("life"));
        store.update(s.clone()).unwrap();

        let reset = store.reset(&s.session_id).unwrap();
        assert!(reset.current_intent.is_none());
        assert!(reset.collected_values.is_empty());
        assert_eq!(reset.conversation_history.len(), 1);
    }

    #[test]
    fn delete_removes_session() {
        let store = SessionStore::new(3600);
        let s = store.create();
        assert!(store.delete(&s.session_id));
        assert!(store.get(&s.session_id).is_none());
    }

    #[test]
    fn expired_session_is_unobservable() {
        let store = SessionStore::new(0);
        let s = store.create();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.get(&s.session_id).is_none());
    }
}
