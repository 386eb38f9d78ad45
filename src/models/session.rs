//! Conversation session domain types (spec §3 "Session", §4.7 Session Store).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MAX_HISTORY: usize = 50;
/// Key under which the first query of a multi-turn slot collection is
/// stashed so it survives re-entry into `analyze` on later turns.
pub const ORIGINAL_QUERY_KEY: &str = "__original_query__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub current_intent: Option<String>,
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub collected_values: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationMessage>,
    pub document_context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            current_intent: None,
            current_node_id: None,
            collected_values: HashMap::new(),
            conversation_history: Vec::new(),
            document_context: None,
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn touch(&mut self, ttl_secs: i64) {
        let now = Utc::now();
        self.updated_at = now;
        self.expires_at = now + chrono::Duration::seconds(ttl_secs);
    }

    pub fn add_message(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.conversation_history.push(ConversationMessage {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        });
        let len = self.conversation_history.len();
        if len > MAX_HISTORY {
            self.conversation_history.drain(0..len - MAX_HISTORY);
        }
    }

    pub fn reset_flow_state(&mut self) {
        self.current_intent = None;
        self.current_node_id = None;
        self.collected_values.clear();
        // conversation_history is intentionally preserved.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_trimmed_to_most_recent_50() {
        let mut s = Session::new(3600);
        for i in 0..60 {
            s.add_message("user", format!("msg {i}"));
        }
        assert_eq!(s.conversation_history.len(), MAX_HISTORY);
        assert_eq!(s.conversation_history[0].content, "msg 10");
        assert_eq!(s.conversation_history.last().unwrap().content, "msg 59");
    }

    #[test]
    fn reset_preserves_history_but_clears_slots() {
        let mut s = Session::new(3600);
        s.add_message("user", "hello");
        s.collected_values.insert("product_type".into(), serde_json::json!("life"));
        s.current_intent = Some("claim".into());
        s.reset_flow_state();
        assert!(s.current_intent.is_none());
        assert!(s.collected_values.is_empty());
        assert_eq!(s.conversation_history.len(), 1);
    }

    #[test]
    fn expiry_is_relative_to_ttl() {
        let s = Session::new(10);
        assert!(!s.is_expired(s.created_at));
        assert!(s.is_expired(s.created_at + chrono::Duration::seconds(11)));
    }
}
