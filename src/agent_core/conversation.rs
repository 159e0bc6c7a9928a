//! ConversationStore — in-memory conversation history, keyed by session id.
//!
//! Responsibilities:
//! - Create sessions on first reference; keep them for the process lifetime
//! - Keep the system turn unique and at position 0
//! - Append user, assistant, and tool turns in order
//! - Build `Vec<ChatMessage>` for the inference client
//!
//! The lock is a plain `std::sync::Mutex` and is never held across an await.
//! Concurrent requests on one session id interleave their turns; callers that
//! need strict ordering serialize per session id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::inference::types::{ChatMessage, Role};

use super::errors::AgentError;
use super::types::Turn;

/// What `ensure_system_turn` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemTurnUpdate {
    /// No system turn existed; one was inserted at position 0.
    Created,
    /// The existing system turn's content was replaced.
    Replaced,
    /// The existing system turn already matched.
    Unchanged,
}

/// Process-lifetime store of every session's turns.
#[derive(Default)]
pub struct ConversationStore {
    sessions: Mutex<HashMap<String, Vec<Turn>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Turn>>> {
        // A panic while holding the lock cannot leave a half-written turn, so
        // the data is still usable.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of a session's turns, creating the session if needed.
    pub fn get_or_create(&self, session_id: &str) -> Vec<Turn> {
        self.lock()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Snapshot of a session's turns, if the session exists.
    pub fn get(&self, session_id: &str) -> Option<Vec<Turn>> {
        self.lock().get(session_id).cloned()
    }

    /// Make position 0 a system turn carrying `catalog_text`.
    ///
    /// Idempotent: calling again with the same text reports `Unchanged`
    /// unless `force_refresh` is set.
    pub fn ensure_system_turn(
        &self,
        session_id: &str,
        catalog_text: &str,
        force_refresh: bool,
    ) -> SystemTurnUpdate {
        let mut sessions = self.lock();
        let turns = sessions.entry(session_id.to_string()).or_default();

        match turns.first_mut() {
            Some(first) if first.role == Role::System => {
                if force_refresh || first.content != catalog_text {
                    first.content = catalog_text.to_string();
                    first.timestamp = chrono::Utc::now().to_rfc3339();
                    SystemTurnUpdate::Replaced
                } else {
                    SystemTurnUpdate::Unchanged
                }
            }
            _ => {
                turns.insert(0, Turn::system(catalog_text));
                SystemTurnUpdate::Created
            }
        }
    }

    /// Append a non-system turn.
    pub fn append(&self, session_id: &str, turn: Turn) -> Result<(), AgentError> {
        if turn.role == Role::System {
            return Err(AgentError::InvalidTurn {
                reason: "system turns are managed by ensure_system_turn".into(),
            });
        }
        if turn.role == Role::Tool && turn.tool_call_id.is_none() {
            return Err(AgentError::InvalidTurn {
                reason: "tool turn without a tool_call_id".into(),
            });
        }

        self.lock()
            .entry(session_id.to_string())
            .or_default()
            .push(turn);
        Ok(())
    }

    /// Build the message list for the backend from a session's history.
    pub fn build_chat_messages(&self, session_id: &str) -> Vec<ChatMessage> {
        self.lock()
            .get(session_id)
            .map(|turns| turns.iter().map(Turn::to_chat_message).collect())
            .unwrap_or_default()
    }

    /// All known session ids, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop a session. Returns whether it existed.
    pub fn remove(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    /// Number of turns in a session (0 if unknown).
    pub fn len(&self, session_id: &str) -> usize {
        self.lock().get(session_id).map(Vec::len).unwrap_or(0)
    }

    /// Whether a session has no turns (or does not exist).
    pub fn is_empty(&self, session_id: &str) -> bool {
        self.len(session_id) == 0
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::ToolCallRequest;

    #[test]
    fn test_get_or_create_starts_empty() {
        let store = ConversationStore::new();
        assert!(store.get("s1").is_none());
        assert!(store.get_or_create("s1").is_empty());
        assert_eq!(store.session_ids(), vec!["s1".to_string()]);
    }

    #[test]
    fn test_ensure_system_turn_is_idempotent() {
        let store = ConversationStore::new();
        assert_eq!(
            store.ensure_system_turn("s1", "prompt v1", false),
            SystemTurnUpdate::Created
        );
        assert_eq!(
            store.ensure_system_turn("s1", "prompt v1", false),
            SystemTurnUpdate::Unchanged
        );
        assert_eq!(store.len("s1"), 1);
    }

    #[test]
    fn test_ensure_system_turn_replaces_in_place() {
        let store = ConversationStore::new();
        store.ensure_system_turn("s1", "prompt v1", false);
        store.append("s1", Turn::user("hi")).unwrap();

        assert_eq!(
            store.ensure_system_turn("s1", "prompt v2", false),
            SystemTurnUpdate::Replaced
        );
        assert_eq!(
            store.ensure_system_turn("s1", "prompt v2", true),
            SystemTurnUpdate::Replaced
        );

        let turns = store.get_or_create("s1");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(turns[0].content, "prompt v2");
        assert_eq!(turns[1].role, Role::User);
    }

    #[test]
    fn test_ensure_system_turn_inserts_before_existing_turns() {
        let store = ConversationStore::new();
        store.append("s1", Turn::user("hi")).unwrap();
        store.ensure_system_turn("s1", "prompt", false);

        let turns = store.get_or_create("s1");
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(turns[1].content, "hi");
    }

    #[test]
    fn test_append_rejects_system_and_orphan_tool_turns() {
        let store = ConversationStore::new();
        let err = store.append("s1", Turn::system("x")).unwrap_err();
        assert_eq!(err.kind(), "InvalidTurn");

        let mut orphan = Turn::tool("call_1", "result");
        orphan.tool_call_id = None;
        assert!(store.append("s1", orphan).is_err());
        assert!(store.is_empty("s1"));
    }

    #[test]
    fn test_build_chat_messages_preserves_order() {
        let store = ConversationStore::new();
        store.ensure_system_turn("s1", "prompt", false);
        store.append("s1", Turn::user("list clusters")).unwrap();
        store
            .append(
                "s1",
                Turn::assistant_with_calls(
                    "",
                    vec![ToolCallRequest::new("call_1", "list_clusters", "{}")],
                ),
            )
            .unwrap();
        store.append("s1", Turn::tool("call_1", "a, b")).unwrap();
        store.append("s1", Turn::assistant("Clusters: a, b")).unwrap();

        let messages = store.build_chat_messages("s1");
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert!(messages[2].tool_calls.is_some());
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_sessions_are_isolated_and_removable() {
        let store = ConversationStore::new();
        store.append("a", Turn::user("one")).unwrap();
        store.append("b", Turn::user("two")).unwrap();

        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.len("b"), 1);
        assert!(store.build_chat_messages("a").is_empty());
    }
}
