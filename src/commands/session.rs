//! Session inspection commands.
//!
//! Read and drop conversation histories held by the [`ConversationStore`].
//! Sessions only exist in memory; nothing here touches the provider.

use serde::Serialize;

use crate::agent_core::{ConversationStore, Turn};
use crate::inference::types::Role;

/// Summary row for the session list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionListItem {
    pub id: String,
    pub turn_count: usize,
    /// First user message, shortened.
    pub preview: Option<String>,
}

/// Full history of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: String,
    pub turns: Vec<Turn>,
}

const PREVIEW_CHARS: usize = 80;

/// Every session, sorted by id.
pub fn list_sessions(store: &ConversationStore) -> Vec<SessionListItem> {
    store
        .session_ids()
        .into_iter()
        .filter_map(|id| {
            let turns = store.get(&id)?;
            let preview = turns
                .iter()
                .find(|t| t.role == Role::User)
                .map(|t| shorten(&t.content));
            Some(SessionListItem {
                turn_count: turns.len(),
                id,
                preview,
            })
        })
        .collect()
}

/// One session's turns, if it exists.
pub fn get_session(store: &ConversationStore, session_id: &str) -> Option<SessionView> {
    store.get(session_id).map(|turns| SessionView {
        id: session_id.to_string(),
        turns,
    })
}

/// Forget a session. Returns whether it existed.
pub fn delete_session(store: &ConversationStore, session_id: &str) -> bool {
    let removed = store.remove(session_id);
    if removed {
        tracing::info!(session_id, "session deleted");
    }
    removed
}

fn shorten(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(PREVIEW_CHARS - 1).collect();
    format!("{kept}…")
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> ConversationStore {
        let store = ConversationStore::new();
        store.ensure_system_turn("b", "SYS", false);
        store.append("b", Turn::user("how are my clusters?")).unwrap();
        store.append("b", Turn::assistant("fine")).unwrap();
        store.ensure_system_turn("a", "SYS", false);
        store
    }

    #[test]
    fn test_list_sessions_sorted_with_preview() {
        let items = list_sessions(&seeded());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "a");
        assert_eq!(items[0].preview, None);
        assert_eq!(items[1].turn_count, 3);
        assert_eq!(items[1].preview.as_deref(), Some("how are my clusters?"));
    }

    #[test]
    fn test_preview_is_shortened() {
        let store = ConversationStore::new();
        store.append("s", Turn::user(&"é".repeat(200))).unwrap();
        let preview = list_sessions(&store)[0].preview.clone().unwrap();
        assert_eq!(preview.chars().count(), PREVIEW_CHARS);
        assert!(preview.ends_with('…'));
    }

    #[test]
    fn test_get_and_delete() {
        let store = seeded();
        let view = get_session(&store, "b").unwrap();
        assert_eq!(view.turns[0].role, Role::System);
        assert!(get_session(&store, "missing").is_none());

        assert!(delete_session(&store, "b"));
        assert!(!delete_session(&store, "b"));
        assert!(get_session(&store, "b").is_none());
    }
}
