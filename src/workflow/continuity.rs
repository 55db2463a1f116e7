//! Conversation continuity across runs.
//!
//! Each run starts by pulling a bounded window of prior turns plus the
//! last successful run's file map, so a continuation refines the existing
//! project instead of starting cold. This step never fails: any store
//! problem degrades to an empty context, which is a valid cold start.

use std::collections::BTreeMap;

use tracing::warn;

use crate::llm::{ChatMessage, Role};
use crate::store::{DbHandle, MessageRole};

#[derive(Debug, Default)]
pub struct Continuity {
    /// Prior turns in chronological order, ready to seed the agent.
    pub messages: Vec<ChatMessage>,
    /// File map of the most recent successful run, empty if none.
    pub previous_files: BTreeMap<String, String>,
    /// How many prior messages the window held.
    pub prior_message_count: usize,
}

impl Continuity {
    /// The triggering user message is persisted before the workflow starts,
    /// so a window holding at most that one message means a first turn.
    pub fn is_first_turn(&self) -> bool {
        self.prior_message_count <= 1
    }
}

pub async fn load(db: &DbHandle, project_id: i64, window: usize) -> Continuity {
    let recent = match db
        .call(move |store| store.find_recent_messages(project_id, window))
        .await
    {
        Ok(recent) => recent,
        Err(e) => {
            warn!(project_id, error = %e, "History load failed, starting cold");
            return Continuity::default();
        }
    };

    // `recent` is newest-first; the newest message with a fragment carries
    // the file set to restore.
    let previous_files = recent
        .iter()
        .find_map(|m| m.fragment.as_ref())
        .map(|f| f.files.clone())
        .unwrap_or_default();

    let prior_message_count = recent.len();
    let messages = recent
        .into_iter()
        .rev()
        .map(|m| {
            let role = match m.role {
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
            };
            ChatMessage::text(role, m.content)
        })
        .collect();

    Continuity {
        messages,
        previous_files,
        prior_message_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MessageStore, MessageType, NewFragment, NewMessage};

    fn seeded_db() -> (DbHandle, i64) {
        let store = MessageStore::new_in_memory().unwrap();
        let project = store.create_project("p").unwrap();
        (DbHandle::new(store), project.id)
    }

    async fn add_message(
        db: &DbHandle,
        project_id: i64,
        role: MessageRole,
        content: &str,
        fragment: Option<NewFragment>,
    ) {
        let content = content.to_string();
        db.call(move |store| {
            store.create_message(&NewMessage {
                project_id,
                role,
                msg_type: MessageType::Result,
                content,
                fragment,
            })
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn empty_project_is_first_turn() {
        let (db, project_id) = seeded_db();
        let continuity = load(&db, project_id, 5).await;
        assert!(continuity.is_first_turn());
        assert!(continuity.messages.is_empty());
        assert!(continuity.previous_files.is_empty());
    }

    #[tokio::test]
    async fn single_user_message_is_still_first_turn() {
        let (db, project_id) = seeded_db();
        add_message(&db, project_id, MessageRole::User, "build todo app", None).await;

        let continuity = load(&db, project_id, 5).await;
        assert!(continuity.is_first_turn());
        assert_eq!(continuity.messages.len(), 1);
    }

    #[tokio::test]
    async fn messages_come_back_in_chronological_order() {
        let (db, project_id) = seeded_db();
        add_message(&db, project_id, MessageRole::User, "first", None).await;
        add_message(&db, project_id, MessageRole::Assistant, "reply", None).await;
        add_message(&db, project_id, MessageRole::User, "second", None).await;

        let continuity = load(&db, project_id, 5).await;
        assert!(!continuity.is_first_turn());
        let texts: Vec<_> = continuity
            .messages
            .iter()
            .map(|m| crate::llm::joined_text(&m.content).unwrap())
            .collect();
        assert_eq!(texts, vec!["first", "reply", "second"]);
    }

    #[tokio::test]
    async fn window_is_bounded() {
        let (db, project_id) = seeded_db();
        for i in 0..8 {
            add_message(&db, project_id, MessageRole::User, &format!("m{}", i), None).await;
        }
        let continuity = load(&db, project_id, 5).await;
        assert_eq!(continuity.messages.len(), 5);
        // Oldest surviving message is m3 after the window cut.
        assert_eq!(
            crate::llm::joined_text(&continuity.messages[0].content).unwrap(),
            "m3"
        );
    }

    #[tokio::test]
    async fn newest_fragment_in_window_supplies_files() {
        let (db, project_id) = seeded_db();
        let mut old_files = BTreeMap::new();
        old_files.insert("old.ts".to_string(), "v1".to_string());
        let mut new_files = BTreeMap::new();
        new_files.insert("new.ts".to_string(), "v2".to_string());

        add_message(
            &db,
            project_id,
            MessageRole::Assistant,
            "r1",
            Some(NewFragment {
                sandbox_url: "https://a".into(),
                title: "t".into(),
                files: old_files,
            }),
        )
        .await;
        add_message(
            &db,
            project_id,
            MessageRole::Assistant,
            "r2",
            Some(NewFragment {
                sandbox_url: "https://b".into(),
                title: "t".into(),
                files: new_files.clone(),
            }),
        )
        .await;
        add_message(&db, project_id, MessageRole::User, "again", None).await;

        let continuity = load(&db, project_id, 5).await;
        assert_eq!(continuity.previous_files, new_files);
    }

    #[tokio::test]
    async fn unknown_project_degrades_to_cold_start() {
        let (db, _) = seeded_db();
        let continuity = load(&db, 9999, 5).await;
        assert!(continuity.messages.is_empty());
        assert!(continuity.is_first_turn());
    }
}
