pub mod id;
pub mod store;
pub mod memory_store;
pub mod file_store;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{SessionBackend, SessionsConfig};
use crate::types::Message;

pub use file_store::FileConversationStore;
pub use id::{get_session_id, KeyValueStorage};
pub use memory_store::MemoryConversationStore;
pub use store::ConversationStore;

/// Open the conversation store selected in the config.
pub fn open_store(config: &SessionsConfig) -> Arc<dyn ConversationStore> {
    let ttl = Duration::from_secs(config.ttl_secs);
    match config.backend {
        SessionBackend::Memory => {
            info!("Using in-memory conversation store (ttl {}s)", config.ttl_secs);
            Arc::new(MemoryConversationStore::new(ttl))
        }
        SessionBackend::File => {
            let dir = config.sessions_dir();
            info!("Using file conversation store at {}", dir.display());
            Arc::new(FileConversationStore::new(dir, ttl))
        }
    }
}

/// Transcript of one widget session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chatbot_id: Option<String>,
    pub messages: Vec<Message>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            session_id: session_id.into(),
            chatbot_id: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append messages in order.
    pub fn extend(&mut self, chatbot_id: &str, messages: &[Message]) {
        if self.chatbot_id.is_none() && !chatbot_id.is_empty() {
            self.chatbot_id = Some(chatbot_id.to_string());
        }
        self.messages.extend_from_slice(messages);
        self.updated_at = chrono::Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_new() {
        let conv = Conversation::new("session_1");
        assert_eq!(conv.session_id, "session_1");
        assert!(conv.messages.is_empty());
        assert!(conv.chatbot_id.is_none());
    }

    #[test]
    fn test_conversation_extend_keeps_order() {
        let mut conv = Conversation::new("s");
        conv.extend(
            "bot-1",
            &[Message::user("Hello"), Message::assistant("Hi there!")],
        );
        assert_eq!(conv.chatbot_id.as_deref(), Some("bot-1"));
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].content, "Hello");
        assert_eq!(conv.messages[1].content, "Hi there!");
    }
}
