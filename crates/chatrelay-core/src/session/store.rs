use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SessionError;
use crate::types::Message;

use super::Conversation;

/// External key/value store for conversations, keyed by session id.
///
/// Entries expire `ttl` after their last write; expired entries read as
/// absent.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a live conversation.
    async fn load(&self, session_id: &str) -> Result<Option<Conversation>, SessionError>;

    /// Append messages, creating the conversation if needed.
    async fn append(
        &self,
        session_id: &str,
        chatbot_id: &str,
        messages: &[Message],
    ) -> Result<(), SessionError>;

    /// Delete a conversation. Returns whether one existed.
    async fn delete(&self, session_id: &str) -> Result<bool, SessionError>;

    /// Drop all expired conversations, returning how many were removed.
    async fn evict_expired(&self) -> usize;
}

/// Periodically evict expired conversations until the task is aborted.
pub fn spawn_sweeper(
    store: Arc<dyn ConversationStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.evict_expired().await;
            if removed > 0 {
                debug!("Evicted {} expired conversations", removed);
            }
        }
    })
}

/// Validate a session id before it is used as a storage key.
///
/// The accepted characters map one-to-one onto file names, so distinct ids
/// never share a file in the file store.
pub fn check_session_key(session_id: &str) -> Result<(), SessionError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 200
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidKey(crate::util::truncate_string(
            session_id, 64, "...",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_session_key() {
        assert!(check_session_key("session_1700000000000_abc123xyz").is_ok());
        assert!(check_session_key("api-default.1").is_ok());
        assert!(check_session_key("api:default").is_err());
        assert!(check_session_key("").is_err());
        assert!(check_session_key("../etc/passwd").is_err());
        assert!(check_session_key(&"a".repeat(201)).is_err());
    }
}
