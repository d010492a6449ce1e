use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::SessionError;
use crate::types::Message;

use super::store::{check_session_key, ConversationStore};
use super::Conversation;

struct Entry {
    conversation: Conversation,
    touched: Instant,
}

/// In-process conversation store with TTL eviction.
pub struct MemoryConversationStore {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl MemoryConversationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, entry: &Entry, now: Instant) -> bool {
        now.duration_since(entry.touched) < self.ttl
    }

    /// Drop the entry only if it is still stale under the shard lock; a
    /// concurrent append may have refreshed it since `now` was taken.
    fn remove_stale(&self, session_id: &str, now: Instant) -> bool {
        self.entries
            .remove_if(session_id, |_, entry| !self.is_live(entry, now))
            .is_some()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn load(&self, session_id: &str) -> Result<Option<Conversation>, SessionError> {
        check_session_key(session_id)?;
        let now = Instant::now();
        let found = match self.entries.get(session_id) {
            Some(entry) if self.is_live(&entry, now) => Some(entry.conversation.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if found.is_none() {
            self.remove_stale(session_id, now);
        }
        Ok(found)
    }

    async fn append(
        &self,
        session_id: &str,
        chatbot_id: &str,
        messages: &[Message],
    ) -> Result<(), SessionError> {
        check_session_key(session_id)?;
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(session_id.to_string())
            .or_insert_with(|| Entry {
                conversation: Conversation::new(session_id),
                touched: now,
            });
        if !self.is_live(&entry, now) {
            entry.conversation = Conversation::new(session_id);
        }
        entry.conversation.extend(chatbot_id, messages);
        entry.touched = now;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        check_session_key(session_id)?;
        Ok(self.entries.remove(session_id).is_some())
    }

    async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| self.is_live(entry, now));
        before.saturating_sub(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_load() {
        let store = MemoryConversationStore::new(Duration::from_secs(60));
        store
            .append("s1", "bot-1", &[Message::user("Hello"), Message::assistant("Hi")])
            .await
            .unwrap();
        store
            .append("s1", "bot-1", &[Message::user("Again")])
            .await
            .unwrap();

        let conv = store.load("s1").await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 3);
        assert_eq!(conv.messages[2].content, "Again");
        assert_eq!(conv.chatbot_id.as_deref(), Some("bot-1"));
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let store = MemoryConversationStore::new(Duration::from_secs(60));
        store.append("s1", "bot", &[Message::user("a")]).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.load("s1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(store.load("s1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_refreshes_ttl() {
        let store = MemoryConversationStore::new(Duration::from_secs(60));
        store.append("s1", "bot", &[Message::user("a")]).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        store.append("s1", "bot", &[Message::user("b")]).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;

        let conv = store.load("s1").await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshed_entry_survives_stale_removal() {
        let store = MemoryConversationStore::new(Duration::from_secs(60));
        store.append("s1", "bot", &[Message::user("old")]).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        // A reader saw the entry as stale, then a writer refreshed it.
        let seen_at = Instant::now();
        store.append("s1", "bot", &[Message::user("new")]).await.unwrap();
        assert!(!store.remove_stale("s1", seen_at));

        let conv = store.load("s1").await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].content, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_removed() {
        let store = MemoryConversationStore::new(Duration::from_secs(60));
        store.append("s1", "bot", &[Message::user("a")]).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.remove_stale("s1", Instant::now()));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let store = MemoryConversationStore::new(Duration::from_secs(10));
        store.append("old", "bot", &[Message::user("a")]).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        store.append("new", "bot", &[Message::user("b")]).await.unwrap();

        assert_eq!(store.evict_expired().await, 1);
        assert_eq!(store.len(), 1);
        assert!(store.load("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryConversationStore::new(Duration::from_secs(60));
        store.append("s1", "bot", &[Message::user("a")]).await.unwrap();
        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_bad_keys() {
        let store = MemoryConversationStore::new(Duration::from_secs(60));
        assert!(store.append("../x", "bot", &[]).await.is_err());
        assert!(store.load("").await.is_err());
    }
}
