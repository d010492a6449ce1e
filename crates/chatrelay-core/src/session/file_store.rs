use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::SessionError;
use crate::types::Message;

use super::store::{check_session_key, ConversationStore};
use super::Conversation;

/// File-based conversation store using one JSONL file per session.
///
/// The first line holds metadata (`_type: "metadata"`), every following line
/// is a message. Expiry is judged from the metadata `updated_at`.
pub struct FileConversationStore {
    sessions_dir: PathBuf,
    ttl: Duration,
    write_lock: Mutex<()>,
}

impl FileConversationStore {
    pub fn new(sessions_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        let sessions_dir = sessions_dir.into();
        std::fs::create_dir_all(&sessions_dir).ok();
        Self {
            sessions_dir,
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Keys are checked by `check_session_key` first, so the mapping is
    /// one-to-one.
    fn session_path(&self, key: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.jsonl", key))
    }

    fn is_expired(&self, conversation: &Conversation) -> bool {
        let age = chrono::Utc::now() - conversation.updated_at;
        age.to_std().map(|age| age >= self.ttl).unwrap_or(false)
    }

    async fn read(&self, key: &str) -> Result<Option<Conversation>, SessionError> {
        let path = self.session_path(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SessionError::Read(e.to_string())),
        };
        Ok(Some(parse_jsonl(key, &content)))
    }

    async fn write(&self, conversation: &Conversation) -> Result<(), SessionError> {
        let path = self.session_path(&conversation.session_id);
        tokio::fs::write(&path, to_jsonl(conversation))
            .await
            .map_err(|e| SessionError::Write(e.to_string()))
    }
}

fn parse_jsonl(key: &str, content: &str) -> Conversation {
    let mut conversation = Conversation::new(key);
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(data) = serde_json::from_str::<serde_json::Value>(line) else {
            warn!("Skipping unreadable line in session {}", key);
            continue;
        };
        if data.get("_type").and_then(|v| v.as_str()) == Some("metadata") {
            if let Some(ts) = parse_time(&data, "created_at") {
                conversation.created_at = ts;
            }
            if let Some(ts) = parse_time(&data, "updated_at") {
                conversation.updated_at = ts;
            }
            conversation.chatbot_id = data
                .get("chatbot_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
        } else if let Ok(msg) = serde_json::from_value::<Message>(data) {
            conversation.messages.push(msg);
        }
    }
    conversation
}

fn parse_time(data: &serde_json::Value, field: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    data.get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

fn to_jsonl(conversation: &Conversation) -> String {
    let mut lines = Vec::with_capacity(conversation.messages.len() + 1);
    let meta = serde_json::json!({
        "_type": "metadata",
        "created_at": conversation.created_at.to_rfc3339(),
        "updated_at": conversation.updated_at.to_rfc3339(),
        "chatbot_id": conversation.chatbot_id,
    });
    lines.push(meta.to_string());
    for msg in &conversation.messages {
        if let Ok(line) = serde_json::to_string(msg) {
            lines.push(line);
        }
    }
    lines.join("\n") + "\n"
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn load(&self, session_id: &str) -> Result<Option<Conversation>, SessionError> {
        check_session_key(session_id)?;
        match self.read(session_id).await? {
            Some(conv) if self.is_expired(&conv) => {
                let _guard = self.write_lock.lock().await;
                tokio::fs::remove_file(self.session_path(session_id)).await.ok();
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn append(
        &self,
        session_id: &str,
        chatbot_id: &str,
        messages: &[Message],
    ) -> Result<(), SessionError> {
        check_session_key(session_id)?;
        let _guard = self.write_lock.lock().await;
        let mut conversation = match self.read(session_id).await? {
            Some(conv) if !self.is_expired(&conv) => conv,
            _ => Conversation::new(session_id),
        };
        conversation.extend(chatbot_id, messages);
        self.write(&conversation).await
    }

    async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        check_session_key(session_id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.session_path(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SessionError::Write(e.to_string())),
        }
    }

    async fn evict_expired(&self) -> usize {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        let Ok(mut entries) = tokio::fs::read_dir(&self.sessions_dir).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            if self.is_expired(&parse_jsonl(&key, &content))
                && tokio::fs::remove_file(&path).await.is_ok()
            {
                removed += 1;
            }
        }
        removed
    }
}
