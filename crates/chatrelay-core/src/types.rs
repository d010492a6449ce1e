use serde::{Deserialize, Serialize};

/// Which side of the conversation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat message. Immutable once appended to a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chatbot_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            role,
            created_at: crate::util::timestamp(),
            session_id: None,
            chatbot_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Attach the conversation identifiers used to group history.
    pub fn in_session(mut self, session_id: &str, chatbot_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self.chatbot_id = Some(chatbot_id.to_string());
        self
    }
}

/// Google OAuth tokens held by a client for one session/chatbot pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Expiry as epoch milliseconds.
    #[serde(default)]
    pub expires_at: i64,
}

impl GoogleTokens {
    /// Build tokens from an `expires_in` (seconds) relative to now.
    pub fn expiring_in(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        let expires_at = chrono::Utc::now().timestamp_millis() + expires_in * 1000;
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp_millis())
    }
}

/// Metadata the attachment service reports for a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMetadata {
    pub file_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: u64,
    #[serde(default)]
    pub uploaded_at: String,
    #[serde(default)]
    pub status: String,
}

/// Reference to an uploaded attachment sent along with a chat message.
///
/// Stored files carry a `fileId`, vector uploads a `vectorId`. Each is
/// forwarded to the chat workflow under the key it arrived with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vector_id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
}

/// Read-only chatbot presentation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatbotProfile {
    pub chatbot_id: String,
    pub name: String,
    pub title: String,
    pub description: String,
    pub avatar: String,
    pub accent_color: String,
    pub width: u32,
    pub height: u32,
    pub greeting_message: String,
}

impl Default for ChatbotProfile {
    fn default() -> Self {
        Self {
            chatbot_id: String::new(),
            name: "Assistant".to_string(),
            title: "Chat with us".to_string(),
            description: String::new(),
            avatar: String::new(),
            accent_color: "#2563eb".to_string(),
            width: 380,
            height: 560,
            greeting_message: "Hi! How can I help you today?".to_string(),
        }
    }
}
