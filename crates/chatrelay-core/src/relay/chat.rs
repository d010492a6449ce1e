use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{RelayError, UpstreamError};
use crate::types::{AttachmentRef, GoogleTokens};
use crate::util::http;

use super::normalize;

/// Header carrying the user's Google access token to the workflow engine.
pub const GOOGLE_TOKEN_HEADER: &str = "X-Google-Access-Token";

/// Body of `POST /api/chat`.
///
/// Every field is optional at the serde level so that a malformed body is
/// reported by [`ChatRequest::validate`] with a readable message.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub chatbot_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub google_tokens: Option<GoogleTokens>,
}

/// A chat request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidChat {
    pub message: String,
    pub chatbot_id: String,
    pub session_id: String,
    pub attachments: Vec<AttachmentRef>,
    pub google_access_token: Option<String>,
}

impl ChatRequest {
    pub fn validate(self) -> Result<ValidChat, RelayError> {
        fn required(value: Option<String>, name: &str) -> Result<String, RelayError> {
            match value {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => Err(RelayError::validation(format!("{} is required", name))),
            }
        }

        let message = required(self.message, "message")?;
        let chatbot_id = required(self.chatbot_id, "chatbotId")?;
        let session_id = required(self.session_id, "sessionId")?;
        crate::session::store::check_session_key(&session_id)
            .map_err(|_| RelayError::validation("sessionId is invalid"))?;

        let google_access_token = self
            .google_tokens
            .map(|t| t.access_token)
            .filter(|t| !t.is_empty());

        Ok(ValidChat {
            message,
            chatbot_id,
            session_id,
            attachments: self.attachments,
            google_access_token,
        })
    }

    /// Validate a raw JSON body; anything that is not an object is rejected.
    pub fn from_value(body: Value) -> Result<ValidChat, RelayError> {
        if !body.is_object() {
            return Err(RelayError::validation("Request body must be a JSON object"));
        }
        serde_json::from_value::<ChatRequest>(body)
            .map_err(|e| RelayError::validation(format!("Invalid request body: {}", e)))?
            .validate()
    }
}

/// Outcome of one relayed chat turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub raw: Value,
}

/// Forwards chat turns to the workflow engine.
pub struct ChatRelay {
    anonymous_url: String,
    authenticated_url: String,
}

impl ChatRelay {
    pub fn new(anonymous_url: impl Into<String>, authenticated_url: impl Into<String>) -> Self {
        Self {
            anonymous_url: anonymous_url.into(),
            authenticated_url: authenticated_url.into(),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.chat_upstream(false), config.chat_upstream(true))
    }

    /// Upstream used for a caller with or without a bearer token.
    pub fn endpoint(&self, bearer: Option<&str>) -> &str {
        match bearer {
            Some(token) if !token.is_empty() => &self.authenticated_url,
            _ => &self.anonymous_url,
        }
    }

    /// Send one turn upstream and unwrap the reply. Single attempt.
    pub async fn send(&self, chat: &ValidChat, bearer: Option<&str>) -> Result<ChatReply, RelayError> {
        let url = self.endpoint(bearer);
        info!(
            "Chat relay: session={}, chatbot={}, attachments={}, authenticated={}",
            chat.session_id,
            chat.chatbot_id,
            chat.attachments.len(),
            bearer.is_some()
        );

        let payload = json!({
            "message": chat.message,
            "chatInput": chat.message,
            "chatbotId": chat.chatbot_id,
            "sessionId": chat.session_id,
            "attachments": chat.attachments,
            "hasGoogleAuth": chat.google_access_token.is_some(),
        });

        let mut request = http::client().post(url).json(&payload);
        if let Some(token) = bearer.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }
        if let Some(token) = &chat.google_access_token {
            request = request.header(GOOGLE_TOKEN_HEADER, token);
        }

        let resp = request.send().await.map_err(UpstreamError::from)?;
        let status = resp.status();
        if !status.is_success() {
            let message = http::error_message(resp, "Chat service request failed").await;
            warn!("Chat upstream returned {}: {}", status, message);
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let body = resp.text().await.map_err(UpstreamError::from)?;
        let raw = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));
        let text = normalize::extract_reply(&raw);
        debug!("Chat reply for {}: {} chars", chat.session_id, text.len());
        Ok(ChatReply { text, raw })
    }
}
