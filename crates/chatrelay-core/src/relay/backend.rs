use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{RelayError, UpstreamError};
use crate::types::GoogleTokens;
use crate::util::{http, join_url};

/// Client for the application backend that owns token records, chatbots and
/// profiles.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    async fn check(resp: reqwest::Response, fallback: &str) -> Result<Value, RelayError> {
        let status = resp.status();
        if !status.is_success() {
            let message = http::error_message(resp, fallback).await;
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }
        let text = resp.text().await.map_err(UpstreamError::from)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| UpstreamError::Parse(e.to_string()).into())
    }

    /// GET a JSON document, optionally as an authenticated user.
    pub async fn get_json(&self, path: &str, bearer: Option<&str>) -> Result<Value, RelayError> {
        let mut request = http::client().get(self.url(path));
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(UpstreamError::from)?;
        Self::check(resp, "Backend request failed").await
    }

    /// Store tokens for an anonymous (session, chatbot) pairing.
    pub async fn store_session_tokens(
        &self,
        session_id: &str,
        chatbot_id: &str,
        tokens: &GoogleTokens,
    ) -> Result<(), RelayError> {
        let body = json!({
            "sessionId": session_id,
            "chatbotId": chatbot_id,
            "accessToken": tokens.access_token,
            "refreshToken": tokens.refresh_token,
            "expiresAt": tokens.expires_at,
        });
        let resp = http::client()
            .post(self.url("/api/google-tokens"))
            .json(&body)
            .send()
            .await
            .map_err(UpstreamError::from)?;
        Self::check(resp, "Failed to store Google tokens").await?;
        debug!("Stored Google tokens for session {}", session_id);
        Ok(())
    }

    /// Store tokens on a chatbot on behalf of its signed-in owner.
    pub async fn store_chatbot_tokens(
        &self,
        chatbot_id: &str,
        bearer: &str,
        tokens: &GoogleTokens,
    ) -> Result<(), RelayError> {
        let body = json!({
            "accessToken": tokens.access_token,
            "refreshToken": tokens.refresh_token,
            "expiresAt": tokens.expires_at,
        });
        let resp = http::client()
            .post(self.url(&format!(
                "/api/chatbots/{}/google-tokens",
                urlencoding::encode(chatbot_id)
            )))
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .map_err(UpstreamError::from)?;
        Self::check(resp, "Failed to store Google tokens").await?;
        debug!("Stored Google tokens for chatbot {}", chatbot_id);
        Ok(())
    }

    /// Tokens the backend holds for a pairing, or `None` if there are none.
    pub async fn get_tokens(
        &self,
        session_id: &str,
        chatbot_id: &str,
    ) -> Result<Option<GoogleTokens>, RelayError> {
        let resp = http::client()
            .get(self.url("/api/google-tokens"))
            .query(&[("sessionId", session_id), ("chatbotId", chatbot_id)])
            .send()
            .await
            .map_err(UpstreamError::from)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::check(resp, "Failed to get Google tokens").await?;
        Ok(tokens_from(&body))
    }

    /// The signed-in user's chatbots, as the backend lists them.
    pub async fn list_chatbots(&self, bearer: &str) -> Result<Value, RelayError> {
        self.get_json("/api/chatbots", Some(bearer)).await
    }
}

/// Read tokens from either a bare record or one wrapped in `tokens`/`data`.
fn tokens_from(body: &Value) -> Option<GoogleTokens> {
    let record = ["tokens", "data"]
        .iter()
        .find_map(|key| body.get(*key).filter(|v| v.is_object()))
        .unwrap_or(body);
    match serde_json::from_value::<GoogleTokens>(record.clone()) {
        Ok(tokens) if !tokens.access_token.is_empty() => Some(tokens),
        Ok(_) => None,
        Err(e) => {
            if !record.is_null() {
                warn!("Backend token record did not parse: {}", e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_from_shapes() {
        let bare = json!({ "accessToken": "a", "refreshToken": "r", "expiresAt": 5 });
        assert_eq!(tokens_from(&bare).unwrap().access_token, "a");

        let wrapped = json!({ "success": true, "tokens": bare.clone() });
        assert_eq!(tokens_from(&wrapped).unwrap().refresh_token, "r");

        assert!(tokens_from(&json!({ "accessToken": "" })).is_none());
        assert!(tokens_from(&Value::Null).is_none());
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = BackendClient::new("http://backend:8000/");
        assert_eq!(client.base_url(), "http://backend:8000");
        assert_eq!(client.url("/api/chatbots"), "http://backend:8000/api/chatbots");
    }
}
