use serde_json::Value;
use tracing::debug;

use crate::error::{RelayError, UpstreamError};
use crate::relay::BackendClient;
use crate::types::ChatbotProfile;

/// Fetch a chatbot's public profile and fill unset fields with defaults.
pub async fn fetch_profile(
    backend: &BackendClient,
    chatbot_id: &str,
) -> Result<ChatbotProfile, RelayError> {
    let path = format!("/api/chatbots/{}/public", urlencoding::encode(chatbot_id));
    let body = backend.get_json(&path, None).await?;
    let profile = profile_from(&body, chatbot_id)
        .ok_or_else(|| UpstreamError::Parse("unrecognized chatbot profile".into()))?;
    debug!("Loaded profile for chatbot {}", chatbot_id);
    Ok(profile)
}

fn profile_from(body: &Value, chatbot_id: &str) -> Option<ChatbotProfile> {
    let record = ["chatbot", "profile", "data"]
        .iter()
        .find_map(|key| body.get(*key).filter(|v| v.is_object()))
        .unwrap_or(body);
    if !record.is_object() {
        return None;
    }
    let profile: ChatbotProfile = serde_json::from_value(record.clone()).ok()?;
    Some(with_defaults(profile, chatbot_id))
}

/// Replace empty or zero fields with the widget defaults.
pub fn with_defaults(mut profile: ChatbotProfile, chatbot_id: &str) -> ChatbotProfile {
    let defaults = ChatbotProfile::default();
    if profile.chatbot_id.is_empty() {
        profile.chatbot_id = chatbot_id.to_string();
    }
    for (field, default) in [
        (&mut profile.name, defaults.name),
        (&mut profile.title, defaults.title),
        (&mut profile.accent_color, defaults.accent_color),
        (&mut profile.greeting_message, defaults.greeting_message),
    ] {
        if field.trim().is_empty() {
            *field = default;
        }
    }
    if profile.width == 0 {
        profile.width = defaults.width;
    }
    if profile.height == 0 {
        profile.height = defaults.height;
    }
    profile
}
