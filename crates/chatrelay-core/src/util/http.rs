use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Global HTTP client with connection pooling and keep-alive.
///
/// Relayed calls get a single attempt and no overall deadline; only the
/// connect phase is bounded.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(50)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(30))
        .user_agent(concat!("chatrelay/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
});

/// Get the global HTTP client.
pub fn client() -> &'static Client {
    &HTTP_CLIENT
}

/// Read an error body from a failed upstream response, preferring the
/// `error`/`message` field of a JSON body and falling back to `fallback`.
pub async fn error_message(resp: reqwest::Response, fallback: &str) -> String {
    let text = resp.text().await.unwrap_or_default();
    extract_error_message(&text).unwrap_or_else(|| fallback.to_string())
}

fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["error", "message", "errorMessage", "detail"] {
            if let Some(s) = value.get(key).and_then(|v| v.as_str()) {
                if !s.trim().is_empty() {
                    return Some(s.to_string());
                }
            }
        }
        return None;
    }
    Some(crate::util::truncate_string(trimmed, 500, "..."))
}
