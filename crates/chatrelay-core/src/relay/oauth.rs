//! Google OAuth relay: consent URLs, code exchange, refresh, and the
//! client-side token cache that drives the connection state machine.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GoogleOAuthConfig;
use crate::error::{OAuthError, RelayError, UpstreamError};
use crate::types::GoogleTokens;
use crate::util::{http, join_url, now_millis};

/// Refresh this long before the provider's expiry.
const EXPIRY_SKEW_MS: i64 = 60_000;

/// Which pairing an authorization belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OAuthState {
    /// Dashboard owner connecting a chatbot.
    #[serde(rename_all = "camelCase")]
    Chatbot {
        chatbot_id: String,
        clerk_token: String,
    },
    /// Widget visitor connecting for one conversation.
    #[serde(rename_all = "camelCase")]
    Session {
        session_id: String,
        chatbot_id: String,
    },
}

impl OAuthState {
    pub fn session(session_id: impl Into<String>, chatbot_id: impl Into<String>) -> Self {
        OAuthState::Session {
            session_id: session_id.into(),
            chatbot_id: chatbot_id.into(),
        }
    }

    pub fn chatbot(chatbot_id: impl Into<String>, clerk_token: impl Into<String>) -> Self {
        OAuthState::Chatbot {
            chatbot_id: chatbot_id.into(),
            clerk_token: clerk_token.into(),
        }
    }

    pub fn chatbot_id(&self) -> &str {
        match self {
            OAuthState::Chatbot { chatbot_id, .. } | OAuthState::Session { chatbot_id, .. } => {
                chatbot_id
            }
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            OAuthState::Session { session_id, .. } => Some(session_id),
            OAuthState::Chatbot { .. } => None,
        }
    }

    pub fn flow(&self) -> OAuthFlow {
        match self {
            OAuthState::Session { .. } => OAuthFlow::Session,
            OAuthState::Chatbot { .. } => OAuthFlow::Chatbot,
        }
    }

    /// JSON form, URL-encoded, as carried in the `state` parameter.
    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        urlencoding::encode(&json).into_owned()
    }

    /// Parse a `state` value. Accepts the raw JSON or its URL-encoded form.
    pub fn parse(raw: &str) -> Result<Self, OAuthError> {
        let raw = raw.trim();
        let state = match serde_json::from_str::<OAuthState>(raw) {
            Ok(state) => state,
            Err(_) => {
                let decoded = urlencoding::decode(raw).map_err(|_| OAuthError::InvalidState)?;
                serde_json::from_str::<OAuthState>(&decoded).map_err(|_| OAuthError::InvalidState)?
            }
        };

        let complete = match &state {
            OAuthState::Session {
                session_id,
                chatbot_id,
            } => !session_id.is_empty() && !chatbot_id.is_empty(),
            OAuthState::Chatbot {
                chatbot_id,
                clerk_token,
            } => !chatbot_id.is_empty() && !clerk_token.is_empty(),
        };
        if complete {
            Ok(state)
        } else {
            Err(OAuthError::InvalidState)
        }
    }
}

/// The two authorization entry points and their fixed callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthFlow {
    Session,
    Chatbot,
}

impl OAuthFlow {
    pub fn callback_path(self) -> &'static str {
        match self {
            OAuthFlow::Session => "/api/google-oauth/callback",
            OAuthFlow::Chatbot => "/api/google-oauth/callback-chatbot",
        }
    }

    pub fn redirect_uri(self, frontend_origin: &str) -> String {
        join_url(frontend_origin, self.callback_path())
    }
}

/// Build the provider consent URL for a pairing.
pub fn build_authorize_url(
    config: &GoogleOAuthConfig,
    redirect_uri: &str,
    state: &OAuthState,
) -> Result<String, OAuthError> {
    if config.client_id.is_empty() {
        return Err(OAuthError::NotConfigured);
    }
    let scopes = config.scopes.join(" ");
    Ok(format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
        config.auth_endpoint,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes),
        state.encode(),
    ))
}

/// Scheme, host and port of a URL such as a Referer header.
fn origin_of(url: &str) -> Option<String> {
    let origin = reqwest::Url::parse(url).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

fn usable_origin(origin: Option<&str>) -> Option<&str> {
    origin
        .map(str::trim)
        .filter(|o| !o.is_empty() && *o != "null")
}

/// Public origin for building redirect targets: the request Origin, else the
/// Referer's origin, else the configured default.
pub fn resolve_frontend_origin(
    origin: Option<&str>,
    referer: Option<&str>,
    configured_default: &str,
) -> String {
    if let Some(origin) = usable_origin(origin) {
        return origin.trim_end_matches('/').to_string();
    }
    referer
        .and_then(origin_of)
        .unwrap_or_else(|| configured_default.trim_end_matches('/').to_string())
}

/// Value for `Access-Control-Allow-Origin`: the caller's Origin, else the
/// Referer's origin, else `*`.
pub fn cors_allow_origin(origin: Option<&str>, referer: Option<&str>) -> String {
    resolve_frontend_origin(origin, referer, "*")
}

/// Redirect target for a completed authorization.
pub fn success_redirect(frontend_origin: &str, state: &OAuthState) -> String {
    let mut url = format!(
        "{}?chatbotId={}",
        join_url(frontend_origin, "/oauth/success"),
        urlencoding::encode(state.chatbot_id())
    );
    if let Some(session_id) = state.session_id() {
        url.push_str(&format!("&sessionId={}", urlencoding::encode(session_id)));
    }
    url
}

/// Redirect target for a failed authorization.
pub fn error_redirect(frontend_origin: &str, message: &str) -> String {
    format!(
        "{}?message={}",
        join_url(frontend_origin, "/oauth/error"),
        urlencoding::encode(message)
    )
}

/// Readable text for a provider `error` code.
pub fn describe_provider_error(code: &str) -> String {
    match code {
        "access_denied" => "Access was denied. Google was not connected.".to_string(),
        "invalid_scope" => "The requested Google permissions are not available.".to_string(),
        other => format!("Google authorization failed: {}", other),
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// A fresh access token from the refresh grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at: i64,
    /// Only present when the provider rotated the refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Talks to the provider's token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    token_endpoint: String,
}

impl OAuthClient {
    pub fn from_config(config: &GoogleOAuthConfig) -> Result<Self, OAuthError> {
        if !config.is_configured() {
            return Err(OAuthError::NotConfigured);
        }
        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_endpoint: config.token_endpoint.clone(),
        })
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenEndpointResponse, String> {
        let resp = http::client()
            .post(&self.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            let message = http::error_message(resp, "token endpoint error").await;
            return Err(format!("{} ({})", message, status.as_u16()));
        }
        resp.json::<TokenEndpointResponse>()
            .await
            .map_err(|e| format!("invalid token response: {}", e))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<GoogleTokens, OAuthError> {
        let resp = self
            .post_form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .await
            .map_err(OAuthError::TokenExchange)?;

        info!("Exchanged authorization code for Google tokens");
        Ok(GoogleTokens::expiring_in(
            resp.access_token,
            resp.refresh_token.unwrap_or_default(),
            resp.expires_in.unwrap_or(3600),
        ))
    }

    /// Use a refresh token to obtain a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, OAuthError> {
        if refresh_token.is_empty() {
            return Err(OAuthError::Refresh("no refresh token".to_string()));
        }
        let resp = self
            .post_form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await
            .map_err(OAuthError::Refresh)?;

        debug!("Refreshed Google access token");
        Ok(RefreshedToken {
            access_token: resp.access_token,
            expires_at: now_millis() + resp.expires_in.unwrap_or(3600) * 1000,
            refresh_token: resp.refresh_token,
        })
    }
}

/// Anything that can turn a refresh token into a new access token: the
/// provider itself, or a relay endpoint in front of it.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, OAuthError>;
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, OAuthError> {
        OAuthClient::refresh(self, refresh_token).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayRefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_at: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Token access for one session pairing through a running relay's OAuth
/// endpoints. The client never sees the provider secret.
#[derive(Debug, Clone)]
pub struct RelayTokenClient {
    api_url: String,
    session_id: String,
    chatbot_id: String,
}

impl RelayTokenClient {
    pub fn new(
        api_url: impl Into<String>,
        session_id: impl Into<String>,
        chatbot_id: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            session_id: session_id.into(),
            chatbot_id: chatbot_id.into(),
        }
    }

    /// Key of this pairing in a [`TokenCache`].
    pub fn pairing_key(&self) -> &str {
        &self.session_id
    }

    /// Tokens the relay holds for this pairing, if Google is connected.
    pub async fn fetch_tokens(&self) -> Result<Option<GoogleTokens>, RelayError> {
        let resp = http::client()
            .get(join_url(&self.api_url, "/api/google-oauth/get-tokens"))
            .query(&[
                ("sessionId", self.session_id.as_str()),
                ("chatbotId", self.chatbot_id.as_str()),
            ])
            .send()
            .await
            .map_err(UpstreamError::from)?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = http::error_message(resp, "Failed to load Google tokens").await;
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }
        let body: serde_json::Value = resp.json().await.map_err(UpstreamError::from)?;
        Ok(body
            .get("tokens")
            .and_then(|t| serde_json::from_value::<GoogleTokens>(t.clone()).ok())
            .filter(|t| !t.access_token.is_empty()))
    }

    /// Fetch the relay's tokens into `cache`. Returns whether any were found.
    pub async fn load_into(&self, cache: &TokenCache) -> Result<bool, RelayError> {
        match self.fetch_tokens().await? {
            Some(tokens) => {
                cache.store(self.pairing_key(), tokens);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TokenRefresher for RelayTokenClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, OAuthError> {
        if refresh_token.is_empty() {
            return Err(OAuthError::Refresh("no refresh token".to_string()));
        }
        // The relay also writes the new access token back to the backend.
        let resp = http::client()
            .post(join_url(&self.api_url, "/api/google-oauth/refresh-token"))
            .json(&serde_json::json!({
                "refreshToken": refresh_token,
                "sessionId": self.session_id,
                "chatbotId": self.chatbot_id,
            }))
            .send()
            .await
            .map_err(|e| OAuthError::Refresh(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let message = http::error_message(resp, "refresh failed").await;
            return Err(OAuthError::Refresh(format!("{} ({})", message, status.as_u16())));
        }
        let body: RelayRefreshResponse = resp
            .json()
            .await
            .map_err(|e| OAuthError::Refresh(format!("invalid refresh response: {}", e)))?;
        debug!("Refreshed Google access token through the relay");
        Ok(RefreshedToken {
            access_token: body.access_token,
            expires_at: body.expires_at,
            refresh_token: body.refresh_token,
        })
    }
}

// ====== Connection state machine ======

/// Connection state for one pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unauthenticated,
    Authorizing,
    TokenExchange,
    Authenticated,
    Expired,
    Refreshing,
}

/// Inputs that move a pairing between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthEvent {
    Authorize,
    CodeReceived,
    TokensIssued,
    Expire,
    RefreshStarted,
    RefreshSucceeded,
    Failed,
    Disconnect,
}

impl ConnectionState {
    /// Apply an event. Events that do not apply in the current state leave
    /// it unchanged, except `Disconnect` and `Failed` which always reset.
    pub fn next(self, event: OAuthEvent) -> ConnectionState {
        use ConnectionState::*;
        use OAuthEvent::*;
        match (self, event) {
            (_, Disconnect) | (_, Failed) => Unauthenticated,
            (Unauthenticated, Authorize) => Authorizing,
            (Authorizing, CodeReceived) => TokenExchange,
            (TokenExchange, TokensIssued) => Authenticated,
            (Authenticated, Expire) => Expired,
            (Expired, RefreshStarted) => Refreshing,
            (Refreshing, RefreshSucceeded) => Authenticated,
            (state, _) => state,
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Authenticated)
    }
}

#[derive(Debug, Clone, Default)]
struct Pairing {
    state: ConnectionState,
    tokens: Option<GoogleTokens>,
}

/// Client-held Google tokens per pairing key (a session or chatbot id).
#[derive(Debug, Default)]
pub struct TokenCache {
    pairings: DashMap<String, Pairing>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, key: &str, event: OAuthEvent) -> ConnectionState {
        let mut pairing = self.pairings.entry(key.to_string()).or_default();
        pairing.state = pairing.state.next(event);
        pairing.state
    }

    pub fn state(&self, key: &str) -> ConnectionState {
        self.pairings
            .get(key)
            .map(|p| p.state)
            .unwrap_or_default()
    }

    pub fn tokens(&self, key: &str) -> Option<GoogleTokens> {
        self.pairings.get(key).and_then(|p| p.tokens.clone())
    }

    /// The consent popup was opened.
    pub fn begin_authorization(&self, key: &str) -> ConnectionState {
        self.apply(key, OAuthEvent::Authorize)
    }

    /// The callback reported back and the code is being exchanged.
    pub fn begin_exchange(&self, key: &str) -> ConnectionState {
        self.apply(key, OAuthEvent::CodeReceived)
    }

    /// Tokens arrived, from the exchange or from the backend store.
    pub fn store(&self, key: &str, tokens: GoogleTokens) {
        let mut pairing = self.pairings.entry(key.to_string()).or_default();
        pairing.tokens = Some(tokens);
        pairing.state = ConnectionState::Authenticated;
    }

    /// Authorization failed or was abandoned.
    pub fn fail(&self, key: &str) {
        self.disconnect(key);
    }

    /// Forget the pairing's tokens.
    pub fn disconnect(&self, key: &str) {
        if let Some(mut pairing) = self.pairings.get_mut(key) {
            pairing.tokens = None;
            pairing.state = pairing.state.next(OAuthEvent::Disconnect);
        }
    }

    /// Access token for a pairing, refreshing it first if it is about to
    /// expire. A failed refresh drops the tokens and yields `None`.
    pub async fn valid_access_token(
        &self,
        key: &str,
        refresher: &dyn TokenRefresher,
    ) -> Option<String> {
        let tokens = self.tokens(key)?;
        if !tokens.is_expired_at(now_millis() + EXPIRY_SKEW_MS) {
            return Some(tokens.access_token);
        }

        self.apply(key, OAuthEvent::Expire);
        self.apply(key, OAuthEvent::RefreshStarted);
        match refresher.refresh(&tokens.refresh_token).await {
            Ok(fresh) => {
                let updated = GoogleTokens {
                    access_token: fresh.access_token.clone(),
                    refresh_token: fresh.refresh_token.unwrap_or(tokens.refresh_token),
                    expires_at: fresh.expires_at,
                };
                if let Some(mut pairing) = self.pairings.get_mut(key) {
                    pairing.tokens = Some(updated);
                    pairing.state = pairing.state.next(OAuthEvent::RefreshSucceeded);
                }
                Some(fresh.access_token)
            }
            Err(e) => {
                warn!("Dropping Google tokens for {}: {}", key, e);
                self.disconnect(key);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_state_roundtrip_through_url_encoding() {
        let state = OAuthState::session("session_1_abc", "bot-1");
        let encoded = state.encode();
        assert!(!encoded.contains('{'));
        assert_eq!(OAuthState::parse(&encoded).unwrap(), state);

        // Frameworks hand over the already-decoded query value
        let decoded = urlencoding::decode(&encoded).unwrap();
        assert_eq!(OAuthState::parse(&decoded).unwrap(), state);
    }

    #[test]
    fn test_state_variants() {
        let chatbot = OAuthState::parse(r#"{"chatbotId":"b","clerkToken":"t"}"#).unwrap();
        assert_eq!(chatbot.flow(), OAuthFlow::Chatbot);
        assert_eq!(chatbot.session_id(), None);

        let session = OAuthState::parse(r#"{"sessionId":"s","chatbotId":"b"}"#).unwrap();
        assert_eq!(session.flow(), OAuthFlow::Session);
        assert_eq!(session.chatbot_id(), "b");
    }

    #[test]
    fn test_state_malformed() {
        assert!(OAuthState::parse("not-json").is_err());
        assert!(OAuthState::parse(r#"{"chatbotId":"b"}"#).is_err());
        assert!(OAuthState::parse(r#"{"sessionId":"","chatbotId":"b"}"#).is_err());
        assert!(OAuthState::parse("").is_err());
    }

    #[test]
    fn test_authorize_url() {
        let mut cfg = GoogleOAuthConfig::default();
        let state = OAuthState::session("s", "b");
        assert!(matches!(
            build_authorize_url(&cfg, "http://localhost:3000/cb", &state),
            Err(OAuthError::NotConfigured)
        ));

        cfg.client_id = "cid".to_string();
        let redirect = OAuthFlow::Session.redirect_uri("http://localhost:3000/");
        assert_eq!(redirect, "http://localhost:3000/api/google-oauth/callback");
        let url = build_authorize_url(&cfg, &redirect, &state).unwrap();
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains(&format!("state={}", state.encode())));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fapi%2Fgoogle-oauth%2Fcallback"));
    }

    #[test]
    fn test_resolve_frontend_origin_precedence() {
        assert_eq!(
            resolve_frontend_origin(Some("https://a.example"), Some("https://b.example/x"), "https://c"),
            "https://a.example"
        );
        assert_eq!(
            resolve_frontend_origin(None, Some("https://b.example:8443/page?q=1"), "https://c"),
            "https://b.example:8443"
        );
        assert_eq!(
            resolve_frontend_origin(Some("null"), Some("not a url"), "https://c/"),
            "https://c"
        );
        assert_eq!(resolve_frontend_origin(None, None, "https://c"), "https://c");
    }

    #[test]
    fn test_cors_allow_origin() {
        assert_eq!(cors_allow_origin(Some("https://site"), None), "https://site");
        assert_eq!(cors_allow_origin(None, Some("https://ref/x")), "https://ref");
        assert_eq!(cors_allow_origin(None, None), "*");
    }

    #[test]
    fn test_redirect_targets() {
        let state = OAuthState::session("s 1", "b");
        assert_eq!(
            success_redirect("http://app", &state),
            "http://app/oauth/success?chatbotId=b&sessionId=s%201"
        );
        let url = error_redirect("http://app", &describe_provider_error("access_denied"));
        assert!(url.starts_with("http://app/oauth/error?message=Access%20was%20denied"));
    }

    #[test]
    fn test_state_machine() {
        use ConnectionState::*;
        use OAuthEvent::*;
        let s = Unauthenticated
            .next(Authorize)
            .next(CodeReceived)
            .next(TokensIssued);
        assert_eq!(s, Authenticated);
        assert_eq!(s.next(Expire).next(RefreshStarted).next(RefreshSucceeded), Authenticated);
        assert_eq!(s.next(Expire).next(RefreshStarted).next(Failed), Unauthenticated);
        assert_eq!(Authorizing.next(Disconnect), Unauthenticated);
        // Out-of-order events are ignored
        assert_eq!(Unauthenticated.next(TokensIssued), Unauthenticated);
    }

    struct CountingRefresher {
        calls: AtomicUsize,
        succeed: bool,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, OAuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(RefreshedToken {
                    access_token: "fresh".to_string(),
                    expires_at: now_millis() + 3_600_000,
                    refresh_token: None,
                })
            } else {
                Err(OAuthError::Refresh("invalid_grant".to_string()))
            }
        }
    }

    fn expired_tokens() -> GoogleTokens {
        GoogleTokens {
            access_token: "stale".to_string(),
            refresh_token: "r1".to_string(),
            expires_at: now_millis() - 1,
        }
    }

    #[tokio::test]
    async fn test_cache_returns_live_token_without_refresh() {
        let cache = TokenCache::new();
        let refresher = CountingRefresher { calls: AtomicUsize::new(0), succeed: true };
        cache.store("s1", GoogleTokens::expiring_in("live".into(), "r".into(), 3600));

        assert_eq!(cache.valid_access_token("s1", &refresher).await.as_deref(), Some("live"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert!(cache.valid_access_token("other", &refresher).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_refreshes_expired_token() {
        let cache = TokenCache::new();
        let refresher = CountingRefresher { calls: AtomicUsize::new(0), succeed: true };
        cache.store("s1", expired_tokens());

        assert_eq!(cache.valid_access_token("s1", &refresher).await.as_deref(), Some("fresh"));
        assert_eq!(cache.state("s1"), ConnectionState::Authenticated);
        let tokens = cache.tokens("s1").unwrap();
        assert_eq!(tokens.access_token, "fresh");
        assert_eq!(tokens.refresh_token, "r1");
    }

    #[tokio::test]
    async fn test_cache_drops_tokens_when_refresh_fails() {
        let cache = TokenCache::new();
        let refresher = CountingRefresher { calls: AtomicUsize::new(0), succeed: false };
        cache.store("s1", expired_tokens());

        assert!(cache.valid_access_token("s1", &refresher).await.is_none());
        assert_eq!(cache.state("s1"), ConnectionState::Unauthenticated);
        assert!(cache.tokens("s1").is_none());
    }

    #[test]
    fn test_cache_disconnect_from_any_state() {
        let cache = TokenCache::new();
        assert_eq!(cache.begin_authorization("k"), ConnectionState::Authorizing);
        cache.disconnect("k");
        assert_eq!(cache.state("k"), ConnectionState::Unauthenticated);

        cache.begin_authorization("k");
        assert_eq!(cache.begin_exchange("k"), ConnectionState::TokenExchange);
        cache.store("k", expired_tokens());
        assert!(cache.state("k").is_connected());
        cache.disconnect("k");
        assert!(cache.tokens("k").is_none());
    }
}
