use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{self, header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{OAuthError, RelayError};
use crate::relay::attachments::{upload_vector_file, validate_uploads, UploadFile};
use crate::relay::chat::GOOGLE_TOKEN_HEADER;
use crate::relay::oauth::{
    build_authorize_url, cors_allow_origin, describe_provider_error, error_redirect,
    success_redirect,
};
use crate::relay::{
    AttachmentRelay, BackendClient, ChatRelay, ChatRequest, OAuthClient, OAuthFlow, OAuthState,
};
use crate::session::store::{check_session_key, spawn_sweeper};
use crate::session::{open_store, ConversationStore};
use crate::types::{GoogleTokens, Message, Role};
use crate::util::timestamp;
use crate::widget::{assets, fetch_profile, render_reply};

/// Room for multipart framing on top of the attachment payload limit.
const UPLOAD_OVERHEAD_BYTES: u64 = 16 * 1024 * 1024;

/// Shared application state for the HTTP API.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ConversationStore>,
    pub chat: ChatRelay,
    pub attachments: AttachmentRelay,
    pub backend: BackendClient,
    /// `None` when Google credentials are not configured.
    pub oauth: Option<OAuthClient>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn ConversationStore>) -> Self {
        let chat = ChatRelay::from_config(&config);
        let attachments = AttachmentRelay::new(config.backend.attachment_base_url());
        let backend = BackendClient::new(config.backend.base_url());
        let oauth = OAuthClient::from_config(&config.google).ok();
        if oauth.is_none() {
            warn!("GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET not set; Google connect is disabled");
        }
        Self {
            config,
            store,
            chat,
            attachments,
            backend,
            oauth,
        }
    }

    /// Build state with the conversation store named in the config.
    pub fn from_config(config: Config) -> Self {
        let store = open_store(&config.sessions);
        Self::new(config, store)
    }

    fn oauth_client(&self) -> Result<&OAuthClient, OAuthError> {
        self.oauth.as_ref().ok_or(OAuthError::NotConfigured)
    }
}

// ====== Error mapping ======

/// Error wrapper that renders as `{success: false, error, timestamp}`.
pub struct ApiError(RelayError);

impl<E: Into<RelayError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed ({}): {}", status.as_u16(), self.0);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self.0);
        }
        failure(status, &self.0.public_message())
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn failure(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": message,
            "timestamp": timestamp(),
        })),
    )
        .into_response()
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn required(value: Option<String>, name: &str) -> Result<String, RelayError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RelayError::validation(format!("{} is required", name)))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Bearer token from the `Authorization` header, if any.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    header_str(headers, &header::AUTHORIZATION)
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn parse_json_body(body: &Bytes) -> Result<Value, RelayError> {
    serde_json::from_slice(body).map_err(|_| RelayError::validation("Request body must be valid JSON"))
}

// ====== Router ======

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_hash: String,
}

/// Create the axum Router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state
        .config
        .attachments
        .max_total_bytes
        .saturating_add(UPLOAD_OVERHEAD_BYTES)
        .min(usize::MAX as u64) as usize;

    // OAuth endpoints echo the caller's origin instead of using the shared CORS policy
    let oauth: Router<Arc<AppState>> = Router::new()
        .route("/api/google-oauth/authorize", get(handle_oauth_authorize))
        .route("/api/google-oauth/authorize-chatbot", get(handle_oauth_authorize_chatbot))
        .route("/api/google-oauth/callback", get(handle_oauth_callback))
        .route("/api/google-oauth/callback-chatbot", get(handle_oauth_callback_chatbot))
        .route("/api/google-oauth/refresh-token", post(handle_oauth_refresh))
        .route("/api/google-oauth/get-tokens", get(handle_oauth_get_tokens))
        .layer(middleware::from_fn(oauth_cors));

    let api: Router<Arc<AppState>> = Router::new()
        // Chat
        .route("/api/chat", post(handle_chat))
        .route(
            "/api/chat/history/{session_id}",
            get(handle_get_history).delete(handle_delete_history),
        )
        // Attachments
        .route("/api/attachments/upload", post(handle_attachment_upload))
        .route("/api/attachments/list/{chatbot_id}", get(handle_attachment_list))
        .route(
            "/api/attachments/{file_id}",
            get(handle_attachment_metadata).delete(handle_attachment_delete),
        )
        .route("/api/attachments/{file_id}/download", get(handle_attachment_download))
        .route("/api/n8n/file-upload", post(handle_workflow_file_upload))
        // Chatbots
        .route("/api/chatbots", get(handle_list_chatbots))
        .route("/api/chatbots/{chatbot_id}/profile", get(handle_chatbot_profile))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::DELETE,
                    http::Method::OPTIONS,
                ])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::AUTHORIZATION,
                    HeaderName::from_static("x-google-access-token"),
                ]),
        );

    Router::new()
        // Pages and assets
        .route("/widget.js", get(handle_widget_js))
        .route("/dashboard", get(handle_dashboard))
        .route("/oauth/success", get(handle_oauth_success_page))
        .route("/oauth/error", get(handle_oauth_error_page))
        // Health
        .route("/health", get(handle_health))
        .merge(api)
        .merge(oauth)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_limit))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the OAuth endpoints: echo the Origin (else the Referer's
/// origin, else `*`) and answer preflight requests directly.
async fn oauth_cors(request: Request, next: Next) -> Response {
    let allow_origin = {
        let headers = request.headers();
        cors_allow_origin(
            header_str(headers, &header::ORIGIN),
            header_str(headers, &header::REFERER),
        )
    };

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    let origin_value =
        HeaderValue::from_str(&allow_origin).unwrap_or_else(|_| HeaderValue::from_static("*"));
    let echoed = origin_value != "*";
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin_value);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    if echoed {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
    response
}

// ====== Chat ======

/// POST /api/chat — Relay one chat turn to the workflow engine
async fn handle_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let mut chat = ChatRequest::from_value(parse_json_body(&body)?)?;
    if chat.google_access_token.is_none() {
        chat.google_access_token = headers
            .get(GOOGLE_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|t| !t.is_empty())
            .map(str::to_string);
    }
    let bearer = bearer_token(&headers);

    let reply = state.chat.send(&chat, bearer.as_deref()).await?;
    let html = render_reply(&reply.text);

    let turn = [
        Message::user(chat.message.clone()).in_session(&chat.session_id, &chat.chatbot_id),
        Message::assistant(reply.text.clone()).in_session(&chat.session_id, &chat.chatbot_id),
    ];
    if let Err(e) = state
        .store
        .append(&chat.session_id, &chat.chatbot_id, &turn)
        .await
    {
        warn!("Failed to record turn for session {}: {}", chat.session_id, e);
    }

    Ok(Json(json!({
        "success": true,
        "response": reply.text,
        "html": html,
        "sessionId": chat.session_id,
        "timestamp": timestamp(),
    })))
}

fn history_entry(msg: &Message) -> Value {
    let mut entry = serde_json::to_value(msg).unwrap_or(Value::Null);
    if msg.role == Role::Assistant {
        entry["html"] = Value::String(render_reply(&msg.content));
    }
    entry
}

/// GET /api/chat/history/{session_id} — Stored transcript for a session
async fn handle_get_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    check_session_key(&session_id).map_err(|_| RelayError::validation("sessionId is invalid"))?;
    let conversation = state.store.load(&session_id).await?;
    let messages: Vec<Value> = conversation
        .as_ref()
        .map(|c| c.messages.iter().map(history_entry).collect())
        .unwrap_or_default();

    Ok(Json(json!({
        "success": true,
        "sessionId": session_id,
        "chatbotId": conversation.as_ref().and_then(|c| c.chatbot_id.clone()),
        "messages": messages,
    })))
}

/// DELETE /api/chat/history/{session_id} — Forget a session's transcript
async fn handle_delete_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    check_session_key(&session_id).map_err(|_| RelayError::validation("sessionId is invalid"))?;
    let deleted = state.store.delete(&session_id).await?;
    info!("History delete for {}: existed={}", session_id, deleted);
    Ok(Json(json!({
        "success": true,
        "sessionId": session_id,
        "deleted": deleted,
    })))
}

// ====== Attachments ======

#[derive(Default)]
struct UploadForm {
    chatbot_id: Option<String>,
    session_id: Option<String>,
    files: Vec<UploadFile>,
}

async fn read_upload_form(multipart: &mut Multipart) -> Result<UploadForm, RelayError> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        RelayError::validation(format!("Invalid multipart body: {}", e))
    };
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        if let Some(file_name) = field.file_name().map(str::to_string) {
            let mime_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await.map_err(invalid)?;
            form.files.push(UploadFile {
                file_name,
                mime_type,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await.map_err(invalid)?;
            match name.as_str() {
                "chatbotId" => form.chatbot_id = Some(value),
                "sessionId" => form.session_id = Some(value),
                _ => {}
            }
        }
    }
    Ok(form)
}

/// POST /api/attachments/upload — Validate and forward files to storage
async fn handle_attachment_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let form = read_upload_form(&mut multipart).await?;
    let chatbot_id = required(form.chatbot_id, "chatbotId")?;
    validate_uploads(&form.files, &state.config.attachments)?;

    let bearer = bearer_token(&headers);
    let body = state
        .attachments
        .upload(
            &chatbot_id,
            form.session_id.as_deref(),
            form.files,
            bearer.as_deref(),
        )
        .await?;
    Ok(Json(body))
}

/// GET /api/attachments/list/{chatbot_id}
async fn handle_attachment_list(
    State(state): State<Arc<AppState>>,
    Path(chatbot_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let attachments = state.attachments.list(&chatbot_id).await?;
    Ok(Json(json!({
        "success": true,
        "attachments": attachments,
    })))
}

/// GET /api/attachments/{file_id}
async fn handle_attachment_metadata(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let attachment = state.attachments.metadata(&file_id).await?;
    Ok(Json(json!({
        "success": true,
        "attachment": attachment,
    })))
}

/// DELETE /api/attachments/{file_id}
async fn handle_attachment_delete(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.attachments.delete(&file_id).await?;
    Ok(Json(json!({
        "success": true,
        "fileId": file_id,
    })))
}

/// GET /api/attachments/{file_id}/download — Stream the stored file through
async fn handle_attachment_download(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> ApiResult<Response> {
    let upstream = state.attachments.download(&file_id).await?;

    let mut builder = Response::builder().status(StatusCode::OK);
    for name in [
        header::CONTENT_TYPE,
        header::CONTENT_DISPOSITION,
        header::CONTENT_LENGTH,
    ] {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| RelayError::Other(e.to_string()).into())
}

/// POST /api/n8n/file-upload — Send one file to the workflow engine's vector store
async fn handle_workflow_file_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let form = read_upload_form(&mut multipart).await?;
    let chatbot_id = required(form.chatbot_id, "chatbotId")?;
    let session_id = required(form.session_id, "sessionId")?;
    let mut files = form.files;
    if files.len() != 1 {
        return Err(RelayError::validation("Exactly one file is required").into());
    }
    validate_uploads(&files, &state.config.attachments)?;

    let file = files.remove(0);
    let file_name = file.file_name.clone();
    let mime_type = file.mime_type.clone();
    let vector_id = upload_vector_file(
        &state.config.file_upload_upstream(),
        &chatbot_id,
        &session_id,
        file,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "vectorId": vector_id,
        "fileName": file_name,
        "mimeType": mime_type,
        "timestamp": timestamp(),
    })))
}

// ====== Google OAuth ======

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeQuery {
    session_id: Option<String>,
    chatbot_id: Option<String>,
    token: Option<String>,
    format: Option<String>,
}

fn authorize_response(
    state: &AppState,
    pairing: &OAuthState,
    format: Option<&str>,
) -> ApiResult<Response> {
    let redirect_uri = pairing.flow().redirect_uri(&state.config.frontend.origin);
    let auth_url = build_authorize_url(&state.config.google, &redirect_uri, pairing)?;
    info!("Starting Google authorization for chatbot {}", pairing.chatbot_id());
    if format == Some("json") {
        Ok(Json(json!({ "success": true, "authUrl": auth_url })).into_response())
    } else {
        Ok(found(&auth_url))
    }
}

/// GET /api/google-oauth/authorize — Consent URL for a widget session
async fn handle_oauth_authorize(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AuthorizeQuery>,
) -> ApiResult<Response> {
    let session_id = required(q.session_id, "sessionId")?;
    let chatbot_id = required(q.chatbot_id, "chatbotId")?;
    authorize_response(
        &state,
        &OAuthState::session(session_id, chatbot_id),
        q.format.as_deref(),
    )
}

/// GET /api/google-oauth/authorize-chatbot — Consent URL for a chatbot owner
async fn handle_oauth_authorize_chatbot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<AuthorizeQuery>,
) -> ApiResult<Response> {
    let chatbot_id = required(q.chatbot_id, "chatbotId")?;
    let token = bearer_token(&headers)
        .or(q.token.filter(|t| !t.trim().is_empty()))
        .ok_or_else(RelayError::unauthorized)?;
    authorize_response(
        &state,
        &OAuthState::chatbot(chatbot_id, token),
        q.format.as_deref(),
    )
}

#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn finish_authorization(
    state: &AppState,
    q: CallbackQuery,
    flow: OAuthFlow,
) -> Result<OAuthState, RelayError> {
    if let Some(code) = q.error.filter(|e| !e.is_empty()) {
        return Err(OAuthError::Denied(describe_provider_error(&code)).into());
    }
    let pairing = OAuthState::parse(q.state.as_deref().unwrap_or_default())?;
    if pairing.flow() != flow {
        return Err(OAuthError::InvalidState.into());
    }
    let code = q
        .code
        .filter(|c| !c.is_empty())
        .ok_or(OAuthError::MissingCode)?;

    let client = state.oauth_client()?;
    let tokens = client
        .exchange_code(&code, &flow.redirect_uri(&state.config.frontend.origin))
        .await?;

    match &pairing {
        OAuthState::Session {
            session_id,
            chatbot_id,
        } => {
            state
                .backend
                .store_session_tokens(session_id, chatbot_id, &tokens)
                .await?
        }
        OAuthState::Chatbot {
            chatbot_id,
            clerk_token,
        } => {
            state
                .backend
                .store_chatbot_tokens(chatbot_id, clerk_token, &tokens)
                .await?
        }
    }
    Ok(pairing)
}

async fn complete_authorization(state: &AppState, q: CallbackQuery, flow: OAuthFlow) -> Response {
    let origin = &state.config.frontend.origin;
    match finish_authorization(state, q, flow).await {
        Ok(pairing) => {
            info!("Google connected for chatbot {}", pairing.chatbot_id());
            found(&success_redirect(origin, &pairing))
        }
        Err(e) => {
            warn!("Google authorization failed: {}", e);
            found(&error_redirect(origin, &e.public_message()))
        }
    }
}

/// GET /api/google-oauth/callback
async fn handle_oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CallbackQuery>,
) -> Response {
    complete_authorization(&state, q, OAuthFlow::Session).await
}

/// GET /api/google-oauth/callback-chatbot
async fn handle_oauth_callback_chatbot(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CallbackQuery>,
) -> Response {
    complete_authorization(&state, q, OAuthFlow::Chatbot).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
    session_id: Option<String>,
    chatbot_id: Option<String>,
}

/// POST /api/google-oauth/refresh-token
async fn handle_oauth_refresh(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let req: RefreshRequest = serde_json::from_value(parse_json_body(&body)?)
        .map_err(|e| RelayError::validation(format!("Invalid request body: {}", e)))?;
    let refresh_token = required(req.refresh_token, "refreshToken")?;

    let fresh = state.oauth_client()?.refresh(&refresh_token).await?;

    let session_id = req.session_id.filter(|s| !s.is_empty());
    let chatbot_id = req.chatbot_id.filter(|s| !s.is_empty());
    if let (Some(session_id), Some(chatbot_id)) = (session_id, chatbot_id) {
        let tokens = GoogleTokens {
            access_token: fresh.access_token.clone(),
            refresh_token: fresh.refresh_token.clone().unwrap_or(refresh_token),
            expires_at: fresh.expires_at,
        };
        if let Err(e) = state
            .backend
            .store_session_tokens(&session_id, &chatbot_id, &tokens)
            .await
        {
            warn!("Could not update stored tokens for session {}: {}", session_id, e);
        }
    }

    Ok(Json(json!({
        "success": true,
        "accessToken": fresh.access_token,
        "expiresAt": fresh.expires_at,
        "timestamp": timestamp(),
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokensQuery {
    session_id: Option<String>,
    chatbot_id: Option<String>,
}

/// GET /api/google-oauth/get-tokens
async fn handle_oauth_get_tokens(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokensQuery>,
) -> ApiResult<Response> {
    let session_id = required(q.session_id, "sessionId")?;
    let chatbot_id = required(q.chatbot_id, "chatbotId")?;
    match state.backend.get_tokens(&session_id, &chatbot_id).await? {
        Some(tokens) => Ok(Json(json!({ "success": true, "tokens": tokens })).into_response()),
        None => Ok(failure(StatusCode::NOT_FOUND, "No tokens found")),
    }
}

// ====== Chatbots ======

/// GET /api/chatbots — The signed-in user's chatbots
async fn handle_list_chatbots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let bearer = bearer_token(&headers).ok_or_else(RelayError::unauthorized)?;
    let body = state.backend.list_chatbots(&bearer).await?;
    let chatbots = match body {
        Value::Array(_) => body,
        other => ["chatbots", "data"]
            .iter()
            .find_map(|key| other.get(*key).filter(|v| v.is_array()).cloned())
            .unwrap_or_else(|| Value::Array(Vec::new())),
    };
    Ok(Json(json!({ "success": true, "chatbots": chatbots })))
}

/// GET /api/chatbots/{chatbot_id}/profile — Public widget profile
async fn handle_chatbot_profile(
    State(state): State<Arc<AppState>>,
    Path(chatbot_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let profile = fetch_profile(&state.backend, &chatbot_id).await?;
    Ok(Json(json!({ "success": true, "profile": profile })))
}

// ====== Pages ======

/// GET /widget.js — Embeddable widget bundle
async fn handle_widget_js() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, assets::JS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "public, max-age=300"),
        ],
        assets::WIDGET_JS,
    )
}

/// GET /dashboard
async fn handle_dashboard() -> impl IntoResponse {
    Html(assets::DASHBOARD_HTML)
}

/// GET /oauth/success — Popup page that notifies the opener and closes
async fn handle_oauth_success_page() -> impl IntoResponse {
    Html(assets::OAUTH_SUCCESS_HTML)
}

/// GET /oauth/error
async fn handle_oauth_error_page() -> impl IntoResponse {
    Html(assets::OAUTH_ERROR_HTML)
}

/// GET /health — Health check
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        git_hash: env!("GIT_HASH").to_string(),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down HTTP server");
}

/// Start the HTTP server on the given address. Expired conversations are
/// swept in the background while it runs.
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let sweep_every = Duration::from_secs(state.config.sessions.sweep_interval_secs.max(1));
    let sweeper = spawn_sweeper(state.store.clone(), sweep_every);

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    result?;
    Ok(())
}
