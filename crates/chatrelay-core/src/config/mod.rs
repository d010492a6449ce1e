use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::util::join_url;

/// 100MB, per file.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;
/// 500MB, per upload batch.
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 500 * 1024 * 1024;

/// Root configuration for chatrelay.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub backend: BackendConfig,
    pub workflow: WorkflowConfig,
    pub google: GoogleOAuthConfig,
    pub frontend: FrontendConfig,
    pub sessions: SessionsConfig,
    pub attachments: AttachmentLimits,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl GatewayConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Origins of the backend services the relays forward to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendConfig {
    /// Server-side backend origin (`BACKEND_URL`).
    pub url: String,
    /// Browser-visible backend origin (`NEXT_PUBLIC_BACKEND_URL`).
    pub public_url: String,
    /// Attachment storage origin (`NEXT_PUBLIC_ATTACHMENT_API_URL`).
    pub attachment_api_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            public_url: "http://localhost:8000".to_string(),
            attachment_api_url: String::new(),
        }
    }
}

impl BackendConfig {
    /// Backend origin, preferring the server-side setting.
    pub fn base_url(&self) -> &str {
        let url = if self.url.trim().is_empty() {
            &self.public_url
        } else {
            &self.url
        };
        url.trim_end_matches('/')
    }

    /// Attachment service origin, defaulting to the backend origin.
    pub fn attachment_base_url(&self) -> &str {
        if self.attachment_api_url.trim().is_empty() {
            self.base_url()
        } else {
            self.attachment_api_url.trim_end_matches('/')
        }
    }
}

/// Workflow-engine webhooks. Empty values fall back to backend routes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowConfig {
    /// Anonymous chat webhook (`N8N_WEBHOOK_URL`).
    pub webhook_url: String,
    /// Chat webhook used when the caller presents a bearer token
    /// (`N8N_AUTH_WEBHOOK_URL`).
    pub auth_webhook_url: String,
    /// File ingestion webhook (`N8N_FILE_WEBHOOK_URL`).
    pub file_webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub scopes: Vec<String>,
}

impl Default for GoogleOAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            scopes: vec![
                "https://www.googleapis.com/auth/calendar".to_string(),
                "https://www.googleapis.com/auth/gmail.modify".to_string(),
                "https://www.googleapis.com/auth/drive.file".to_string(),
                "https://www.googleapis.com/auth/userinfo.email".to_string(),
            ],
        }
    }
}

impl GoogleOAuthConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrontendConfig {
    /// Default public origin used to build OAuth redirect URIs.
    pub origin: String,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Memory,
    File,
}

/// Conversation store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionsConfig {
    pub backend: SessionBackend,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Directory for the file backend; empty means `<data dir>/sessions`.
    pub dir: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Memory,
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 300,
            dir: String::new(),
        }
    }
}

impl SessionsConfig {
    pub fn sessions_dir(&self) -> PathBuf {
        if self.dir.trim().is_empty() {
            get_data_dir().join("sessions")
        } else {
            PathBuf::from(&self.dir)
        }
    }
}

/// Upload checks applied before any attachment reaches the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachmentLimits {
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
    pub allowed_mime_types: Vec<String>,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            allowed_mime_types: [
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "application/vnd.ms-powerpoint",
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                "application/json",
                "text/plain",
                "text/csv",
                "text/markdown",
                "image/png",
                "image/jpeg",
                "image/gif",
                "image/webp",
                "audio/mpeg",
                "audio/wav",
                "video/mp4",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Settings used by the terminal client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub api_url: String,
    pub chatbot_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            chatbot_id: String::new(),
        }
    }
}

impl Config {
    /// Chat upstream for a request; callers with a bearer token go to the
    /// authenticated endpoint.
    pub fn chat_upstream(&self, authenticated: bool) -> String {
        let configured = if authenticated {
            &self.workflow.auth_webhook_url
        } else {
            &self.workflow.webhook_url
        };
        if !configured.trim().is_empty() {
            return configured.clone();
        }
        let path = if authenticated {
            "/api/chat"
        } else {
            "/api/chat/anonymous"
        };
        join_url(self.backend.base_url(), path)
    }

    /// Workflow webhook receiving file uploads for vector attachments.
    pub fn file_upload_upstream(&self) -> String {
        if !self.workflow.file_webhook_url.trim().is_empty() {
            return self.workflow.file_webhook_url.clone();
        }
        join_url(self.backend.base_url(), "/api/n8n/file-upload")
    }
}

// ====== Config loading/saving ======

fn set_from_env(target: &mut String, name: &str) {
    if let Ok(v) = std::env::var(name) {
        if !v.trim().is_empty() {
            *target = v;
        }
    }
}

/// Load configuration from environment variables.
///
/// Priority:
/// 1. `CHATRELAY_CONFIG` env var: full JSON config
/// 2. Individual env vars (merged on top of the file config)
/// 3. File fallback (`~/.chatrelay/config.json`)
pub fn load_config_from_env() -> Config {
    if let Ok(json) = std::env::var("CHATRELAY_CONFIG") {
        match serde_json::from_str::<Config>(&json) {
            Ok(config) => return config,
            Err(e) => {
                tracing::warn!("Failed to parse CHATRELAY_CONFIG: {}", e);
            }
        }
    }

    let mut cfg = load_config(None);

    set_from_env(&mut cfg.backend.url, "BACKEND_URL");
    set_from_env(&mut cfg.backend.public_url, "NEXT_PUBLIC_BACKEND_URL");
    set_from_env(&mut cfg.backend.attachment_api_url, "NEXT_PUBLIC_ATTACHMENT_API_URL");

    set_from_env(&mut cfg.workflow.webhook_url, "N8N_WEBHOOK_URL");
    set_from_env(&mut cfg.workflow.auth_webhook_url, "N8N_AUTH_WEBHOOK_URL");
    set_from_env(&mut cfg.workflow.file_webhook_url, "N8N_FILE_WEBHOOK_URL");

    set_from_env(&mut cfg.google.client_id, "GOOGLE_CLIENT_ID");
    set_from_env(&mut cfg.google.client_secret, "GOOGLE_CLIENT_SECRET");

    set_from_env(&mut cfg.frontend.origin, "NEXT_PUBLIC_FRONTEND_URL");
    set_from_env(&mut cfg.frontend.origin, "FRONTEND_URL");

    if let Some(port) = std::env::var("PORT").ok().and_then(|v| v.parse::<u16>().ok()) {
        cfg.gateway.port = port;
    }

    if let Ok(v) = std::env::var("CHATRELAY_SESSION_TTL_SECS") {
        match v.parse::<u64>() {
            Ok(ttl) => cfg.sessions.ttl_secs = ttl,
            Err(_) => tracing::warn!("Ignoring invalid CHATRELAY_SESSION_TTL_SECS={}", v),
        }
    }

    cfg
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatrelay")
        .join("config.json")
}

/// Get the chatrelay data directory.
pub fn get_data_dir() -> PathBuf {
    let path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatrelay");
    std::fs::create_dir_all(&path).ok();
    path
}

/// Load configuration from file or create default.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config from {}: {}", path.display(), e);
                    tracing::warn!("Using default configuration.");
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config from {}: {}", path.display(), e);
                tracing::warn!("Using default configuration.");
            }
        }
    }

    Config::default()
}

/// Save configuration to file.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> std::result::Result<(), ConfigError> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(())
}
