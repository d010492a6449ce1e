use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

use chatrelay_core::config::{self, Config};
use chatrelay_core::relay::{
    await_first_signal, poll_until, CompletionSignal, RelayTokenClient, TokenCache,
};
use chatrelay_core::session::id::{get_session_id, reset_session_id, FileStorage};
use chatrelay_core::util::join_url;

const CONNECT_POLL_EVERY: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(
    name = "chatrelay",
    about = "chatrelay - chatbot relay service and terminal client",
    version = chatrelay_core::VERSION,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay HTTP server
    Serve {
        /// Listen port (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Chat with a chatbot through a running relay
    Chat {
        /// Message to send (or omit for interactive mode)
        message: Vec<String>,
        /// Relay base URL
        #[arg(long)]
        api: Option<String>,
        /// Chatbot ID
        #[arg(long)]
        chatbot: Option<String>,
        /// Bearer token for the authenticated chat endpoint
        #[arg(long, env = "CHATRELAY_TOKEN")]
        token: Option<String>,
    },
    /// Show or reset the stored session for a chatbot
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Connect Google to the current chat session
    Connect {
        /// Relay base URL
        #[arg(long)]
        api: Option<String>,
        /// Chatbot ID
        #[arg(long)]
        chatbot: Option<String>,
    },
    /// Write a default configuration file
    Onboard,
    /// Show chatrelay status
    Status,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Print the session id (creating one if needed)
    Show {
        #[arg(long)]
        chatbot: Option<String>,
    },
    /// Forget the session id so the next chat starts fresh
    Reset {
        #[arg(long)]
        chatbot: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chatrelay=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => cmd_serve(port).await?,
        Commands::Chat {
            message,
            api,
            chatbot,
            token,
        } => cmd_chat(message, api, chatbot, token).await?,
        Commands::Session { command } => match command {
            SessionCommands::Show { chatbot } => cmd_session_show(chatbot)?,
            SessionCommands::Reset { chatbot } => cmd_session_reset(chatbot)?,
        },
        Commands::Connect { api, chatbot } => cmd_connect(api, chatbot).await?,
        Commands::Onboard => cmd_onboard()?,
        Commands::Status => cmd_status()?,
    }

    Ok(())
}

// ====== Commands ======

#[cfg(feature = "http-api")]
async fn cmd_serve(port: Option<u16>) -> Result<()> {
    use std::sync::Arc;

    use chatrelay_core::service::http::{serve, AppState};

    let mut cfg = config::load_config_from_env();
    if let Some(port) = port {
        cfg.gateway.port = port;
    }
    if !cfg.google.is_configured() {
        tracing::warn!("Google OAuth is not configured; OAuth endpoints will return errors");
    }
    let addr = cfg.gateway.addr();
    let state = Arc::new(AppState::from_config(cfg));
    serve(&addr, state).await
}

#[cfg(not(feature = "http-api"))]
async fn cmd_serve(_port: Option<u16>) -> Result<()> {
    bail!("this build has no HTTP server; rebuild with the `http-api` feature")
}

/// Relay URL and chatbot id from flags, falling back to the config file.
fn client_target(cfg: &Config, api: Option<String>, chatbot: Option<String>) -> Result<(String, String)> {
    let api = api.unwrap_or_else(|| cfg.client.api_url.clone());
    let chatbot = chatbot
        .or_else(|| Some(cfg.client.chatbot_id.clone()))
        .filter(|c| !c.trim().is_empty())
        .context("no chatbot id; pass --chatbot or set client.chatbotId in the config")?;
    Ok((api, chatbot))
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// One chat session against a relay, carrying Google tokens when connected.
struct ChatClient {
    client: reqwest::Client,
    api_url: String,
    chatbot_id: String,
    session_id: String,
    token: Option<String>,
    google: RelayTokenClient,
    cache: TokenCache,
}

impl ChatClient {
    async fn new(api_url: String, chatbot_id: String, session_id: String, token: Option<String>) -> Self {
        let google = RelayTokenClient::new(api_url.clone(), session_id.clone(), chatbot_id.clone());
        let cache = TokenCache::new();
        match google.load_into(&cache).await {
            Ok(true) => tracing::info!("Using Google tokens for session {}", session_id),
            Ok(false) => {}
            Err(e) => tracing::warn!("Could not load Google tokens: {}", e),
        }
        Self {
            client: reqwest::Client::new(),
            api_url,
            chatbot_id,
            session_id,
            token,
            google,
            cache,
        }
    }

    /// Send one turn, refreshing the Google access token first if needed.
    async fn send(&self, message: &str) -> Result<String> {
        let key = self.google.pairing_key();
        let google_tokens = self
            .cache
            .valid_access_token(key, &self.google)
            .await
            .and_then(|_| self.cache.tokens(key));
        chat_api(
            &self.client,
            &self.api_url,
            &json!({
                "message": message,
                "chatbotId": self.chatbot_id,
                "sessionId": self.session_id,
                "googleTokens": google_tokens,
            }),
            self.token.as_deref(),
        )
        .await
    }
}

async fn chat_api(
    client: &reqwest::Client,
    api_url: &str,
    body: &Value,
    token: Option<&str>,
) -> Result<String> {
    let mut req = client.post(join_url(api_url, "/api/chat")).json(body);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await?;
    let status = resp.status();
    let body: Value = resp.json().await?;
    if !status.is_success() {
        let error = body["error"].as_str().unwrap_or("Request failed");
        bail!("{} ({})", error, status);
    }
    Ok(body["response"].as_str().unwrap_or_default().to_string())
}

async fn cmd_chat(
    message: Vec<String>,
    api: Option<String>,
    chatbot: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let cfg = config::load_config(None);
    let (api_url, chatbot_id) = client_target(&cfg, api, chatbot)?;
    let storage = FileStorage::default_location();
    let session_id = get_session_id(&storage, &chatbot_id);
    let chat = ChatClient::new(api_url, chatbot_id.clone(), session_id.clone(), token).await;

    if !message.is_empty() {
        let msg = message.join(" ");
        let bar = spinner("Waiting for reply...");
        let result = chat.send(&msg).await;
        bar.finish_and_clear();
        match result {
            Ok(resp) => println!("{}", resp),
            Err(e) => eprintln!("Error: {}", e),
        }
        return Ok(());
    }

    println!("chatrelay {} (Ctrl+C to exit)", chatrelay_core::VERSION);
    println!("  Chatbot: {}", chatbot_id);
    println!("  Session: {}", session_id);
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        use std::io::Write;
        print!("You: ");
        std::io::stdout().flush()?;

        let Some(input) = lines.next_line().await? else {
            break;
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let bar = spinner("...");
        let result = chat.send(input).await;
        bar.finish_and_clear();
        match result {
            Ok(resp) => println!("\nBot: {}\n", resp),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

fn session_chatbot(chatbot: Option<String>) -> Result<String> {
    let cfg = config::load_config(None);
    client_target(&cfg, None, chatbot).map(|(_, chatbot)| chatbot)
}

fn cmd_session_show(chatbot: Option<String>) -> Result<()> {
    let chatbot_id = session_chatbot(chatbot)?;
    let storage = FileStorage::default_location();
    println!("{}", get_session_id(&storage, &chatbot_id));
    Ok(())
}

fn cmd_session_reset(chatbot: Option<String>) -> Result<()> {
    let chatbot_id = session_chatbot(chatbot)?;
    let storage = FileStorage::default_location();
    reset_session_id(&storage, &chatbot_id);
    println!("Session for {} reset. The next chat starts a new conversation.", chatbot_id);
    Ok(())
}

async fn cmd_connect(api: Option<String>, chatbot: Option<String>) -> Result<()> {
    let cfg = config::load_config(None);
    let (api_url, chatbot_id) = client_target(&cfg, api, chatbot)?;
    let storage = FileStorage::default_location();
    let session_id = get_session_id(&storage, &chatbot_id);
    let client = reqwest::Client::new();

    let resp = client
        .get(join_url(&api_url, "/api/google-oauth/authorize"))
        .query(&[
            ("sessionId", session_id.as_str()),
            ("chatbotId", chatbot_id.as_str()),
            ("format", "json"),
        ])
        .send()
        .await?;
    let status = resp.status();
    let body: Value = resp.json().await?;
    let Some(auth_url) = body["authUrl"].as_str().filter(|_| status.is_success()) else {
        let error = body["error"].as_str().unwrap_or("Failed to start authorization");
        bail!("{} ({})", error, status);
    };

    println!("Open this URL in your browser to connect Google:\n");
    println!("  {}\n", auth_url);
    println!("Waiting for authorization (press Enter once the browser says you're done)...");

    let google = RelayTokenClient::new(api_url.clone(), session_id.clone(), chatbot_id.clone());
    let relay = &google;
    let poll = poll_until(CONNECT_POLL_EVERY, move || async move {
        relay.fetch_tokens().await.ok().flatten()
    });
    let typed = async {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        lines.next_line().await
    };

    let signal = tokio::time::timeout(CONNECT_TIMEOUT, await_first_signal(poll, typed))
        .await
        .context("timed out waiting for Google authorization")?;

    let connected = match signal {
        CompletionSignal::Polled(_) => true,
        CompletionSignal::Message(_) => matches!(google.fetch_tokens().await, Ok(Some(_))),
    };

    if connected {
        println!("Google connected for session {}", session_id);
    } else {
        println!("No Google tokens found yet. Run `chatrelay connect` again to retry.");
    }
    Ok(())
}

fn cmd_onboard() -> Result<()> {
    let config_path = config::get_config_path();

    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        println!("Delete it first to re-onboard.");
        return Ok(());
    }

    let cfg = Config::default();
    config::save_config(&cfg, None)?;
    println!("Created config at {}", config_path.display());

    println!("\nNext steps:");
    println!("  1. Set backend.url and the workflow webhook URLs in {}", config_path.display());
    println!("     (or BACKEND_URL / N8N_WEBHOOK_URL in the environment)");
    println!("  2. Set google.clientId and google.clientSecret to enable Google connect");
    println!("  3. Start the relay: chatrelay serve");
    println!("  4. Chat: chatrelay chat --chatbot <id> \"Hello!\"");
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config_path = config::get_config_path();
    let cfg = config::load_config_from_env();

    println!("chatrelay {} Status\n", chatrelay_core::VERSION);

    println!(
        "Config: {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗" }
    );
    println!("Listen: {}", cfg.gateway.addr());
    println!("Backend: {}", cfg.backend.base_url());
    println!("Attachments: {}", cfg.backend.attachment_base_url());
    println!("Chat upstream: {}", cfg.chat_upstream(false));
    println!("Chat upstream (signed in): {}", cfg.chat_upstream(true));
    println!("File upload upstream: {}", cfg.file_upload_upstream());
    println!(
        "Google OAuth: {}",
        if cfg.google.is_configured() { "✓" } else { "not set" }
    );
    println!("Frontend origin: {}", cfg.frontend.origin);
    println!("Session store: {:?} (ttl {}s)", cfg.sessions.backend, cfg.sessions.ttl_secs);
    println!(
        "Client: {} chatbot={}",
        cfg.client.api_url,
        if cfg.client.chatbot_id.is_empty() { "-" } else { &cfg.client.chatbot_id }
    );
    Ok(())
}
