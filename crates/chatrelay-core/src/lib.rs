//! Relay service behind the chatbot widget and dashboard: chat, Google
//! OAuth and attachment pass-through, conversation storage, and the
//! browser assets.

pub mod error;
pub mod types;
pub mod config;
pub mod session;
pub mod relay;
pub mod widget;
pub mod service;
pub mod util;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
