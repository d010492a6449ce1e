//! Pass-through relays to the backend, the workflow engine and Google.

pub mod attachments;
pub mod backend;
pub mod chat;
pub mod handshake;
pub mod normalize;
pub mod oauth;

pub use attachments::{AttachmentRelay, UploadFile};
pub use backend::BackendClient;
pub use chat::{ChatRelay, ChatReply, ChatRequest, ValidChat};
pub use handshake::{await_first_signal, poll_until, CompletionSignal};
pub use normalize::{extract_reply, FALLBACK_REPLY};
pub use oauth::{
    ConnectionState, OAuthClient, OAuthFlow, OAuthState, RelayTokenClient, TokenCache,
    TokenRefresher,
};
