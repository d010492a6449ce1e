//! Chat widget support: reply rendering, bundled browser assets and chatbot
//! profiles.

pub mod assets;
pub mod profile;
pub mod sanitize;

pub use profile::fetch_profile;
pub use sanitize::{escape_html, render_reply, sanitize_html};
