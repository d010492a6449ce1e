//! Browser assets compiled into the binary.

/// The embeddable widget bundle, served at `/widget.js`.
pub const WIDGET_JS: &str = include_str!("../../../../web/widget.js");

/// Dashboard single-page app, served at `/dashboard`.
pub const DASHBOARD_HTML: &str = include_str!("../../../../web/dashboard.html");

/// Popup page shown after a successful Google authorization.
pub const OAUTH_SUCCESS_HTML: &str = include_str!("../../../../web/oauth-success.html");

/// Popup page shown when Google authorization fails.
pub const OAUTH_ERROR_HTML: &str = include_str!("../../../../web/oauth-error.html");

pub const JS_CONTENT_TYPE: &str = "application/javascript; charset=utf-8";
