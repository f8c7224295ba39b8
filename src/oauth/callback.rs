//! OAuth Callback Server
//!
//! A single-use loopback HTTP listener that receives the authorization
//! redirect. The handler validates `state` and resolves a oneshot; dropping
//! the [`CallbackServer`] tears the listener down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DEFAULT_CALLBACK_PATH;
use crate::{Error, Result};

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter (for CSRF protection)
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// Where the listener binds and what redirect URI it answers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTarget {
    host: String,
    port: u16,
    path: String,
    configured_uri: Option<String>,
}

impl CallbackTarget {
    /// Derive the bind target from an optional configured redirect URI
    ///
    /// A URI without a port (or with port 0) binds an OS-assigned port and the
    /// redirect URI is rebuilt from the bound address.
    pub fn from_redirect_uri(redirect_uri: Option<&str>) -> Result<Self> {
        let Some(raw) = redirect_uri.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(Self {
                host: "127.0.0.1".to_string(),
                port: 0,
                path: DEFAULT_CALLBACK_PATH.to_string(),
                configured_uri: None,
            });
        };

        let url = Url::parse(raw)
            .map_err(|e| Error::Config(format!("Invalid redirect URI '{raw}': {e}")))?;
        if url.scheme() != "http" {
            return Err(Error::Config(format!(
                "Redirect URI must use http on a loopback host: {raw}"
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("Redirect URI has no host: {raw}")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        if !is_loopback(&host) {
            return Err(Error::Config(format!(
                "Redirect URI host must be loopback, got '{host}'"
            )));
        }
        let path = match url.path() {
            "" | "/" => DEFAULT_CALLBACK_PATH.to_string(),
            p => p.to_string(),
        };
        let port = url.port().unwrap_or(0);

        Ok(Self {
            host,
            port,
            configured_uri: (port != 0).then(|| raw.to_string()),
            path,
        })
    }

    /// Callback route path
    pub fn path(&self) -> &str {
        &self.path
    }

    fn redirect_uri(&self, bound: SocketAddr) -> String {
        if let Some(uri) = &self.configured_uri {
            return uri.clone();
        }
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("http://{host}:{}{}", bound.port(), self.path)
    }
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}

/// Authorization code delivered by a valid callback
#[derive(Debug)]
pub struct CallbackResult {
    /// Authorization code
    pub code: String,
}

/// State shared with the callback handler
struct CallbackState {
    expected_state: String,
    tx: Option<oneshot::Sender<Result<CallbackResult>>>,
}

/// A bound, running callback listener
pub struct CallbackServer {
    redirect_uri: String,
    rx: Option<oneshot::Receiver<Result<CallbackResult>>>,
    server: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind the listener and start serving the callback route
    pub async fn start(target: &CallbackTarget, expected_state: String) -> Result<Self> {
        let listener = TcpListener::bind((target.host.as_str(), target.port))
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind callback server: {e}")))?;

        let bound = listener
            .local_addr()
            .map_err(|e| Error::Internal(format!("Failed to get callback server address: {e}")))?;

        let redirect_uri = target.redirect_uri(bound);
        info!(url = %redirect_uri, "OAuth callback server listening");

        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(CallbackState {
            expected_state,
            tx: Some(tx),
        }));

        let app = Router::new()
            .route(target.path(), get(handle_callback))
            .with_state(state);

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "Callback server error");
            }
        });

        Ok(Self {
            redirect_uri,
            rx: Some(rx),
            server,
        })
    }

    /// Redirect URI the provider must send the browser back to
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Wait for the one callback, up to `timeout`
    ///
    /// The listener is shut down before this returns, whatever the outcome.
    pub async fn wait_for_callback(mut self, timeout: Duration) -> CallbackOutcome {
        let Some(rx) = self.rx.take() else {
            return CallbackOutcome::Failed("callback already consumed".to_string());
        };

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => CallbackOutcome::Code(result.code),
            Ok(Ok(Err(Error::LoginFailed(reason)))) => CallbackOutcome::Failed(reason),
            Ok(Ok(Err(e))) => CallbackOutcome::Failed(e.to_string()),
            Ok(Err(_)) => CallbackOutcome::Failed("callback channel closed unexpectedly".to_string()),
            Err(_) => CallbackOutcome::TimedOut,
        };

        self.shutdown();
        outcome
    }

    fn shutdown(&self) {
        if !self.server.is_finished() {
            debug!(url = %self.redirect_uri, "Shutting down OAuth callback server");
            self.server.abort();
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// How the callback wait ended
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Valid callback with an authorization code
    Code(String),
    /// Provider error, missing code, or state mismatch
    Failed(String),
    /// Nobody called back in time
    TimedOut,
}

/// Handle the OAuth callback
async fn handle_callback(
    State(state): State<Arc<Mutex<CallbackState>>>,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    debug!(
        has_code = params.code.is_some(),
        has_state = params.state.is_some(),
        error = ?params.error,
        "Received OAuth callback"
    );

    let mut state = state.lock().await;
    let Some(tx) = state.tx.take() else {
        return (
            StatusCode::GONE,
            Html(error_page("already_used", "This login link was already used")),
        );
    };

    let (result, page) = evaluate_callback(params, &state.expected_state);
    let _ = tx.send(result);
    page
}

fn evaluate_callback(
    params: CallbackParams,
    expected_state: &str,
) -> (Result<CallbackResult>, (StatusCode, Html<String>)) {
    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        return (
            Err(Error::LoginFailed(format!("OAuth error: {error} - {description}"))),
            (StatusCode::BAD_REQUEST, Html(error_page(&error, &description))),
        );
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (
            Err(Error::LoginFailed("Missing authorization code".to_string())),
            (
                StatusCode::BAD_REQUEST,
                Html(error_page("missing_code", "Authorization code not provided")),
            ),
        );
    };

    match params.state {
        Some(s) if s == expected_state => (
            Ok(CallbackResult { code }),
            (StatusCode::OK, Html(success_page())),
        ),
        Some(_) => (
            Err(Error::LoginFailed("State mismatch - possible CSRF attack".to_string())),
            (
                StatusCode::BAD_REQUEST,
                Html(error_page("state_mismatch", "Invalid state parameter")),
            ),
        ),
        None => (
            Err(Error::LoginFailed("Missing state parameter".to_string())),
            (
                StatusCode::BAD_REQUEST,
                Html(error_page("missing_state", "State parameter not provided")),
            ),
        ),
    }
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Successful</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
               display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; }
        .container { text-align: center; padding: 2rem; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Authorization Successful</h1>
        <p>You can close this window and return to your assistant.</p>
    </div>
    <script>setTimeout(() => window.close(), 3000);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str, description: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Failed</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
               display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; }}
        .container {{ text-align: center; padding: 2rem; max-width: 400px; }}
        .error-code {{ font-family: monospace; margin-top: 1rem; opacity: 0.7; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Authorization Failed</h1>
        <p>{}</p>
        <p class="error-code">Error: {}</p>
    </div>
</body>
</html>"#,
        escape_html(description),
        escape_html(error)
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
