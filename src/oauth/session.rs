//! OAuth session manager
//!
//! Owns the PKCE authorize / exchange / refresh protocol for the single
//! stored session and hands out currently valid access tokens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::callback::{CallbackOutcome, CallbackServer, CallbackTarget};
use super::pkce::{PkcePair, generate_state};
use super::storage::{TokenRecord, TokenStore, UserProfile};
use crate::config::{OAuthSettings, SettingsSource};
use crate::executor::TokenProvider;
use crate::{Error, Result};

const TOKEN_ERROR_BODY_CHARS: usize = 500;

/// Holder for the at-most-one pending login
///
/// Clones share the same slot; managers built on separate slots are isolated.
/// A finished attempt stays in the slot with its outcome until the next
/// login replaces it or logout clears it.
#[derive(Clone, Default)]
pub struct LoginSlot {
    inner: Arc<Mutex<Option<PendingLogin>>>,
}

impl LoginSlot {
    /// Empty slot
    pub fn new() -> Self {
        Self::default()
    }

    async fn take(&self) -> Option<PendingLogin> {
        self.inner.lock().await.take()
    }
}

/// A login attempt and its completion signal
struct PendingLogin {
    state: String,
    redirect_uri: String,
    scopes: Vec<String>,
    authorization_url: String,
    started_at: DateTime<Utc>,
    outcome: watch::Receiver<Option<LoginOutcome>>,
    task: AbortHandle,
}

impl PendingLogin {
    /// Still waiting for its callback
    fn is_pending(&self) -> bool {
        self.outcome.borrow().is_none() && !self.task.is_finished()
    }
}

/// Terminal result of one login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Session stored
    Succeeded,
    /// Provider error, state mismatch, missing code or failed exchange
    Failed(String),
    /// No callback within the login timeout
    TimedOut,
    /// Cancelled by logout
    Cancelled,
}

/// What a caller needs to send the user to the provider
#[derive(Debug, Clone, Serialize)]
pub struct LoginStart {
    /// URL to open in a browser
    pub authorization_url: String,
    /// Redirect URI the listener answers to
    pub redirect_uri: String,
    /// Anti-CSRF state embedded in the URL
    pub state: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// True when an already pending flow was returned
    pub reused: bool,
}

/// Session snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// A token record is stored
    pub logged_in: bool,
    /// A login is waiting for its callback
    pub pending_login: bool,
    /// Expiry of the stored token
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the stored token is past expiry (skew applied)
    pub expired: bool,
    /// Signed-in user
    pub profile: Option<UserProfile>,
    /// Granted scopes
    pub scope: Option<String>,
    /// When the pending login started
    pub pending_since: Option<DateTime<Utc>>,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_record(
        self,
        obtained_at: DateTime<Utc>,
        previous_refresh_token: Option<&str>,
        profile: Option<UserProfile>,
    ) -> TokenRecord {
        TokenRecord {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| previous_refresh_token.map(str::to_string))
                .unwrap_or_default(),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: self.scope,
            obtained_at,
            expires_in_seconds: self.expires_in.unwrap_or(3600),
            profile,
        }
    }
}

/// OAuth session manager
pub struct OAuthSessionManager {
    http: Client,
    store: Arc<TokenStore>,
    slot: LoginSlot,
    settings: Arc<dyn SettingsSource>,
    refresh_gate: Mutex<()>,
    lock_wait: Duration,
}

impl OAuthSessionManager {
    /// Create a manager over a store, a login slot and a settings source
    pub fn new(
        http: Client,
        store: Arc<TokenStore>,
        slot: LoginSlot,
        settings: Arc<dyn SettingsSource>,
    ) -> Self {
        Self {
            http,
            store,
            slot,
            settings,
            refresh_gate: Mutex::new(()),
            lock_wait: Duration::from_secs(10),
        }
    }

    /// How long a refresh waits for another process holding the token lock
    #[must_use]
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// The backing store
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Current settings, read fresh
    pub fn settings(&self) -> Result<OAuthSettings> {
        self.settings.load()
    }

    /// Begin a login, or return the one already pending
    pub async fn start_login(&self) -> Result<LoginStart> {
        let mut slot = self.slot.inner.lock().await;

        if let Some(pending) = slot.as_ref() {
            if pending.is_pending() {
                debug!(redirect_uri = %pending.redirect_uri, "Returning pending login");
                return Ok(LoginStart {
                    authorization_url: pending.authorization_url.clone(),
                    redirect_uri: pending.redirect_uri.clone(),
                    state: pending.state.clone(),
                    scopes: pending.scopes.clone(),
                    reused: true,
                });
            }
        }

        let settings = self.settings.load()?;
        let pkce = PkcePair::generate();
        let state = generate_state();
        let scopes = settings.scope_list();

        let target = CallbackTarget::from_redirect_uri(settings.redirect_uri.as_deref())?;
        let server = CallbackServer::start(&target, state.clone()).await?;
        let redirect_uri = server.redirect_uri().to_string();
        let authorization_url =
            build_authorization_url(&settings, &redirect_uri, &state, &pkce.challenge)?;

        let (outcome_tx, outcome_rx) = watch::channel(None);
        let flow = LoginFlow {
            http: self.http.clone(),
            store: Arc::clone(&self.store),
            settings,
            pkce,
            redirect_uri: redirect_uri.clone(),
            server,
            outcome: outcome_tx,
        };
        let task = tokio::spawn(flow.run()).abort_handle();

        info!(redirect_uri = %redirect_uri, scopes = ?scopes, "OAuth login started");

        *slot = Some(PendingLogin {
            state: state.clone(),
            redirect_uri: redirect_uri.clone(),
            scopes: scopes.clone(),
            authorization_url: authorization_url.clone(),
            started_at: Utc::now(),
            outcome: outcome_rx,
            task,
        });

        Ok(LoginStart {
            authorization_url,
            redirect_uri,
            state,
            scopes,
            reused: false,
        })
    }

    /// Wait for the current login attempt to finish
    ///
    /// Returns at once for an attempt that already finished. Without any
    /// attempt this reports the stored session, or `NotAuthenticated`.
    pub async fn wait_for_login(&self) -> Result<SessionStatus> {
        let rx = {
            let slot = self.slot.inner.lock().await;
            slot.as_ref().map(|p| p.outcome.clone())
        };

        let Some(mut rx) = rx else {
            let status = self.status().await?;
            return if status.logged_in {
                Ok(status)
            } else {
                Err(Error::NotAuthenticated)
            };
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(LoginOutcome::Cancelled),
            Err(_) => LoginOutcome::Cancelled,
        };

        match outcome {
            LoginOutcome::Succeeded => self.status().await,
            LoginOutcome::Failed(reason) => Err(Error::LoginFailed(reason)),
            LoginOutcome::TimedOut => Err(Error::LoginFailed(
                "timed out waiting for the authorization callback".to_string(),
            )),
            LoginOutcome::Cancelled => Err(Error::LoginFailed("login was cancelled".to_string())),
        }
    }

    /// A currently valid access token, refreshed when within the expiry skew
    pub async fn get_access_token(&self) -> Result<String> {
        let record = self.store.load()?.ok_or(Error::NotAuthenticated)?;
        if !record.is_expired() {
            return Ok(record.access_token);
        }

        let _gate = self.refresh_gate.lock().await;
        let _file_lock = self.store.lock_for_refresh(self.lock_wait).await?;

        // Another task or process may have refreshed while we waited
        let record = self.store.load()?.ok_or(Error::NotAuthenticated)?;
        if !record.is_expired() {
            debug!("Token already refreshed elsewhere");
            return Ok(record.access_token);
        }

        let refreshed = self.refresh(&record).await?;
        Ok(refreshed.access_token)
    }

    async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord> {
        if !record.has_refresh_token() {
            return Err(Error::SessionExpired(
                "token expired and no refresh token is stored".to_string(),
            ));
        }

        let settings = self.settings.load()?;
        let scope = settings.scope_param();
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", record.refresh_token.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = request_token(&self.http, &settings, &params)
            .await
            .map_err(|e| {
                warn!(error = %e, "Token refresh failed");
                Error::SessionExpired(e)
            })?;

        let refreshed = response.into_record(
            Utc::now(),
            Some(record.refresh_token.as_str()),
            record.profile.clone(),
        );
        self.store.save(&refreshed)?;

        info!(expires_at = %refreshed.expires_at(), "Token refreshed successfully");
        Ok(refreshed)
    }

    /// Cancel any pending login and delete the stored session
    pub async fn logout(&self) -> Result<()> {
        if let Some(pending) = self.slot.take().await {
            if pending.is_pending() {
                info!(redirect_uri = %pending.redirect_uri, "Cancelled pending login");
            }
            pending.task.abort();
        }
        self.store.delete()
    }

    /// Session snapshot; no side effects
    pub async fn status(&self) -> Result<SessionStatus> {
        let (pending_login, pending_since) = {
            let slot = self.slot.inner.lock().await;
            match slot.as_ref() {
                Some(p) if p.is_pending() => (true, Some(p.started_at)),
                _ => (false, None),
            }
        };

        let record = self.store.load()?;
        Ok(SessionStatus {
            logged_in: record.is_some(),
            pending_login,
            expires_at: record.as_ref().map(TokenRecord::expires_at),
            expired: record.as_ref().is_some_and(TokenRecord::is_expired),
            profile: record.as_ref().and_then(|r| r.profile.clone()),
            scope: record.as_ref().and_then(|r| r.scope.clone()),
            pending_since,
        })
    }
}

#[async_trait]
impl TokenProvider for OAuthSessionManager {
    async fn access_token(&self) -> Result<String> {
        self.get_access_token().await
    }
}

/// Everything the callback task needs; dropping it closes the listener
struct LoginFlow {
    http: Client,
    store: Arc<TokenStore>,
    settings: OAuthSettings,
    pkce: PkcePair,
    redirect_uri: String,
    server: CallbackServer,
    outcome: watch::Sender<Option<LoginOutcome>>,
}

impl LoginFlow {
    async fn run(self) {
        let Self {
            http,
            store,
            settings,
            pkce,
            redirect_uri,
            server,
            outcome,
        } = self;

        let result = match server.wait_for_callback(settings.login_timeout()).await {
            CallbackOutcome::Code(code) => {
                match complete_login(&http, &store, &settings, &code, &redirect_uri, &pkce).await {
                    Ok(record) => {
                        info!(
                            user = ?record.profile.as_ref().and_then(|p| p.username.clone()),
                            "OAuth login completed"
                        );
                        LoginOutcome::Succeeded
                    }
                    Err(Error::LoginFailed(reason)) => {
                        warn!(reason = %reason, "OAuth code exchange failed");
                        LoginOutcome::Failed(reason)
                    }
                    Err(e) => {
                        warn!(error = %e, "OAuth login could not be stored");
                        LoginOutcome::Failed(e.to_string())
                    }
                }
            }
            CallbackOutcome::Failed(reason) => {
                warn!(reason = %reason, "OAuth callback rejected");
                LoginOutcome::Failed(reason)
            }
            CallbackOutcome::TimedOut => {
                warn!(timeout_secs = settings.login_timeout_secs, "OAuth login timed out");
                LoginOutcome::TimedOut
            }
        };

        let _ = outcome.send(Some(result));
    }
}

async fn complete_login(
    http: &Client,
    store: &TokenStore,
    settings: &OAuthSettings,
    code: &str,
    redirect_uri: &str,
    pkce: &PkcePair,
) -> Result<TokenRecord> {
    let scope = settings.scope_param();
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("code_verifier", pkce.verifier.as_str()),
        ("scope", scope.as_str()),
    ];

    let response = request_token(http, settings, &params)
        .await
        .map_err(Error::LoginFailed)?;

    let profile = fetch_profile(http, settings, &response.access_token).await;
    let record = response.into_record(Utc::now(), None, profile);
    store.save(&record)?;
    Ok(record)
}

/// POST to the token endpoint with HTTP Basic client credentials
async fn request_token(
    http: &Client,
    settings: &OAuthSettings,
    params: &[(&str, &str)],
) -> std::result::Result<TokenResponse, String> {
    let response = http
        .post(&settings.token_url)
        .basic_auth(&settings.client_id, Some(&settings.client_secret))
        .header(reqwest::header::ACCEPT, "application/json")
        .form(params)
        .send()
        .await
        .map_err(|e| format!("token request failed: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!(
            "token endpoint returned HTTP {status}: {}",
            body.chars().take(TOKEN_ERROR_BODY_CHARS).collect::<String>()
        ));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| format!("failed to parse token response: {e}"))
}

/// Best effort: any failure yields no profile
async fn fetch_profile(
    http: &Client,
    settings: &OAuthSettings,
    access_token: &str,
) -> Option<UserProfile> {
    let response = match http
        .get(&settings.profile_url)
        .bearer_auth(access_token)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!(status = %response.status(), "Profile request rejected");
            return None;
        }
        Err(e) => {
            debug!(error = %e, "Profile request failed");
            return None;
        }
    };

    match response.json::<UserProfile>().await {
        Ok(profile) if !profile.is_empty() => Some(profile),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Profile response unreadable");
            None
        }
    }
}

fn build_authorization_url(
    settings: &OAuthSettings,
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> Result<String> {
    let mut url = Url::parse(&settings.authorize_url)
        .map_err(|e| Error::Config(format!("Invalid authorize endpoint: {e}")))?;

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &settings.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", &settings.scope_param())
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256");

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings() -> OAuthSettings {
        OAuthSettings {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: None,
            scopes: "data:read,account:read".to_string(),
            hub_id: None,
            authorize_url: "https://auth.example.com/authorize".to_string(),
            token_url: "https://auth.example.com/token".to_string(),
            profile_url: "https://auth.example.com/userinfo".to_string(),
            login_timeout_secs: 300,
        }
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let url = build_authorization_url(
            &settings(),
            "http://127.0.0.1:5000/oauth/callback",
            "st",
            "challenge",
        )
        .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let query: HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client");
        assert_eq!(query["redirect_uri"], "http://127.0.0.1:5000/oauth/callback");
        assert_eq!(query["scope"], "data:read account:read");
        assert_eq!(query["state"], "st");
        assert_eq!(query["code_challenge"], "challenge");
        assert_eq!(query["code_challenge_method"], "S256");
    }

    #[test]
    fn refresh_response_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new".to_string(),
            refresh_token: None,
            expires_in: Some(1800),
            token_type: None,
            scope: None,
        };
        let profile = UserProfile {
            name: Some("Dana".to_string()),
            ..UserProfile::default()
        };
        let record = response.into_record(Utc::now(), Some("old-refresh"), Some(profile.clone()));
        assert_eq!(record.refresh_token, "old-refresh");
        assert_eq!(record.expires_in_seconds, 1800);
        assert_eq!(record.token_type, "Bearer");
        assert_eq!(record.profile, Some(profile));
    }

    #[tokio::test]
    async fn separate_slots_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let make = |name: &str| {
            OAuthSessionManager::new(
                Client::new(),
                Arc::new(TokenStore::new(dir.path().join(name))),
                LoginSlot::new(),
                Arc::new(settings()),
            )
        };
        let a = make("a.json");
        let b = make("b.json");

        let first = a.start_login().await.unwrap();
        let second = b.start_login().await.unwrap();
        assert_ne!(first.state, second.state);
        assert_ne!(first.redirect_uri, second.redirect_uri);

        a.logout().await.unwrap();
        assert!(!a.status().await.unwrap().pending_login);
        assert!(b.status().await.unwrap().pending_login);
        b.logout().await.unwrap();
    }
}
