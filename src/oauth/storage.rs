//! OAuth Token Storage
//!
//! Persists the single session record as `{"version": 1, "tokens": {...}}`.
//! Writes go to a sibling temp file that is renamed over the target, so
//! readers never observe a partial record.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::default_token_path;
use crate::{Error, Result};

/// Current on-disk format version
pub const STORE_VERSION: u32 = 1;

/// Seconds subtracted from the expiry before a token counts as valid
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// Minimal identity of the signed-in user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Provider user id
    #[serde(default, alias = "sub", alias = "userId")]
    pub user_id: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Email address
    #[serde(default, alias = "emailId")]
    pub email: Option<String>,
    /// Login name
    #[serde(default, alias = "preferred_username", alias = "userName")]
    pub username: Option<String>,
}

impl UserProfile {
    /// Whether the provider told us nothing
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.name.is_none() && self.email.is_none() && self.username.is_none()
    }
}

/// The persisted OAuth session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer token
    pub access_token: String,
    /// Refresh token; empty when the provider issued none
    #[serde(default)]
    pub refresh_token: String,
    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// When the token was issued
    pub obtained_at: DateTime<Utc>,
    /// Lifetime from `obtained_at`
    pub expires_in_seconds: u64,
    /// Signed-in user, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("obtained_at", &self.obtained_at)
            .field("expires_in_seconds", &self.expires_in_seconds)
            .field("profile", &self.profile)
            .finish()
    }
}

impl TokenRecord {
    /// Authoritative expiry: `obtained_at + expires_in_seconds`
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expires_in_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| self.obtained_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Expired as of `now`, with the 60 second skew applied
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let skew = chrono::Duration::seconds(EXPIRY_SKEW_SECS);
        now + skew >= self.expires_at()
    }

    /// Expired as of now, with the 60 second skew applied
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether a refresh can be attempted
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct StoredTokens {
    version: u32,
    tokens: TokenRecord,
}

/// Durable store for the single session record
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Store backed by the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the per-user configuration directory
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(default_token_path()?))
    }

    /// Token file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tokens.json".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Load the stored record; absence means "not logged in"
    ///
    /// Unreadable or foreign-format files are logged and treated as absent.
    pub fn load(&self) -> Result<Option<TokenRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored tokens found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<StoredTokens>(&content) {
            Ok(stored) if stored.version == STORE_VERSION => Ok(Some(stored.tokens)),
            Ok(stored) => {
                warn!(
                    path = %self.path.display(),
                    version = stored.version,
                    "Unsupported token file version, ignoring"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to parse stored token");
                Ok(None)
            }
        }
    }

    /// Atomically replace the stored record
    pub fn save(&self, record: &TokenRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(&StoredTokens {
            version: STORE_VERSION,
            tokens: record.clone(),
        })?;

        atomic_write(&self.path, content.as_bytes())
            .map_err(|e| Error::Internal(format!("Failed to write token file: {e}")))?;

        info!(path = %self.path.display(), expires_at = %record.expires_at(), "Saved OAuth token");
        Ok(())
    }

    /// Delete the stored record; missing files are fine
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Deleted OAuth token");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Internal(format!("Failed to delete token file: {e}"))),
        }
    }

    /// Take the cross-process refresh lock, waiting at most `wait`
    ///
    /// Returns `None` when the lock could not be taken in time; the caller
    /// then proceeds unlocked and last writer wins.
    pub async fn lock_for_refresh(&self, wait: Duration) -> Result<Option<RefreshLock>> {
        let lock_path = self.lock_path();
        ensure_parent_dir(&lock_path)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        let (acquired_tx, acquired_rx) = oneshot::channel::<io::Result<()>>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // fd-lock blocks, so the guard lives on a blocking thread until released
        tokio::task::spawn_blocking(move || {
            let mut lock = fd_lock::RwLock::new(file);
            match lock.write() {
                Ok(_guard) => {
                    if acquired_tx.send(Ok(())).is_ok() {
                        let _ = release_rx.blocking_recv();
                    }
                }
                Err(e) => {
                    let _ = acquired_tx.send(Err(e));
                }
            }
        });

        match tokio::time::timeout(wait, acquired_rx).await {
            Ok(Ok(Ok(()))) => {
                debug!(path = %lock_path.display(), "Acquired token refresh lock");
                Ok(Some(RefreshLock {
                    _release: release_tx,
                }))
            }
            Ok(Ok(Err(e))) => Err(Error::Internal(format!("Failed to lock token file: {e}"))),
            Ok(Err(_)) => Err(Error::Internal("Token lock task ended unexpectedly".to_string())),
            Err(_) => {
                warn!(
                    path = %lock_path.display(),
                    wait_ms = wait.as_millis(),
                    "Token refresh lock busy, refreshing without it"
                );
                Ok(None)
            }
        }
    }
}

/// Held while a refresh is in progress; dropping it releases the file lock
#[derive(Debug)]
pub struct RefreshLock {
    _release: oneshot::Sender<()>,
}

fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn temp_sibling_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tokens.json");
    path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    ensure_parent_dir(path)?;
    let tmp = temp_sibling_path(path);
    let written = (|| {
        let mut file: File = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp)?;
        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(obtained_at: DateTime<Utc>, expires_in: u64) -> TokenRecord {
        TokenRecord {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            token_type: "Bearer".to_string(),
            scope: Some("data:read".to_string()),
            obtained_at,
            expires_in_seconds: expires_in,
            profile: None,
        }
    }

    #[test]
    fn token_expiry_applies_skew() {
        let now = Utc::now();
        assert!(!record(now, 3600).is_expired_at(now));
        // 59 seconds left counts as expired
        assert!(record(now - chrono::Duration::seconds(3541), 3600).is_expired_at(now));
        // 61 seconds left does not
        assert!(!record(now - chrono::Duration::seconds(3539), 3600).is_expired_at(now));
        assert!(record(now, 0).is_expired_at(now));
    }

    #[test]
    fn save_then_load_uses_versioned_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("tokens.json"));
        let mut rec = record(Utc::now(), 3600);
        rec.profile = Some(UserProfile {
            user_id: Some("u-1".to_string()),
            ..UserProfile::default()
        });

        store.save(&rec).unwrap();
        assert_eq!(store.load().unwrap(), Some(rec));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["tokens"]["access_token"], "access");

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));
        store.save(&record(Utc::now(), 3600)).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn missing_or_foreign_files_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));
        assert_eq!(store.load().unwrap(), None);

        fs::write(store.path(), "not json").unwrap();
        assert_eq!(store.load().unwrap(), None);

        fs::write(store.path(), r#"{"version": 9, "tokens": {"access_token": "a", "obtained_at": "2024-01-01T00:00:00Z", "expires_in_seconds": 1}}"#).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));
        store.save(&record(Utc::now(), 3600)).unwrap();
        store.delete().unwrap();
        store.delete().unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn profile_accepts_provider_field_names() {
        let profile: UserProfile = serde_json::from_str(
            r#"{"sub": "abc", "name": "Dana", "email": "d@example.com", "preferred_username": "dana"}"#,
        )
        .unwrap();
        assert_eq!(profile.user_id.as_deref(), Some("abc"));
        assert_eq!(profile.username.as_deref(), Some("dana"));
        assert!(!profile.is_empty());
        assert!(UserProfile::default().is_empty());
    }

    #[test]
    fn debug_redacts_tokens() {
        let rendered = format!("{:?}", record(Utc::now(), 10));
        assert!(!rendered.contains("\"access\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn refresh_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));

        let first = store
            .lock_for_refresh(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .lock_for_refresh(Duration::from_millis(100))
            .await
            .unwrap();
        assert!(second.is_none());

        drop(first);
        let third = store
            .lock_for_refresh(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(third.is_some());
    }
}
