//! Configuration management
//!
//! Two layers:
//! - [`AccessConfig`]: executor, pagination, resolver and rate-limit tuning,
//!   loaded once from defaults, an optional YAML file and the environment.
//! - [`OAuthSettings`]: client credentials and endpoints, extracted from the
//!   environment on every operation so changes apply without a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable prefix for every setting
pub const ENV_PREFIX: &str = "CONSTRUCTION_MCP_";

/// Default authorize endpoint
pub const DEFAULT_AUTHORIZE_URL: &str =
    "https://developer.api.autodesk.com/authentication/v2/authorize";
/// Default token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://developer.api.autodesk.com/authentication/v2/token";
/// Default profile endpoint
pub const DEFAULT_PROFILE_URL: &str = "https://api.userprofile.autodesk.com/userinfo";
/// Default requested scopes
pub const DEFAULT_SCOPES: &str = "data:read data:write account:read";
/// Callback path used when the redirect URI does not name one
pub const DEFAULT_CALLBACK_PATH: &str = "/oauth/callback";

/// Tuning for the access layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Request executor defaults
    pub executor: ExecutorConfig,
    /// Retry defaults
    pub retry: RetryConfig,
    /// Client-side rate limiting
    pub rate_limit: RateLimitConfig,
    /// Page aggregation defaults
    pub pagination: PaginationConfig,
    /// Name resolution limits
    pub resolver: ResolverConfig,
}

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum characters of an error body kept in [`Error::Http`]
    pub max_error_body_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_error_body_chars: 2_000,
        }
    }
}

impl ExecutorConfig {
    /// Per-attempt timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay in milliseconds, doubled per attempt
    pub base_delay_ms: u64,
    /// Upper bound for a computed delay; `Retry-After` hints are not capped
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable client-side pacing
    pub enabled: bool,
    /// Requests per second
    pub requests_per_second: u32,
    /// Burst size
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 20,
            burst_size: 40,
        }
    }
}

/// Page aggregation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Page size
    pub limit: usize,
    /// Page ceiling for a fetch-all run
    pub max_pages: usize,
    /// Item ceiling for a fetch-all run
    pub max_items: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            limit: 50,
            max_pages: 20,
            max_items: 1_000,
        }
    }
}

/// Name resolution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Node budget for one folder search
    pub folder_max_scan: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            folder_max_scan: 500,
        }
    }
}

impl AccessConfig {
    /// Load configuration from defaults, an optional YAML file and the environment
    ///
    /// Environment keys use the `CONSTRUCTION_MCP_` prefix with `__` nesting,
    /// e.g. `CONSTRUCTION_MCP_RETRY__MAX_RETRIES=5`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

/// OAuth client settings, read fresh for every operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    /// Registered client id
    #[serde(default)]
    pub client_id: String,
    /// Registered client secret
    #[serde(default)]
    pub client_secret: String,
    /// Redirect URI; a missing or zero port means "OS-assigned"
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Requested scopes, space or comma separated
    #[serde(default = "default_scopes")]
    pub scopes: String,
    /// Default hub identifier
    #[serde(default)]
    pub hub_id: Option<String>,
    /// Authorize endpoint
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    /// Token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Profile endpoint
    #[serde(default = "default_profile_url")]
    pub profile_url: String,
    /// How long a pending login waits for its callback
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
}

fn default_scopes() -> String {
    DEFAULT_SCOPES.to_string()
}

fn default_authorize_url() -> String {
    DEFAULT_AUTHORIZE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_profile_url() -> String {
    DEFAULT_PROFILE_URL.to_string()
}

fn default_login_timeout_secs() -> u64 {
    300
}

impl OAuthSettings {
    /// Extract settings from the `CONSTRUCTION_MCP_` environment
    pub fn from_env() -> Result<Self> {
        let settings: Self = Figment::new()
            .merge(Env::prefixed(ENV_PREFIX).only(&[
                "client_id",
                "client_secret",
                "redirect_uri",
                "scopes",
                "hub_id",
                "authorize_url",
                "token_url",
                "profile_url",
                "login_timeout_secs",
            ]))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that cannot drive a login
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config(format!("{ENV_PREFIX}CLIENT_ID is not set")));
        }
        if self.client_secret.trim().is_empty() {
            return Err(Error::Config(format!(
                "{ENV_PREFIX}CLIENT_SECRET is not set"
            )));
        }
        Ok(())
    }

    /// Scopes split on spaces and commas
    #[must_use]
    pub fn scope_list(&self) -> Vec<String> {
        parse_scopes(&self.scopes)
    }

    /// Scopes joined for the wire
    #[must_use]
    pub fn scope_param(&self) -> String {
        self.scope_list().join(" ")
    }

    /// Pending-login lifetime
    #[must_use]
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    /// Default hub, trimmed; empty values count as unset
    #[must_use]
    pub fn default_hub(&self) -> Option<&str> {
        self.hub_id
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }
}

/// Split a scope string on spaces and commas, dropping empties and duplicates
#[must_use]
pub fn parse_scopes(raw: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for scope in raw.split([' ', ',', '\t', '\n']) {
        let scope = scope.trim();
        if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}

/// Where OAuth settings come from
pub trait SettingsSource: Send + Sync {
    /// Produce settings for one operation
    fn load(&self) -> Result<OAuthSettings>;
}

/// Reads [`OAuthSettings::from_env`] on every call
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSettings;

impl SettingsSource for EnvSettings {
    fn load(&self) -> Result<OAuthSettings> {
        OAuthSettings::from_env()
    }
}

impl SettingsSource for OAuthSettings {
    fn load(&self) -> Result<OAuthSettings> {
        self.validate()?;
        Ok(self.clone())
    }
}

/// Token file location: `CONSTRUCTION_MCP_TOKEN_PATH` or the per-user config dir
pub fn default_token_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(format!("{ENV_PREFIX}TOKEN_PATH")) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let base = dirs::config_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| Error::Config("Cannot determine config directory".to_string()))?;

    Ok(base.join("construction-mcp").join("tokens.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn scopes_split_on_space_and_comma() {
        assert_eq!(
            parse_scopes("data:read, data:write  account:read,data:read"),
            vec!["data:read", "data:write", "account:read"]
        );
        assert!(parse_scopes(" , ").is_empty());
    }

    #[test]
    fn oauth_settings_read_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("CONSTRUCTION_MCP_CLIENT_ID", "cid");
            jail.set_env("CONSTRUCTION_MCP_CLIENT_SECRET", "secret");
            jail.set_env("CONSTRUCTION_MCP_SCOPES", "data:read,account:read");
            jail.set_env("CONSTRUCTION_MCP_HUB_ID", " b.hub ");

            let settings = OAuthSettings::from_env().expect("settings");
            assert_eq!(settings.client_id, "cid");
            assert_eq!(settings.scope_param(), "data:read account:read");
            assert_eq!(settings.default_hub(), Some("b.hub"));
            assert_eq!(settings.token_url, DEFAULT_TOKEN_URL);
            assert_eq!(settings.login_timeout(), Duration::from_secs(300));

            // Changes are visible on the next read
            jail.set_env("CONSTRUCTION_MCP_CLIENT_ID", "cid-2");
            assert_eq!(OAuthSettings::from_env().expect("settings").client_id, "cid-2");
            Ok(())
        });
    }

    #[test]
    fn oauth_settings_require_credentials() {
        Jail::expect_with(|jail| {
            jail.set_env("CONSTRUCTION_MCP_CLIENT_ID", "cid");
            let err = OAuthSettings::from_env().unwrap_err();
            assert!(err.to_string().contains("CLIENT_SECRET"));
            Ok(())
        });
    }

    #[test]
    fn access_config_layers_yaml_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "access.yaml",
                "retry:\n  max_retries: 5\npagination:\n  limit: 25\n",
            )?;
            jail.set_env("CONSTRUCTION_MCP_PAGINATION__MAX_ITEMS", "200");

            let config = AccessConfig::load(Some(Path::new("access.yaml"))).expect("config");
            assert_eq!(config.retry.max_retries, 5);
            assert_eq!(config.retry.base_delay_ms, 500);
            assert_eq!(config.pagination.limit, 25);
            assert_eq!(config.pagination.max_items, 200);
            assert_eq!(config.resolver.folder_max_scan, 500);
            Ok(())
        });
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = AccessConfig::load(Some(Path::new("/nonexistent/access.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
