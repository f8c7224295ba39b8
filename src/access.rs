//! Access layer facade for tool adapters
//!
//! Bundles the session manager, the executor and the configured ceilings so
//! an adapter can authenticate, resolve names and list collections through
//! one handle.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use tracing::debug;

use crate::config::{AccessConfig, EnvSettings, SettingsSource};
use crate::executor::{RequestExecutor, TokenProvider};
use crate::oauth::{LoginSlot, OAuthSessionManager, TokenStore};
use crate::pagination::{PageOptions, PageRequest, PageResult, fetch_all_pages};
use crate::resolver::{
    FolderNode, FolderResolution, FolderSource, NamedEntity, ResolutionResult,
    resolve_folder_by_name, resolve_hub, resolve_identifier,
};
use crate::{Error, Result};

/// Authenticated resilient access layer
pub struct AccessLayer {
    config: AccessConfig,
    session: Arc<OAuthSessionManager>,
    executor: RequestExecutor,
}

impl AccessLayer {
    /// Build over an existing session manager
    pub fn new(config: AccessConfig, session: Arc<OAuthSessionManager>) -> Result<Self> {
        let tokens: Arc<dyn TokenProvider> = session.clone();
        let executor = RequestExecutor::new(&config)?.with_token_provider(tokens);
        Ok(Self {
            config,
            session,
            executor,
        })
    }

    /// Build from config file, environment and the per-user token file
    pub fn from_env(config_path: Option<&Path>) -> Result<Self> {
        let config = AccessConfig::load(config_path)?;
        let store = Arc::new(TokenStore::default_location()?);
        let settings: Arc<dyn SettingsSource> = Arc::new(EnvSettings);
        let http = Client::builder()
            .connect_timeout(config.executor.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        debug!(token_path = %store.path().display(), "Access layer initialised");
        let session = Arc::new(OAuthSessionManager::new(
            http,
            store,
            LoginSlot::new(),
            settings,
        ));
        Self::new(config, session)
    }

    /// Effective configuration
    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Session manager
    pub fn session(&self) -> &OAuthSessionManager {
        &self.session
    }

    /// Request executor, authenticated through the session
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Paging options with the configured ceilings
    pub fn page_options(&self, fetch_all: bool) -> PageOptions {
        if fetch_all {
            PageOptions::all(&self.config.pagination)
        } else {
            PageOptions::single(&self.config.pagination)
        }
    }

    /// Aggregate a listing under the configured ceilings
    pub async fn list_all<T, F, Fut>(&self, fetch_page: F) -> Result<PageResult<T>>
    where
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = Result<PageResult<T>>>,
    {
        fetch_all_pages(&self.page_options(true), fetch_page).await
    }

    /// Resolve a hub id or name, falling back to the configured default hub
    pub fn resolve_hub<E: NamedEntity>(
        &self,
        hubs: &[E],
        input: Option<&str>,
    ) -> Result<ResolutionResult> {
        let default_hub = match self.session.settings() {
            Ok(settings) => settings.hub_id,
            Err(e) => {
                debug!(error = %e, "No settings for a default hub");
                None
            }
        };
        resolve_hub(hubs, input, default_hub.as_deref())
    }

    /// Resolve a project id or name
    pub fn resolve_project<E: NamedEntity>(
        &self,
        projects: &[E],
        input: &str,
    ) -> Result<ResolutionResult> {
        resolve_identifier(projects, input)
    }

    /// Resolve a folder under the configured scan budget
    pub async fn resolve_folder<S>(
        &self,
        source: &S,
        top_nodes: Vec<FolderNode>,
        input: &str,
    ) -> Result<FolderResolution>
    where
        S: FolderSource + ?Sized,
    {
        resolve_folder_by_name(source, top_nodes, input, self.config.resolver.folder_max_scan).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthSettings;
    use crate::resolver::{CandidateSummary, ResolutionSource};

    fn layer(dir: &Path, hub_id: Option<&str>) -> AccessLayer {
        let settings = OAuthSettings {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: None,
            scopes: "data:read".to_string(),
            hub_id: hub_id.map(str::to_string),
            authorize_url: "https://auth.example.com/authorize".to_string(),
            token_url: "https://auth.example.com/token".to_string(),
            profile_url: "https://auth.example.com/userinfo".to_string(),
            login_timeout_secs: 300,
        };
        let session = Arc::new(OAuthSessionManager::new(
            Client::new(),
            Arc::new(TokenStore::new(dir.join("tokens.json"))),
            LoginSlot::new(),
            Arc::new(settings),
        ));
        AccessLayer::new(AccessConfig::default(), session).unwrap()
    }

    #[test]
    fn hub_defaults_come_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let hubs = vec![CandidateSummary::new("b.1", "Main Hub")];

        let with_default = layer(dir.path(), Some("b.1"));
        let resolved = with_default.resolve_hub(&hubs, None).unwrap();
        assert_eq!(resolved.source, ResolutionSource::Default);

        let without = layer(dir.path(), None);
        assert!(matches!(
            without.resolve_hub(&hubs, None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn list_all_applies_configured_ceilings() {
        let dir = tempfile::tempdir().unwrap();
        let access = layer(dir.path(), None);
        let result = access
            .list_all(|req| async move {
                Ok(PageResult::new((req.offset..req.offset + req.limit).collect::<Vec<_>>()))
            })
            .await
            .unwrap();

        // Defaults: limit 50, max_items 1000, max_pages 20
        let pagination = result.pagination.unwrap();
        assert_eq!(pagination.fetched_items, 1000);
        assert_eq!(pagination.fetched_pages, 20);
        assert!(pagination.has_more);
    }

    #[tokio::test]
    async fn unauthenticated_executor_calls_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let access = layer(dir.path(), None);
        let err = access
            .executor()
            .get_json("http://127.0.0.1:9/never-called")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));
    }
}
