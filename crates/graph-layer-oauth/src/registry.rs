//! Application registry: one lazily built OAuth client per application id.

use std::collections::HashMap;
use std::sync::Arc;

use graph_layer_config::{AnonymousCredentials, ApplicationConfig};
use parking_lot::RwLock;

use crate::client::OAuthClient;
use crate::error::Result;

/// Constructs the OAuth client for an application.
pub trait ClientFactory: Send + Sync {
    fn create(&self, app_id: &str, config: &ApplicationConfig) -> Result<Arc<dyn OAuthClient>>;
}

/// A configured application and its OAuth client. Immutable once built.
#[derive(Debug)]
pub struct Application {
    id: String,
    config: ApplicationConfig,
    client: Arc<dyn OAuthClient>,
}

impl Application {
    pub fn new(
        id: impl Into<String>,
        config: ApplicationConfig,
        client: Arc<dyn OAuthClient>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            client,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    pub fn client(&self) -> &dyn OAuthClient {
        self.client.as_ref()
    }

    /// Service identity for anonymous access, if configured.
    pub fn anonymous_credentials(&self) -> Option<&AnonymousCredentials> {
        self.config.anonymous.as_ref()
    }
}

#[derive(Default)]
struct RegistryState {
    configs: HashMap<String, ApplicationConfig>,
    cache: HashMap<String, Arc<Application>>,
}

/// Resolves application ids to [`Application`]s.
///
/// Applications are built on first reference and cached until the next
/// [`reload`](Self::reload) or [`clear`](Self::clear).
pub struct ApplicationRegistry {
    state: RwLock<RegistryState>,
    factory: Arc<dyn ClientFactory>,
}

impl ApplicationRegistry {
    pub fn new(apps: HashMap<String, ApplicationConfig>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                configs: apps,
                cache: HashMap::new(),
            }),
            factory,
        }
    }

    /// Look up an application, building its client on first use.
    ///
    /// Returns `Ok(None)` for ids that are not configured.
    pub fn get_application(&self, app_id: &str) -> Result<Option<Arc<Application>>> {
        if let Some(app) = self.state.read().cache.get(app_id) {
            return Ok(Some(Arc::clone(app)));
        }

        let mut state = self.state.write();
        if let Some(app) = state.cache.get(app_id) {
            return Ok(Some(Arc::clone(app)));
        }
        let Some(config) = state.configs.get(app_id).cloned() else {
            return Ok(None);
        };

        let client = self.factory.create(app_id, &config)?;
        let app = Arc::new(Application::new(app_id, config, client));
        state.cache.insert(app_id.to_string(), Arc::clone(&app));
        tracing::debug!(app_id, "Application client created");
        Ok(Some(app))
    }

    /// Whether an application id is configured.
    pub fn contains(&self, app_id: &str) -> bool {
        self.state.read().configs.contains_key(app_id)
    }

    /// Sorted list of configured application ids.
    pub fn app_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().configs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Replace the application table and drop every cached client.
    pub fn reload(&self, apps: HashMap<String, ApplicationConfig>) {
        let mut state = self.state.write();
        state.configs = apps;
        state.cache.clear();
        tracing::info!(apps = state.configs.len(), "Application registry reloaded");
    }

    /// Drop every cached client; they are rebuilt on next use.
    pub fn clear(&self) {
        self.state.write().cache.clear();
    }
}

impl std::fmt::Debug for ApplicationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ApplicationRegistry")
            .field("apps", &state.configs.len())
            .field("cached", &state.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClientFactory, mock_app_config};

    fn registry() -> (ApplicationRegistry, Arc<MockClientFactory>) {
        let factory = Arc::new(MockClientFactory::new());
        let mut apps = HashMap::new();
        apps.insert("portal".to_string(), mock_app_config(false));
        apps.insert("kiosk".to_string(), mock_app_config(true));
        (ApplicationRegistry::new(apps, factory.clone()), factory)
    }

    #[test]
    fn test_unknown_app() {
        let (registry, _) = registry();
        assert!(registry.get_application("nope").unwrap().is_none());
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn test_application_is_cached() {
        let (registry, factory) = registry();
        let first = registry.get_application("portal").unwrap().unwrap();
        let second = registry.get_application("portal").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created(), 1);
        assert_eq!(first.id(), "portal");
        assert!(first.anonymous_credentials().is_none());
    }

    #[test]
    fn test_reload_drops_cache() {
        let (registry, factory) = registry();
        let before = registry.get_application("kiosk").unwrap().unwrap();
        assert!(before.anonymous_credentials().is_some());

        let mut apps = HashMap::new();
        apps.insert("kiosk".to_string(), mock_app_config(false));
        registry.reload(apps);

        assert!(registry.get_application("portal").unwrap().is_none());
        let after = registry.get_application("kiosk").unwrap().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.anonymous_credentials().is_none());
        assert_eq!(factory.created(), 2);
        assert_eq!(registry.app_ids(), vec!["kiosk"]);
    }

    #[test]
    fn test_clear_rebuilds() {
        let (registry, factory) = registry();
        registry.get_application("portal").unwrap();
        registry.clear();
        registry.get_application("portal").unwrap();
        assert_eq!(factory.created(), 2);
    }
}
