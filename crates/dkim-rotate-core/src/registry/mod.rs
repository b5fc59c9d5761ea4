//! Plugin-based provider registry
//!
//! DNS providers are registered by type name at startup, avoiding hardcoded
//! if-else chains and any lookup of provider code at run time.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dkim_rotate_core::registry::ProviderRegistry;
//! use dkim_rotate_core::config::ProviderConfig;
//!
//! // `null` and `fail` are always present
//! let registry = ProviderRegistry::with_builtin();
//!
//! // HTTP backends register themselves
//! dkim_rotate_provider_cloudflare::register(&registry);
//!
//! let config = ProviderConfig::Cloudflare { api_token: token };
//! let provider = registry.create_provider(&config)?;
//! ```

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::traits::{DnsProvider, DnsProviderFactory};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Provider registry for plugin-based DNS provider creation
///
/// The registry maps provider type names to factory objects, so providers can
/// be instantiated from configuration without the engine knowing them.
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Registered DNS provider factories
    providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in `null` and `fail` providers
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        crate::providers::register(&registry);
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Box<dyn DnsProviderFactory>>> {
        self.providers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Box<dyn DnsProviderFactory>>> {
        self.providers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a DNS provider factory
    ///
    /// # Parameters
    ///
    /// - `name`: Provider type name (e.g., "cloudflare", "route53")
    /// - `factory`: Factory object for creating provider instances
    ///
    /// Registering a name twice replaces the earlier factory.
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn DnsProviderFactory>) {
        self.write().insert(name.into(), factory);
    }

    /// Create a DNS provider from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn DnsProvider>)`: Created provider instance
    /// - `Err(Error)`: If the provider type is not registered or creation fails
    pub fn create_provider(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        let provider_type = config.type_name();
        let providers = self.read();

        let factory = providers
            .get(provider_type)
            .ok_or_else(|| Error::config(format!("Unknown provider type: {}", provider_type)))?;

        factory.create(config)
    }

    /// List all registered provider types
    pub fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockProviderFactory;

    impl DnsProviderFactory for MockProviderFactory {
        fn create(&self, _config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
            Err(Error::not_found("Mock provider not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ProviderRegistry::new();

        assert!(!registry.has_provider("mock"));

        registry.register_provider("mock", Box::new(MockProviderFactory));

        assert!(registry.has_provider("mock"));
        assert!(registry.list_providers().contains(&"mock".to_string()));
    }

    #[test]
    fn test_builtin_providers() {
        let registry = ProviderRegistry::with_builtin();
        assert_eq!(registry.list_providers(), vec!["fail", "null"]);

        let provider = registry.create_provider(&ProviderConfig::Null).unwrap();
        assert_eq!(provider.provider_name(), "null");
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let registry = ProviderRegistry::with_builtin();
        let result = registry.create_provider(&ProviderConfig::Cloudflare {
            api_token: "token".to_string(),
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
