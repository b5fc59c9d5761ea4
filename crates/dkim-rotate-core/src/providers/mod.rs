//! Built-in DNS providers
//!
//! HTTP backends live in their own crates and register themselves with the
//! [`ProviderRegistry`](crate::registry::ProviderRegistry); the two providers
//! here need no network access and are always available.

pub mod fail;
pub mod null;

pub use fail::{FailOperation, FailProvider, FailProviderFactory};
pub use null::{NullProvider, NullProviderFactory};

use crate::registry::ProviderRegistry;

/// Register `null` and `fail`
pub fn register(registry: &ProviderRegistry) {
    registry.register_provider("null", Box::new(NullProviderFactory));
    registry.register_provider("fail", Box::new(FailProviderFactory));
}
