// # Provider Sessions
//
// Values providers hand back from `close`, kept between runs and passed to
// the next `open` (login cookies, cached zone lookups, ...). Stored as one
// YAML mapping from provider name to an arbitrary value.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::Error;
use crate::state::file;

/// Persisted provider session data, keyed by provider name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStore {
    sessions: BTreeMap<String, Value>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load session data from `path`
    ///
    /// A missing or unreadable file yields an empty store; providers then start
    /// a fresh session.
    pub async fn load(path: &Path) -> Self {
        match file::load_yaml_with_recovery::<Option<BTreeMap<String, Value>>>(path).await {
            Ok(Some(Some(sessions))) => Self { sessions },
            Ok(_) => Self::new(),
            Err(e) => {
                tracing::warn!(
                    "Failed to read provider sessions {}: {}. Starting fresh sessions.",
                    path.display(),
                    e
                );
                Self::new()
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), Error> {
        file::save_yaml(path, &self.sessions).await
    }

    /// Session data previously stored for `provider`
    pub fn get(&self, provider: &str) -> Option<&Value> {
        self.sessions.get(provider)
    }

    /// Store what `provider` returned from `close`
    ///
    /// `None` clears any stored value.
    pub fn set(&mut self, provider: &str, data: Option<Value>) {
        match data {
            Some(value) => {
                self.sessions.insert(provider.to_string(), value);
            }
            None => {
                self.sessions.remove(provider);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
