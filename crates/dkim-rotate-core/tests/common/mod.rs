//! Test doubles and common utilities for rotation contract tests
//!
//! The mock provider counts every call and shares its counters with the
//! instances the registry creates, so tests can observe what the engine did
//! through a provider they never hold directly.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use dkim_rotate_core::config::{DomainConfig, EngineConfig, ProviderConfig};
use dkim_rotate_core::error::{Error, Result};
use dkim_rotate_core::keys::{KeyMaterial, chunk_public_key};
use dkim_rotate_core::record::DkimRecord;
use dkim_rotate_core::registry::ProviderRegistry;
use dkim_rotate_core::state::LedgerEntry;
use dkim_rotate_core::traits::{
    DeleteOutcome, DnsProvider, DnsProviderFactory, DomainParameters, PublishedRecord,
    RecordRequest, TxtLookup,
};
use dkim_rotate_core::{PropagationVerifier, RotationEngine};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MOCK: &str = "mock";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// How the mock provider answers
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Value returned by `check`
    pub record_exists: bool,
    /// `add` returns an error
    pub add_fails: bool,
    /// `add` never completes
    pub add_hangs: bool,
    /// `delete` outcome per selector; `default_delete` otherwise
    pub delete_outcomes: HashMap<String, DeleteOutcome>,
    pub default_delete: DeleteOutcome,
    /// Number of `open` calls that fail before one succeeds
    pub open_failures: usize,
    /// Domain parameters the provider declares as required
    pub required: &'static [&'static str],
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            record_exists: false,
            add_fails: false,
            add_hangs: false,
            delete_outcomes: HashMap::new(),
            default_delete: DeleteOutcome::Succeeded,
            open_failures: 0,
            required: &[],
        }
    }
}

#[derive(Default)]
struct Counters {
    open: AtomicUsize,
    close: AtomicUsize,
    check: AtomicUsize,
    add: AtomicUsize,
    delete: AtomicUsize,
}

/// A mock DnsProvider that tracks calls
pub struct MockDnsProvider {
    behavior: MockBehavior,
    counters: Arc<Counters>,
    /// Record names passed to add()
    added: Arc<Mutex<Vec<String>>>,
    /// Selectors passed to delete()
    deleted: Arc<Mutex<Vec<String>>>,
    /// Session value handed to the last open()
    opened_with: Arc<Mutex<Option<serde_json::Value>>>,
}

impl MockDnsProvider {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            counters: Arc::new(Counters::default()),
            added: Arc::new(Mutex::new(Vec::new())),
            deleted: Arc::new(Mutex::new(Vec::new())),
            opened_with: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a new MockDnsProvider that shares counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            behavior: other.behavior.clone(),
            counters: Arc::clone(&other.counters),
            added: Arc::clone(&other.added),
            deleted: Arc::clone(&other.deleted),
            opened_with: Arc::clone(&other.opened_with),
        }
    }

    pub fn open_count(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.counters.close.load(Ordering::SeqCst)
    }

    pub fn check_count(&self) -> usize {
        self.counters.check.load(Ordering::SeqCst)
    }

    pub fn add_count(&self) -> usize {
        self.counters.add.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.counters.delete.load(Ordering::SeqCst)
    }

    pub fn added_records(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }

    pub fn deleted_selectors(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn opened_with(&self) -> Option<serde_json::Value> {
        self.opened_with.lock().unwrap().clone()
    }
}

#[async_trait]
impl DnsProvider for MockDnsProvider {
    fn provider_name(&self) -> &'static str {
        MOCK
    }

    fn required_parameters(&self) -> &'static [&'static str] {
        self.behavior.required
    }

    async fn open(&self, persisted: Option<serde_json::Value>) -> Result<()> {
        let attempt = self.counters.open.fetch_add(1, Ordering::SeqCst);
        *self.opened_with.lock().unwrap() = persisted;
        if attempt < self.behavior.open_failures {
            return Err(Error::auth("login rejected"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<Option<serde_json::Value>> {
        let count = self.counters.close.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(serde_json::json!({ "closed": count })))
    }

    async fn add(&self, _params: &DomainParameters, request: &RecordRequest) -> Result<PublishedRecord> {
        self.counters.add.fetch_add(1, Ordering::SeqCst);
        self.added.lock().unwrap().push(request.name.clone());

        if self.behavior.add_hangs {
            std::future::pending::<()>().await;
        }
        if self.behavior.add_fails {
            return Err(Error::http("HTTP 500"));
        }
        Ok(PublishedRecord::now(request)
            .with_continuation(serde_json::json!({ "record_id": format!("id-{}", request.domain) })))
    }

    async fn check(&self, _params: &DomainParameters, _request: &RecordRequest) -> Result<bool> {
        self.counters.check.fetch_add(1, Ordering::SeqCst);
        Ok(self.behavior.record_exists)
    }

    async fn delete(&self, _params: &DomainParameters, entry: &LedgerEntry) -> DeleteOutcome {
        self.counters.delete.fetch_add(1, Ordering::SeqCst);
        self.deleted.lock().unwrap().push(entry.selector.clone());
        self.behavior
            .delete_outcomes
            .get(&entry.selector)
            .copied()
            .unwrap_or(self.behavior.default_delete)
    }
}

/// Hands out providers sharing the prototype's counters
pub struct MockProviderFactory {
    prototype: MockDnsProvider,
}

impl MockProviderFactory {
    pub fn new(prototype: &MockDnsProvider) -> Self {
        Self {
            prototype: MockDnsProvider::sharing_counters_with(prototype),
        }
    }
}

impl DnsProviderFactory for MockProviderFactory {
    fn create(&self, _config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        Ok(Box::new(MockDnsProvider::sharing_counters_with(&self.prototype)))
    }
}

/// TXT lookup answering from a fixed table of server → answers
#[derive(Default)]
pub struct ScriptedLookup {
    answers: HashMap<String, std::result::Result<Vec<String>, String>>,
    calls: AtomicUsize,
}

impl ScriptedLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// `server` serves exactly `content`
    pub fn serving(mut self, server: &str, content: &str) -> Self {
        self.answers
            .insert(server.to_string(), Ok(vec![content.to_string()]));
        self
    }

    /// `server` serves every record in `contents`
    pub fn serving_all(mut self, server: &str, contents: &[&str]) -> Self {
        self.answers.insert(
            server.to_string(),
            Ok(contents.iter().map(|c| c.to_string()).collect()),
        );
        self
    }

    /// `server` cannot be reached
    pub fn unreachable(mut self, server: &str) -> Self {
        self.answers
            .insert(server.to_string(), Err("connection refused".to_string()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxtLookup for ScriptedLookup {
    async fn lookup_txt(&self, server: &str, _name: &str) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answers.get(server) {
            Some(Ok(answers)) => Ok(answers.clone()),
            Some(Err(message)) => Err(Error::lookup(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

/// Engine settings for tests: short timeouts, everything enabled
pub fn test_config() -> EngineConfig {
    EngineConfig {
        call_timeout_secs: 1,
        ..EngineConfig::default()
    }
}

/// Build an engine where provider name `mock` resolves to `mock`
pub fn engine_with(
    mock: &MockDnsProvider,
    lookup: Arc<ScriptedLookup>,
    config: EngineConfig,
) -> RotationEngine {
    let registry = ProviderRegistry::with_builtin();
    registry.register_provider(MOCK, Box::new(MockProviderFactory::new(mock)));

    let providers = BTreeMap::from([(
        MOCK.to_string(),
        ProviderConfig::Custom {
            factory: MOCK.to_string(),
            config: serde_json::Value::Null,
        },
    )]);

    RotationEngine::new(
        Arc::new(registry),
        providers,
        PropagationVerifier::new(lookup, Duration::from_secs(1)),
        config,
    )
}

/// Key material without touching the filesystem
pub fn key_material(key: &str, selector: &str, new: bool) -> KeyMaterial {
    let public_key = format!("PUBKEY{}", key.to_uppercase());
    KeyMaterial {
        key_name: key.to_string(),
        selector: selector.to_string(),
        new,
        public_key_chunked: chunk_public_key(&public_key),
        public_key,
        private_key_path: PathBuf::from(format!("/etc/opendkim/keys/{}.{}.key", key, selector)),
    }
}

pub fn keys(materials: Vec<KeyMaterial>) -> BTreeMap<String, KeyMaterial> {
    materials
        .into_iter()
        .map(|material| (material.key_name.clone(), material))
        .collect()
}

/// TXT content a correct server returns for `material`
pub fn published_content(material: &KeyMaterial) -> String {
    DkimRecord::new(&material.public_key).to_txt()
}

pub fn mock_domain(domain: &str, key: &str) -> DomainConfig {
    DomainConfig::new(domain).with_key(key).with_provider(MOCK)
}
