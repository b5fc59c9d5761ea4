//! Core rotation engine
//!
//! The RotationEngine drives one rotation run over every configured domain:
//! - Resolving and opening the DNS provider each domain uses
//! - Retiring expired records through the RetentionSweeper
//! - Publishing the current key's TXT record unless it already exists
//! - Verifying the record propagated to the domain's DNS servers
//! - Recording newly published records in the ledger
//!
//! ## Architecture
//!
//! ```text
//!                     ┌────────────────┐
//!  DomainConfig ─────▶│ RotationEngine │────▶ RunOutcome
//!  KeyMaterial  ─────▶└────────────────┘      (failed domains gate
//!                              │                table rewriting)
//!         ┌────────────────────┼─────────────────────┐
//!         ▼                    ▼                     ▼
//! ┌───────────────┐   ┌───────────────┐   ┌─────────────────────┐
//! │ RecordLedger  │   │  DnsProvider  │   │ PropagationVerifier │
//! │ (sweep/append)│   │ (check/add/   │   │ (TXT lookups)       │
//! └───────────────┘   │  delete)      │   └─────────────────────┘
//!                     └───────────────┘
//! ```
//!
//! ## Domain Flow
//!
//! 1. Resolve the provider (or the override); not found, not creatable or
//!    not openable → failed
//! 2. Sweep expired ledger entries for the domain
//! 3. Build `<selector>._domainkey.<domain>` and the DKIM tag list
//! 4. `check`; an existing record skips `add`
//! 5. `add`; failure → failed
//! 6. Verify propagation; failure → failed
//! 7. Append a ledger entry when the key is new this run
//!
//! Domains run one after another. No error from one domain stops the others,
//! and every provider session that was opened is closed at the end.

use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{DomainConfig, EngineConfig, ProviderConfig};
use crate::error::{Error, Result};
use crate::keys::KeyMaterial;
use crate::record::{DkimRecord, record_name};
use crate::registry::ProviderRegistry;
use crate::state::{LedgerEntry, RecordLedger, SessionStore};
use crate::sweeper::RetentionSweeper;
use crate::traits::{DnsProvider, RecordRequest};
use crate::verify::PropagationVerifier;

/// Terminal state of one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainOutcome {
    Succeeded,
    Failed(String),
}

impl DomainOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, DomainOutcome::Failed(_))
    }
}

/// Result of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Domains whose table lines must not move to the new selector
    pub failed_domains: BTreeSet<String>,
    /// Outcome of every processed domain
    pub outcomes: BTreeMap<String, DomainOutcome>,
}

impl RunOutcome {
    fn record(&mut self, domain: &str, outcome: DomainOutcome) {
        match &outcome {
            DomainOutcome::Succeeded => info!("Update of {} succeeded", domain),
            DomainOutcome::Failed(reason) => {
                error!("Update of {} failed: {}", domain, reason);
                self.failed_domains.insert(domain.to_string());
            }
        }
        self.outcomes.insert(domain.to_string(), outcome);
    }

    pub fn is_failed(&self, domain: &str) -> bool {
        self.failed_domains.contains(domain)
    }
}

/// A provider resolved for this run
enum ProviderSlot {
    Ready(Box<dyn DnsProvider>),
    Unavailable(String),
}

/// Core rotation engine
///
/// ## Lifecycle
///
/// 1. Create with [`RotationEngine::new()`]
/// 2. Call [`RotationEngine::run()`] once per rotation
/// 3. Persist the ledger and session store afterwards
pub struct RotationEngine {
    registry: Arc<ProviderRegistry>,
    providers: BTreeMap<String, ProviderConfig>,
    verifier: PropagationVerifier,
    sweeper: RetentionSweeper,
    config: EngineConfig,
}

impl RotationEngine {
    /// Create a new rotation engine
    ///
    /// # Parameters
    ///
    /// - `registry`: Factories for every provider type that may be configured
    /// - `providers`: Provider definitions by name
    /// - `verifier`: Propagation checks for published records
    /// - `config`: Engine settings
    pub fn new(
        registry: Arc<ProviderRegistry>,
        providers: BTreeMap<String, ProviderConfig>,
        verifier: PropagationVerifier,
        config: EngineConfig,
    ) -> Self {
        let sweeper = RetentionSweeper::new(
            config.retention_days,
            Duration::from_secs(config.call_timeout_secs),
        );
        Self {
            registry,
            providers,
            verifier,
            sweeper,
            config,
        }
    }

    /// Run one rotation for `domains` dated today (UTC)
    pub async fn run(
        &self,
        domains: &[DomainConfig],
        keys: &BTreeMap<String, KeyMaterial>,
        ledger: &mut RecordLedger,
        sessions: &mut SessionStore,
    ) -> RunOutcome {
        self.run_on(domains, keys, ledger, sessions, Utc::now().date_naive())
            .await
    }

    /// Run one rotation as if it were `today`
    pub async fn run_on(
        &self,
        domains: &[DomainConfig],
        keys: &BTreeMap<String, KeyMaterial>,
        ledger: &mut RecordLedger,
        sessions: &mut SessionStore,
        today: NaiveDate,
    ) -> RunOutcome {
        info!("Updating DNS records for {} domain(s)", domains.len());

        let mut slots = self.resolve_providers(domains);
        let needs_providers = self.config.update_dns || self.config.cleanup;
        let opened = if needs_providers {
            self.open_sessions(&mut slots, sessions).await
        } else {
            Vec::new()
        };

        let mut outcome = RunOutcome::default();
        for domain in domains {
            let name = self.provider_name_for(domain);
            let result = match slots.get(name) {
                Some(ProviderSlot::Ready(provider)) => {
                    self.update_domain(domain, provider.as_ref(), keys, ledger, today)
                        .await
                }
                Some(ProviderSlot::Unavailable(reason)) => DomainOutcome::Failed(reason.clone()),
                None => DomainOutcome::Failed(format!("Configured DNS API {} not found", name)),
            };
            outcome.record(&domain.domain, result);
        }

        self.close_sessions(&slots, &opened, sessions).await;

        info!(
            "Run complete: {} succeeded, {} failed",
            outcome.outcomes.len() - outcome.failed_domains.len(),
            outcome.failed_domains.len()
        );
        outcome
    }

    fn provider_name_for<'a>(&self, domain: &'a DomainConfig) -> &'a str {
        match self.config.provider_override {
            Some(forced) => forced.provider_name(),
            None => domain.provider.as_str(),
        }
    }

    fn provider_config(&self, name: &str) -> Option<ProviderConfig> {
        match self.providers.get(name) {
            Some(config) => Some(config.clone()),
            None => match name {
                "null" => Some(ProviderConfig::Null),
                "fail" => Some(ProviderConfig::Fail {
                    operations: Vec::new(),
                }),
                _ => None,
            },
        }
    }

    /// Instantiate each provider used by at least one domain, once
    fn resolve_providers(&self, domains: &[DomainConfig]) -> BTreeMap<String, ProviderSlot> {
        let mut slots = BTreeMap::new();
        for domain in domains {
            let name = self.provider_name_for(domain);
            if slots.contains_key(name) {
                continue;
            }

            let slot = match self.provider_config(name) {
                None => {
                    error!("Configured DNS API {} of {} not found", name, domain.domain);
                    ProviderSlot::Unavailable(format!("Configured DNS API {} not found", name))
                }
                Some(config) => match self.registry.create_provider(&config) {
                    Ok(provider) => {
                        debug!("Created DNS API {} ({})", name, provider.provider_name());
                        ProviderSlot::Ready(provider)
                    }
                    Err(e) => {
                        error!("Failed to create DNS API {}: {}", name, e);
                        ProviderSlot::Unavailable(format!("DNS API {} unavailable: {}", name, e))
                    }
                },
            };
            slots.insert(name.to_string(), slot);
        }
        slots
    }

    /// Open every ready provider, retrying without delay
    ///
    /// # Returns
    ///
    /// Names of the providers whose session is open and must be closed.
    async fn open_sessions(
        &self,
        slots: &mut BTreeMap<String, ProviderSlot>,
        sessions: &SessionStore,
    ) -> Vec<String> {
        let mut opened = Vec::new();
        let attempts = self.config.session_open_attempts.max(1);

        for (name, slot) in slots.iter_mut() {
            let ProviderSlot::Ready(provider) = slot else {
                continue;
            };

            let mut last_error = None;
            for attempt in 1..=attempts {
                let persisted = sessions.get(name).cloned();
                match self
                    .call(format!("{} open", name), provider.open(persisted))
                    .await
                {
                    Ok(()) => {
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            "Opening DNS API {} failed (attempt {}/{}): {}",
                            name, attempt, attempts, e
                        );
                        last_error = Some(e);
                    }
                }
            }

            match last_error {
                None => opened.push(name.clone()),
                Some(e) => {
                    error!("Giving up on DNS API {} for this run", name);
                    *slot = ProviderSlot::Unavailable(format!(
                        "DNS API {} session could not be opened: {}",
                        name, e
                    ));
                }
            }
        }
        opened
    }

    /// Close every opened provider and keep what it hands back
    async fn close_sessions(
        &self,
        slots: &BTreeMap<String, ProviderSlot>,
        opened: &[String],
        sessions: &mut SessionStore,
    ) {
        for name in opened {
            let Some(ProviderSlot::Ready(provider)) = slots.get(name) else {
                continue;
            };
            match self.call(format!("{} close", name), provider.close()).await {
                Ok(data) => sessions.set(name, data),
                Err(e) => error!("Closing DNS API {} failed: {}", name, e),
            }
        }
    }

    /// Steps 2 to 7 for one domain with a ready provider
    async fn update_domain(
        &self,
        domain: &DomainConfig,
        provider: &dyn DnsProvider,
        keys: &BTreeMap<String, KeyMaterial>,
        ledger: &mut RecordLedger,
        today: NaiveDate,
    ) -> DomainOutcome {
        let key_name = domain.key_name();
        let key = keys.get(&key_name);

        if self.config.cleanup {
            let current = key.map(|key| key.selector.as_str());
            let report = self
                .sweeper
                .sweep(ledger, domain, current, provider, today)
                .await;
            debug!("Sweep of {}: {:?}", domain.domain, report);
        }

        let Some(key) = key else {
            return DomainOutcome::Failed(format!("No key material for key {}", key_name));
        };

        let missing = domain.parameters.missing(provider.required_parameters());
        if !missing.is_empty() {
            return DomainOutcome::Failed(format!(
                "DNS API {} requires domain parameter(s): {}",
                provider.provider_name(),
                missing.join(", ")
            ));
        }

        if !self.config.update_dns {
            return DomainOutcome::Succeeded;
        }

        match self.publish(domain, provider, key, ledger, today).await {
            Ok(()) => DomainOutcome::Succeeded,
            Err(e) => DomainOutcome::Failed(e.to_string()),
        }
    }

    async fn publish(
        &self,
        domain: &DomainConfig,
        provider: &dyn DnsProvider,
        key: &KeyMaterial,
        ledger: &mut RecordLedger,
        today: NaiveDate,
    ) -> Result<()> {
        let record = DkimRecord::new(&key.public_key);
        let request = RecordRequest {
            domain: domain.domain.clone(),
            selector: key.selector.clone(),
            name: record_name(&key.selector, &domain.domain),
            content: record.to_txt(),
            chunked_content: record.to_chunked_txt(&key.public_key_chunked),
        };

        let exists = self
            .call(
                format!("{} check {}", provider.provider_name(), request.name),
                provider.check(&domain.parameters, &request),
            )
            .await?;

        let published = if exists {
            info!("Record {} already exists, skipping add", request.name);
            None
        } else {
            info!(
                "Adding selector {} for {} with key {}",
                key.selector, domain.domain, key.key_name
            );
            let published = self
                .call(
                    format!("{} add {}", provider.provider_name(), request.name),
                    provider.add(&domain.parameters, &request),
                )
                .await?;
            Some(published)
        };

        if !self
            .verifier
            .verify(&request.name, record.tags(), &domain.dns_servers)
            .await
        {
            return Err(Error::lookup(format!(
                "Record {} is not available on its configured DNS servers",
                request.name
            )));
        }

        if key.new {
            let already_tracked = ledger
                .find(&domain.domain)
                .iter()
                .any(|(_, entry)| entry.selector == key.selector);
            if already_tracked {
                debug!("{}:{} is already in the ledger", domain.domain, key.selector);
            } else {
                let entry = match published {
                    Some(published) => LedgerEntry::from(published),
                    None => LedgerEntry::new(&domain.domain, &key.selector, today),
                };
                ledger.push(entry);
            }
        }

        Ok(())
    }

    /// Await `future`, bounded by the configured call timeout
    async fn call<T>(
        &self,
        operation: String,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let secs = self.config.call_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), future).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(operation, secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_outcome_tracks_failures() {
        let mut outcome = RunOutcome::default();
        outcome.record("example.com", DomainOutcome::Succeeded);
        outcome.record("example.org", DomainOutcome::Failed("add failed".to_string()));

        assert!(!outcome.is_failed("example.com"));
        assert!(outcome.is_failed("example.org"));
        assert_eq!(outcome.outcomes.len(), 2);
        assert!(outcome.outcomes["example.org"].is_failed());
    }
}
