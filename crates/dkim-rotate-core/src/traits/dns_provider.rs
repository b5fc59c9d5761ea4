// # DNS Provider Trait
//
// Defines the interface every DNS backend implements to publish DKIM TXT
// records, report whether a record already exists, and retire old records.
//
// ## Implementations
//
// - `null` and `fail`: built into this crate (see `providers`)
// - Cloudflare: `dkim-rotate-provider-cloudflare` crate
// - Future: Route53, Linode, FreeDNS, etc.
//
// ## Usage
//
// ```rust,ignore
// use dkim_rotate_core::traits::{DnsProvider, DomainParameters, RecordRequest};
//
// #[tokio::main]
// async fn main() -> dkim_rotate_core::Result<()> {
//     let provider = /* DnsProvider implementation */;
//     let params = DomainParameters::new().with("zone_id", "abc123");
//
//     if !provider.check(&params, &request).await? {
//         let published = provider.add(&params, &request).await?;
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::state::LedgerEntry;

/// A DKIM TXT record the engine wants published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRequest {
    /// Mail domain the record belongs to
    pub domain: String,
    /// Rotation selector
    pub selector: String,
    /// Full record name (`<selector>._domainkey.<domain>`)
    pub name: String,
    /// TXT value as one unquoted string
    pub content: String,
    /// TXT value split into quoted segments of at most 255 bytes
    pub chunked_content: String,
}

/// Result of a successful `add`
///
/// Carries everything the ledger needs to track the record until it expires.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRecord {
    /// Mail domain
    pub domain: String,
    /// Rotation selector
    pub selector: String,
    /// When the provider accepted the record
    pub created_at: DateTime<Utc>,
    /// Provider-defined data needed to delete the record later (e.g. a record ID)
    pub continuation_data: Option<serde_json::Value>,
}

impl PublishedRecord {
    /// Build a result for `request` created now, without continuation data
    pub fn now(request: &RecordRequest) -> Self {
        Self {
            domain: request.domain.clone(),
            selector: request.selector.clone(),
            created_at: Utc::now(),
            continuation_data: None,
        }
    }

    /// Attach provider continuation data
    pub fn with_continuation(mut self, data: serde_json::Value) -> Self {
        self.continuation_data = Some(data);
        self
    }
}

/// Result of a `delete` call
///
/// `Unsupported` is not a failure: the ledger drops the entry because there is
/// nothing the provider could clean up later. `Failed` keeps the entry for a
/// retry on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The provider has no delete capability
    Unsupported,
    /// Deletion was attempted and failed
    Failed,
    /// The record was deleted
    Succeeded,
}

/// Named, per-domain provider parameters (zone ID, TTL, ...)
///
/// The engine never interprets the values. Providers declare which names they
/// require via [`DnsProvider::required_parameters`] and the engine checks they
/// are present before calling the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DomainParameters(BTreeMap<String, String>);

// YAML users write `ttl: 300`; keep every value as text.
impl<'de> Deserialize<'de> for DomainParameters {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Scalar {
            Text(String),
            Integer(i64),
            Float(f64),
            Flag(bool),
        }

        let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
        Ok(Self(
            raw.into_iter()
                .map(|(name, value)| {
                    let value = match value {
                        Scalar::Text(text) => text,
                        Scalar::Integer(n) => n.to_string(),
                        Scalar::Float(n) => n.to_string(),
                        Scalar::Flag(b) => b.to_string(),
                    };
                    (name, value)
                })
                .collect(),
        ))
    }
}

impl DomainParameters {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Get a parameter value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Get a parameter value or fail with a configuration error naming the provider
    pub fn require(&self, provider: &str, name: &str) -> Result<&str, crate::Error> {
        self.get(name)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                crate::Error::config(format!(
                    "DNS API {}: domain parameter '{}' is required",
                    provider, name
                ))
            })
    }

    /// Names from `required` that are absent or empty
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|name| self.get(name).is_none_or(str::is_empty))
            .collect()
    }

    /// Whether no parameters are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Trait for DNS provider implementations
///
/// A backend needs only `add`; `check`, `delete` and the session hooks have
/// defaults describing a provider without those capabilities.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. The engine calls them sequentially,
/// one domain at a time, so session state behind a mutex is never contended.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their endpoints only
/// - ✅ Keep a login session between `open` and `close`
/// - ✅ Parse provider-specific responses
///
/// ## Forbidden Capabilities
/// - ❌ Spawn tasks or threads
/// - ❌ Implement retry logic or backoff (owned by `RotationEngine`)
/// - ❌ Touch the record ledger (owned by `RotationEngine`)
/// - ❌ Decide whether a record should be published (owned by `RotationEngine`)
/// - ❌ Log credentials
///
/// ## Failure Reporting
///
/// `add` and `check` return `Err` for missing credentials, missing record
/// fields, transport errors and malformed API responses. They must never
/// panic. `delete` reports through [`DeleteOutcome`] and logs the cause.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Provider type name used in logs (e.g. "cloudflare")
    fn provider_name(&self) -> &'static str;

    /// Domain parameter names this provider cannot work without
    fn required_parameters(&self) -> &'static [&'static str] {
        &[]
    }

    /// Start a session for the whole run
    ///
    /// `persisted` is whatever `close` returned at the end of the previous run.
    async fn open(&self, _persisted: Option<serde_json::Value>) -> Result<(), crate::Error> {
        Ok(())
    }

    /// End the session
    ///
    /// Called once after all domains were processed, whether or not they
    /// succeeded. The returned value is persisted and handed to the next `open`.
    async fn close(&self) -> Result<Option<serde_json::Value>, crate::Error> {
        Ok(None)
    }

    /// Publish a new TXT record
    ///
    /// # Returns
    ///
    /// - `Ok(PublishedRecord)`: the record was accepted
    /// - `Err(Error)`: the record was not published
    async fn add(
        &self,
        params: &DomainParameters,
        request: &RecordRequest,
    ) -> Result<PublishedRecord, crate::Error>;

    /// Whether a record matching `request` already exists at the provider
    ///
    /// Providers that cannot check cheaply keep the default, which reports
    /// `false` and causes one extra, harmless publish.
    async fn check(
        &self,
        _params: &DomainParameters,
        _request: &RecordRequest,
    ) -> Result<bool, crate::Error> {
        Ok(false)
    }

    /// Delete a previously published record
    async fn delete(&self, _params: &DomainParameters, _entry: &LedgerEntry) -> DeleteOutcome {
        DeleteOutcome::Unsupported
    }
}

/// Helper trait for constructing DNS providers from configuration
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this provider
    ///
    /// # Returns
    ///
    /// A boxed DnsProvider trait object
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn DnsProvider>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameters() {
        let params = DomainParameters::new()
            .with("zone_id", "abc")
            .with("ttl", "");

        assert_eq!(params.missing(&["zone_id"]), Vec::<&str>::new());
        assert_eq!(params.missing(&["zone_id", "ttl", "region"]), vec!["ttl", "region"]);
    }

    #[test]
    fn test_require_names_provider() {
        let params = DomainParameters::new();
        let err = params.require("linode", "domain_id").unwrap_err();
        assert!(err.to_string().contains("linode"));
        assert!(err.to_string().contains("domain_id"));
    }

    #[test]
    fn test_parameters_deserialize_from_map() {
        let params: DomainParameters =
            serde_yaml::from_str("zone_id: abc\nttl: 300\n").unwrap();
        assert_eq!(params.get("zone_id"), Some("abc"));
        assert_eq!(params.get("ttl"), Some("300"));
    }
}
