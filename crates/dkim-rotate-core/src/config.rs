//! Configuration types for DKIM key rotation
//!
//! Three YAML files make up the configuration:
//!
//! - the main settings file (`/etc/opendkim-genkeys.yml`): paths and switches
//! - the domains file (`domains.yml`): one entry per mail domain
//! - the providers file (`dnsapi.yml`): named DNS provider definitions
//!
//! ```yaml
//! # domains.yml
//! example.com:
//!   key: rsakey
//!   provider: cloudflare
//!   parameters:
//!     zone_id: 023e105f4ecef8ad9ca31a8372d0c353
//!   dns_servers: [ns1.example.com]
//!
//! # dnsapi.yml
//! cloudflare:
//!   type: cloudflare
//!   api_token: "..."
//! ```
//!
//! Everything is loaded once at startup and passed to the engine by value.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::Error;
use crate::keys::make_key_name;
use crate::providers::FailOperation;
use crate::state::file;
use crate::traits::DomainParameters;

/// Main settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Signing daemon configuration directory
    pub opendkim_dir: PathBuf,

    /// Directory relative data file names are resolved against
    pub working_dir: Option<PathBuf>,

    /// Publish records through the configured providers
    pub update_dns: bool,

    /// Retire ledger entries older than `retention_days`
    #[serde(alias = "cleanup_files")]
    pub cleanup: bool,

    #[serde(alias = "domain_file_name")]
    pub domains_file: PathBuf,

    #[serde(alias = "dns_api_defs_filename")]
    pub providers_file: PathBuf,

    #[serde(alias = "dns_api_extra_data_file_name")]
    pub sessions_file: PathBuf,

    #[serde(alias = "dns_update_data_file_name")]
    pub ledger_file: PathBuf,

    /// Key table, relative to `opendkim_dir`
    pub key_table: PathBuf,

    /// Signing table, relative to `opendkim_dir`
    pub signing_table: PathBuf,

    /// Where private keys are created
    pub key_directory: PathBuf,

    /// Age in days after which a published record is deleted
    #[serde(alias = "day_difference")]
    pub retention_days: u32,

    /// Write `<file>.new` instead of replacing tables and the ledger
    pub store_in_new_files: bool,

    /// Do not write tables, ledger or session files
    pub no_write_file: bool,

    /// RSA modulus length for new keys
    pub key_bits: usize,

    #[serde(alias = "new_key_mode", deserialize_with = "deserialize_mode")]
    pub key_file_mode: u32,

    #[serde(alias = "key_table_mode", deserialize_with = "deserialize_mode")]
    pub table_file_mode: u32,

    /// Attempts at opening a provider session before giving up on it
    pub session_open_attempts: u32,

    /// Wall-clock limit for each provider call and DNS lookup
    pub call_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            opendkim_dir: PathBuf::from("/etc/opendkim"),
            working_dir: None,
            update_dns: true,
            cleanup: true,
            domains_file: PathBuf::from("domains.yml"),
            providers_file: PathBuf::from("dnsapi.yml"),
            sessions_file: PathBuf::from("dnsapi_extra.yml"),
            ledger_file: PathBuf::from("dns_update_data.yml"),
            key_table: PathBuf::from("key.table"),
            signing_table: PathBuf::from("signing.table"),
            key_directory: PathBuf::from("/etc/opendkim/keys"),
            retention_days: default_retention_days(),
            store_in_new_files: false,
            no_write_file: false,
            key_bits: default_key_bits(),
            key_file_mode: 0o400,
            table_file_mode: 0o400,
            session_open_attempts: default_session_open_attempts(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults
    ///
    /// A missing or unparsable file is not fatal: the defaults are used and a
    /// warning is logged.
    pub async fn load(path: &Path) -> Self {
        match file::load_yaml::<Option<Settings>>(path).await {
            Ok(Some(Some(settings))) => settings,
            Ok(_) => {
                tracing::warn!(
                    "Failed to load config from {}, resuming with defaults.",
                    path.display()
                );
                Self::default()
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load config from {}: {}. Resuming with defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), Error> {
        if self.retention_days == 0 {
            return Err(Error::config("retention_days must be > 0"));
        }
        if self.key_bits < 1024 {
            return Err(Error::config(format!(
                "key_bits must be at least 1024, got {}",
                self.key_bits
            )));
        }
        if self.session_open_attempts == 0 {
            return Err(Error::config("session_open_attempts must be > 0"));
        }
        if self.call_timeout_secs == 0 {
            return Err(Error::config("call_timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Resolve a data file name against `working_dir`
    pub fn data_path(&self, name: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) if name.is_relative() => dir.join(name),
            _ => name.to_path_buf(),
        }
    }

    pub fn key_table_path(&self) -> PathBuf {
        self.opendkim_dir.join(&self.key_table)
    }

    pub fn signing_table_path(&self) -> PathBuf {
        self.opendkim_dir.join(&self.signing_table)
    }

    /// Where the ledger is written, honoring `store_in_new_files`
    pub fn ledger_output_path(&self) -> PathBuf {
        let path = self.data_path(&self.ledger_file);
        if self.store_in_new_files {
            let mut name = path.into_os_string();
            name.push(".new");
            PathBuf::from(name)
        } else {
            path
        }
    }

    /// Engine settings derived from this file
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            update_dns: self.update_dns,
            cleanup: self.cleanup,
            retention_days: self.retention_days,
            session_open_attempts: self.session_open_attempts,
            call_timeout_secs: self.call_timeout_secs,
            provider_override: None,
        }
    }
}

// Modes may be written as integers (`256`) or octal strings ("0400", "0o400").
fn deserialize_mode<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Mode {
        Number(u32),
        Text(String),
    }

    match Mode::deserialize(deserializer)? {
        Mode::Number(mode) => Ok(mode),
        Mode::Text(text) => {
            let digits = text.trim().trim_start_matches("0o");
            u32::from_str_radix(digits, 8)
                .map_err(|_| serde::de::Error::custom(format!("invalid file mode '{}'", text)))
        }
    }
}

/// One mail domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Domain name, taken from the domains file key
    #[serde(skip)]
    pub domain: String,

    /// Key name; derived from the domain when absent
    #[serde(default)]
    pub key: Option<String>,

    /// Name of an entry in the providers file
    #[serde(default = "default_provider", alias = "api")]
    pub provider: String,

    /// Named parameters interpreted by the provider
    #[serde(default)]
    pub parameters: DomainParameters,

    /// Servers asked whether the record propagated
    #[serde(default)]
    pub dns_servers: Vec<String>,
}

impl DomainConfig {
    /// Create a domain using the `null` provider and a derived key name
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            key: None,
            provider: default_provider(),
            parameters: DomainParameters::new(),
            dns_servers: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_parameters(mut self, parameters: DomainParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_dns_servers(mut self, servers: Vec<String>) -> Self {
        self.dns_servers = servers;
        self
    }

    /// Key name this domain signs with
    pub fn key_name(&self) -> String {
        match &self.key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => make_key_name(&self.domain),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.domain.is_empty() {
            return Err(Error::config("Domain name cannot be empty"));
        }
        if self.provider.is_empty() {
            return Err(Error::config(format!(
                "Provider name of {} cannot be empty",
                self.domain
            )));
        }
        Ok(())
    }
}

/// Load the domains file
///
/// Unlike the other files this one is required: without it there is nothing
/// to rotate.
pub async fn load_domains(path: &Path) -> Result<Vec<DomainConfig>, Error> {
    let raw = file::load_yaml::<Option<BTreeMap<String, DomainConfig>>>(path)
        .await
        .map_err(|e| {
            Error::config(format!(
                "Failed to load domain configuration {}: {}",
                path.display(),
                e
            ))
        })?
        .ok_or_else(|| {
            Error::config(format!("Domain configuration {} not found", path.display()))
        })?
        .unwrap_or_default();

    if raw.is_empty() {
        return Err(Error::config("No domain definitions found"));
    }

    raw.into_iter()
        .map(|(domain, mut config)| {
            config.domain = domain;
            config.validate()?;
            Ok(config)
        })
        .collect()
}

/// Load the providers file
///
/// # Returns
///
/// - `Ok(Some(map))`: provider name to definition
/// - `Ok(None)`: the file does not exist; DNS updates cannot run
/// - `Err(Error)`: the file exists but is invalid
pub async fn load_providers(path: &Path) -> Result<Option<BTreeMap<String, ProviderConfig>>, Error> {
    let Some(loaded) = file::load_yaml::<Option<BTreeMap<String, ProviderConfig>>>(path)
        .await
        .map_err(|e| {
            Error::config(format!(
                "Incorrect file format in {}: {}",
                path.display(),
                e
            ))
        })?
    else {
        return Ok(None);
    };

    let providers = loaded.unwrap_or_default();
    for (name, provider) in &providers {
        provider
            .validate()
            .map_err(|e| Error::config(format!("Provider {}: {}", name, e)))?;
    }
    Ok(Some(providers))
}

/// DNS provider configuration
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Publishing is done by hand
    Null,

    /// Fails the listed operations (all when empty)
    Fail {
        #[serde(default)]
        operations: Vec<FailOperation>,
    },

    /// Cloudflare provider
    Cloudflare {
        /// Cloudflare API token with DNS edit permission
        api_token: String,
    },

    /// Provider registered by name from another crate
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        #[serde(default)]
        config: serde_json::Value,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            ProviderConfig::Cloudflare { api_token } => {
                if api_token.is_empty() {
                    return Err(Error::config("Cloudflare API token cannot be empty"));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(Error::config("Custom provider factory cannot be empty"));
                }
                Ok(())
            }
            ProviderConfig::Null | ProviderConfig::Fail { .. } => Ok(()),
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Null => "null",
            ProviderConfig::Fail { .. } => "fail",
            ProviderConfig::Cloudflare { .. } => "cloudflare",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

// Credentials stay out of logs
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::Null => f.write_str("Null"),
            ProviderConfig::Fail { operations } => f
                .debug_struct("Fail")
                .field("operations", operations)
                .finish(),
            ProviderConfig::Cloudflare { .. } => f
                .debug_struct("Cloudflare")
                .field("api_token", &"<redacted>")
                .finish(),
            ProviderConfig::Custom { factory, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .field("config", &"<redacted>")
                .finish(),
        }
    }
}

/// Replace every domain's provider for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOverride {
    Null,
    Fail,
}

impl ProviderOverride {
    pub fn provider_name(&self) -> &'static str {
        match self {
            ProviderOverride::Null => "null",
            ProviderOverride::Fail => "fail",
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Publish and verify records
    pub update_dns: bool,

    /// Retire old ledger entries
    pub cleanup: bool,

    /// Ledger entries created before `today - retention_days` are retired
    pub retention_days: u32,

    /// Attempts at `open` per provider, without delay between them
    pub session_open_attempts: u32,

    /// Limit for every external call, in seconds
    pub call_timeout_secs: u64,

    pub provider_override: Option<ProviderOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Settings::default().engine_config()
    }
}

fn default_provider() -> String {
    "null".to_string()
}

fn default_retention_days() -> u32 {
    70
}

fn default_key_bits() -> usize {
    2048
}

fn default_session_open_attempts() -> u32 {
    3
}

fn default_call_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_settings_accept_legacy_names() {
        let yaml = "\
opendkim_dir: /srv/opendkim
day_difference: 45
cleanup_files: false
dns_update_data_file_name: ledger.yml
new_key_mode: '0440'
key_table_mode: 384
";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.opendkim_dir, PathBuf::from("/srv/opendkim"));
        assert_eq!(settings.retention_days, 45);
        assert!(!settings.cleanup);
        assert_eq!(settings.ledger_file, PathBuf::from("ledger.yml"));
        assert_eq!(settings.key_file_mode, 0o440);
        assert_eq!(settings.table_file_mode, 0o600);
        // Untouched fields keep their defaults
        assert_eq!(settings.key_directory, PathBuf::from("/etc/opendkim/keys"));
        assert_eq!(settings.session_open_attempts, 3);
    }

    #[tokio::test]
    async fn test_missing_settings_use_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.yml")).await;
        assert_eq!(settings, Settings::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_paths() {
        let settings = Settings {
            working_dir: Some(PathBuf::from("/var/lib/dkim")),
            store_in_new_files: true,
            ..Settings::default()
        };
        assert_eq!(
            settings.data_path(Path::new("domains.yml")),
            PathBuf::from("/var/lib/dkim/domains.yml")
        );
        assert_eq!(
            settings.data_path(Path::new("/etc/domains.yml")),
            PathBuf::from("/etc/domains.yml")
        );
        assert_eq!(
            settings.ledger_output_path(),
            PathBuf::from("/var/lib/dkim/dns_update_data.yml.new")
        );
        assert_eq!(
            settings.key_table_path(),
            PathBuf::from("/etc/opendkim/key.table")
        );
    }

    #[test]
    fn test_invalid_settings() {
        let settings = Settings {
            retention_days: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_domains() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.yml");
        tokio::fs::write(
            &path,
            "\
example.com:
  key: rsakey
  api: cloudflare
  parameters:
    zone_id: abc
    ttl: 300
  dns_servers: [ns1.example.com, 192.0.2.1]
example.org: {}
",
        )
        .await
        .unwrap();

        let domains = load_domains(&path).await.unwrap();
        assert_eq!(domains.len(), 2);
        assert_eq!(domains[0].domain, "example.com");
        assert_eq!(domains[0].provider, "cloudflare");
        assert_eq!(domains[0].key_name(), "rsakey");
        assert_eq!(domains[0].parameters.get("ttl"), Some("300"));
        assert_eq!(domains[0].dns_servers.len(), 2);
        assert_eq!(domains[1].provider, "null");
        assert_eq!(domains[1].key_name(), "example-org");
    }

    #[tokio::test]
    async fn test_missing_or_empty_domains_abort() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.yml");
        assert!(load_domains(&path).await.is_err());

        tokio::fs::write(&path, "").await.unwrap();
        assert!(load_domains(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_load_providers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dnsapi.yml");
        assert_eq!(load_providers(&path).await.unwrap(), None);

        tokio::fs::write(
            &path,
            "\
cloudflare:
  type: cloudflare
  api_token: secret
fail:
  type: fail
  operations: [delete]
",
        )
        .await
        .unwrap();

        let providers = load_providers(&path).await.unwrap().unwrap();
        assert_eq!(providers["cloudflare"].type_name(), "cloudflare");
        assert_eq!(
            providers["fail"],
            ProviderConfig::Fail {
                operations: vec![FailOperation::Delete]
            }
        );
        assert!(!format!("{:?}", providers["cloudflare"]).contains("secret"));
    }

    #[tokio::test]
    async fn test_invalid_provider_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dnsapi.yml");
        tokio::fs::write(&path, "cloudflare:\n  type: cloudflare\n  api_token: ''\n")
            .await
            .unwrap();
        assert!(load_providers(&path).await.is_err());

        tokio::fs::write(&path, "cloudflare: [not, a, provider]\n")
            .await
            .unwrap();
        assert!(load_providers(&path).await.is_err());
    }
}
