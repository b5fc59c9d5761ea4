// # Key Material
//
// Creates or loads the RSA key pair each key name signs with for the current
// selector, and derives the public key forms published in DNS.
//
// ## Files
//
// Private keys live in the key directory as `<key>.<selector>.key`, PKCS#1
// PEM. A key file that already exists is reused as-is; otherwise a new key
// is generated and written with restrictive permissions.

use base64ct::{Base64, Encoding};
use chrono::{Datelike, NaiveDate};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::Error;
use crate::config::DomainConfig;
use crate::state::file;

/// Longest character-string allowed in a single TXT segment
pub const TXT_SEGMENT_LEN: usize = 255;

/// Selector for the rotation period containing `today`
///
/// Selectors are `YYYYMM` of the first day of the current month, or of the
/// next month when `next_month` is set (December rolls over to January).
pub fn generate_selector(today: NaiveDate, next_month: bool) -> String {
    let (mut year, mut month) = (today.year(), today.month());
    if next_month {
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    format!("{:04}{:02}", year, month)
}

/// Key name used for a domain without an explicit one
pub fn make_key_name(domain: &str) -> String {
    domain.replace('.', "-")
}

/// File name of the private key for `key` under `selector`
pub fn key_file_name(key: &str, selector: &str) -> String {
    format!("{}.{}.key", key, selector)
}

/// Split a base64 key into quoted TXT segments separated by spaces
pub fn chunk_public_key(public_key: &str) -> String {
    public_key
        .as_bytes()
        .chunks(TXT_SEGMENT_LEN)
        .map(|segment| format!("\"{}\"", String::from_utf8_lossy(segment)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Key pair state for one key name in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Key name shared by every domain signing with this key
    pub key_name: String,
    /// Selector the key was created for
    pub selector: String,
    /// Whether the key was generated during this run
    pub new: bool,
    /// Base64 SubjectPublicKeyInfo DER
    pub public_key: String,
    /// `public_key` as quoted segments of at most 255 bytes
    pub public_key_chunked: String,
    /// Location of the private key
    pub private_key_path: PathBuf,
}

/// Creates and loads private keys in one key directory
#[derive(Debug, Clone)]
pub struct KeyStore {
    key_directory: PathBuf,
    bits: usize,
    file_mode: u32,
}

impl KeyStore {
    pub fn new(key_directory: impl Into<PathBuf>, bits: usize, file_mode: u32) -> Self {
        Self {
            key_directory: key_directory.into(),
            bits,
            file_mode,
        }
    }

    pub fn key_directory(&self) -> &Path {
        &self.key_directory
    }

    /// Path of the private key for `key_name` under `selector`
    pub fn key_path(&self, key_name: &str, selector: &str) -> PathBuf {
        self.key_directory.join(key_file_name(key_name, selector))
    }

    /// Load the key for `key_name`/`selector`, generating it if absent
    pub async fn ensure(&self, key_name: &str, selector: &str) -> Result<KeyMaterial, Error> {
        let path = self.key_path(key_name, selector);

        let (private_key, new) = if path.exists() {
            tracing::debug!("Using existing key {}", path.display());
            (read_private_key(&path).await?, false)
        } else {
            tracing::info!(
                "Generating {}-bit key {} for selector {}",
                self.bits,
                key_name,
                selector
            );
            let private_key = generate_private_key(self.bits).await?;
            let pem = private_key
                .to_pkcs1_pem(LineEnding::LF)
                .map_err(|e| Error::key(format!("Failed to encode key {}: {}", key_name, e)))?;
            file::write_atomic(&path, pem.as_bytes(), Some(self.file_mode)).await?;
            (private_key, true)
        };

        let public_key = encode_public_key(&private_key)?;
        Ok(KeyMaterial {
            key_name: key_name.to_string(),
            selector: selector.to_string(),
            new,
            public_key_chunked: chunk_public_key(&public_key),
            public_key,
            private_key_path: path,
        })
    }

    /// One [`KeyMaterial`] per distinct key name used by `domains`
    ///
    /// Any key that cannot be produced aborts the whole run.
    pub async fn ensure_all(
        &self,
        domains: &[DomainConfig],
        selector: &str,
    ) -> Result<BTreeMap<String, KeyMaterial>, Error> {
        let mut keys = BTreeMap::new();
        for domain in domains {
            let key_name = domain.key_name();
            if keys.contains_key(&key_name) {
                continue;
            }
            let material = self.ensure(&key_name, selector).await?;
            keys.insert(key_name, material);
        }
        Ok(keys)
    }
}

async fn generate_private_key(bits: usize) -> Result<RsaPrivateKey, Error> {
    tokio::task::spawn_blocking(move || RsaPrivateKey::new(&mut rand::thread_rng(), bits))
        .await
        .map_err(|e| Error::key(format!("Key generation task failed: {}", e)))?
        .map_err(|e| Error::key(format!("Failed to generate {}-bit key: {}", bits, e)))
}

async fn read_private_key(path: &Path) -> Result<RsaPrivateKey, Error> {
    let pem = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::key(format!("Failed to read {}: {}", path.display(), e)))?;

    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| Error::key(format!("Failed to parse {}: {}", path.display(), e)))
}

fn encode_public_key(private_key: &RsaPrivateKey) -> Result<String, Error> {
    let der = RsaPublicKey::from(private_key)
        .to_public_key_der()
        .map_err(|e| Error::key(format!("Failed to encode public key: {}", e)))?;
    Ok(Base64::encode_string(der.as_bytes()))
}
