// # Lookup Tables
//
// The signing daemon reads two line-oriented tables:
//
// ```text
// key.table:      rsakey<TAB>example.com:202401:/etc/opendkim/keys/rsakey.202401.key
// signing.table:  *@example.com<TAB>rsakey
// ```
//
// Both are rewritten in full on every run. Domains whose DNS update failed keep
// the key-table line from the previous run so the daemon keeps signing with a
// key that is actually published.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::Error;
use crate::config::DomainConfig;
use crate::keys::KeyMaterial;
use crate::state::file;

/// One parsed key-table line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTableEntry {
    pub key_name: String,
    pub domain: String,
    pub selector: String,
    pub key_path: String,
    /// The line as it appeared in the file
    pub line: String,
}

impl KeyTableEntry {
    /// Parse `<key>\t<domain>:<selector>:<path>`
    pub fn parse(line: &str) -> Option<Self> {
        let (key_name, value) = line.split_once(char::is_whitespace)?;
        let mut fields = value.trim().splitn(3, ':');
        let domain = fields.next()?;
        let selector = fields.next()?;
        let key_path = fields.next()?;

        if key_name.is_empty() || domain.is_empty() || selector.is_empty() || key_path.is_empty() {
            return None;
        }

        Some(Self {
            key_name: key_name.to_string(),
            domain: domain.to_string(),
            selector: selector.to_string(),
            key_path: key_path.to_string(),
            line: line.to_string(),
        })
    }
}

/// Key table from a previous run, indexed by domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTable {
    entries: BTreeMap<String, KeyTableEntry>,
    malformed: usize,
}

impl KeyTable {
    /// Read a key table; a missing file is an empty table
    pub async fn read(path: &Path) -> Result<Self, Error> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No previous key table at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::table(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        Ok(Self::parse(&content))
    }

    /// Parse key-table text, discarding malformed lines
    pub fn parse(content: &str) -> Self {
        let mut entries = BTreeMap::new();
        let mut malformed = 0;
        for (number, line) in content.lines().enumerate() {
            let line = line.trim_end();
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            match KeyTableEntry::parse(line) {
                Some(entry) => {
                    entries.insert(entry.domain.clone(), entry);
                }
                None => {
                    tracing::warn!("Discarding malformed key table line {}: {}", number + 1, line);
                    malformed += 1;
                }
            }
        }
        Self { entries, malformed }
    }

    /// Number of lines that could not be parsed
    ///
    /// Rewriting a table with malformed lines would silently drop them, so
    /// callers skip the rewrite when this is non-zero.
    pub fn malformed_lines(&self) -> usize {
        self.malformed
    }

    pub fn get(&self, domain: &str) -> Option<&KeyTableEntry> {
        self.entries.get(domain)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rendered table contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    pub key_table: String,
    pub signing_table: String,
}

/// Writes the key and signing tables
#[derive(Debug, Clone)]
pub struct TableWriter {
    key_table_path: PathBuf,
    signing_table_path: PathBuf,
    key_directory: PathBuf,
    store_in_new_files: bool,
    file_mode: u32,
}

impl TableWriter {
    pub fn new(
        key_table_path: impl Into<PathBuf>,
        signing_table_path: impl Into<PathBuf>,
        key_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key_table_path: key_table_path.into(),
            signing_table_path: signing_table_path.into(),
            key_directory: key_directory.into(),
            store_in_new_files: false,
            file_mode: 0o400,
        }
    }

    /// Write to `<table>.new` instead of replacing the live tables
    pub fn with_new_files(mut self, store_in_new_files: bool) -> Self {
        self.store_in_new_files = store_in_new_files;
        self
    }

    pub fn with_file_mode(mut self, file_mode: u32) -> Self {
        self.file_mode = file_mode;
        self
    }

    /// Paths the tables are written to, honoring the `.new` option
    pub fn output_paths(&self) -> (PathBuf, PathBuf) {
        if self.store_in_new_files {
            (
                with_new_suffix(&self.key_table_path),
                with_new_suffix(&self.signing_table_path),
            )
        } else {
            (self.key_table_path.clone(), self.signing_table_path.clone())
        }
    }

    /// Render both tables for `domains`
    ///
    /// Failed domains with a line in `prior` keep it verbatim. Failed domains
    /// without one are left out: there is no published key to point at.
    pub fn render(
        &self,
        domains: &[DomainConfig],
        keys: &BTreeMap<String, KeyMaterial>,
        prior: &KeyTable,
        failed: &BTreeSet<String>,
    ) -> Tables {
        let mut tables = Tables::default();

        for domain in domains {
            let name = domain.domain.as_str();

            if failed.contains(name) {
                match prior.get(name) {
                    Some(entry) => {
                        tracing::info!("Preserving table entries for {}", name);
                        push_line(&mut tables.key_table, &entry.line);
                        push_line(
                            &mut tables.signing_table,
                            &format!("*@{}\t{}", name, entry.key_name),
                        );
                    }
                    None => {
                        tracing::warn!("No previous table entries for failed domain {}", name)
                    }
                }
                continue;
            }

            let key_name = domain.key_name();
            let Some(material) = keys.get(&key_name) else {
                tracing::warn!("No key material for {} (key {})", name, key_name);
                continue;
            };

            tracing::debug!("Adding table entries for {}", name);
            let key_path = self.key_directory.join(crate::keys::key_file_name(
                &material.key_name,
                &material.selector,
            ));
            push_line(
                &mut tables.key_table,
                &format!(
                    "{}\t{}:{}:{}",
                    key_name,
                    name,
                    material.selector,
                    key_path.display()
                ),
            );
            push_line(
                &mut tables.signing_table,
                &format!("*@{}\t{}", name, key_name),
            );
        }

        tables
    }

    /// Render and atomically write both tables
    pub async fn write(
        &self,
        domains: &[DomainConfig],
        keys: &BTreeMap<String, KeyMaterial>,
        prior: &KeyTable,
        failed: &BTreeSet<String>,
    ) -> Result<(), Error> {
        let tables = self.render(domains, keys, prior, failed);
        let (key_path, signing_path) = self.output_paths();

        file::write_atomic(&key_path, tables.key_table.as_bytes(), Some(self.file_mode))
            .await
            .map_err(|e| Error::table(format!("Failed to write {}: {}", key_path.display(), e)))?;
        file::write_atomic(&signing_path, tables.signing_table.as_bytes(), Some(self.file_mode))
            .await
            .map_err(|e| {
                Error::table(format!("Failed to write {}: {}", signing_path.display(), e))
            })?;

        tracing::info!(
            "Wrote {} and {}",
            key_path.display(),
            signing_path.display()
        );
        Ok(())
    }
}

fn push_line(buffer: &mut String, line: &str) {
    buffer.push_str(line);
    buffer.push('\n');
}

fn with_new_suffix(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".new");
    PathBuf::from(name)
}
