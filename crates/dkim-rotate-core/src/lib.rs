// # dkim-rotate-core
//
// Core library for rotating DKIM keys and keeping their DNS records in step.
//
// ## Architecture Overview
//
// - **DnsProvider**: Trait every DNS backend implements (add / check / delete,
//   plus optional session open/close)
// - **ProviderRegistry**: Plugin-based registry mapping provider types to factories
// - **RotationEngine**: Per-domain orchestration of sweep → check → add → verify
// - **RecordLedger**: Records published by earlier runs, pending retirement
// - **RetentionSweeper**: Deletes records older than the retention window
// - **PropagationVerifier**: Confirms a record is served by the domain's DNS servers
// - **KeyStore** / **TableWriter**: Key files and the signing daemon's lookup tables
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Orchestration is separate from provider wire protocols
// 2. **Plugin-Based**: Providers are registered by name, no hard-coded if-else
// 3. **Library-First**: The binary only wires configuration to these types
// 4. **Partial Failure**: One domain or provider failing never stops the others

pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod providers;
pub mod record;
pub mod registry;
pub mod state;
pub mod sweeper;
pub mod tables;
pub mod traits;
pub mod verify;

// Re-export core types for convenience
pub use config::{DomainConfig, EngineConfig, ProviderConfig, ProviderOverride, Settings};
pub use engine::{DomainOutcome, RotationEngine, RunOutcome};
pub use error::{Error, Result};
pub use keys::{KeyMaterial, KeyStore};
pub use registry::ProviderRegistry;
pub use state::{LedgerEntry, RecordLedger, SessionStore};
pub use sweeper::RetentionSweeper;
pub use tables::{KeyTable, TableWriter};
pub use traits::{DeleteOutcome, DnsProvider, DomainParameters, TxtLookup};
pub use verify::{HickoryTxtLookup, PropagationVerifier};
