//! Core traits for DKIM key rotation
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DnsProvider`]: Publish, check and delete DKIM TXT records via provider APIs
//! - [`TxtLookup`]: Query a specific name server for TXT records

pub mod dns_provider;
pub mod txt_lookup;

pub use dns_provider::{
    DeleteOutcome, DnsProvider, DnsProviderFactory, DomainParameters, PublishedRecord,
    RecordRequest,
};
pub use txt_lookup::TxtLookup;
