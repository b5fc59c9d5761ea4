// # TXT Lookup Trait
//
// Abstracts the DNS query used by propagation checks so the verifier can be
// driven by a real resolver in production and by scripted answers in tests.
//
// ## Implementations
//
// - `HickoryTxtLookup`: one resolver per configured name server
// - Test doubles in `tests/common`

use async_trait::async_trait;

/// Trait for querying TXT records from one specific name server
#[async_trait]
pub trait TxtLookup: Send + Sync {
    /// Look up the TXT records for `name` at `server`
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<String>)`: one entry per TXT resource record; the record's
    ///   character-strings may be returned already joined or in quoted,
    ///   space-separated presentation form
    /// - `Ok(vec![])`: the server answered but has no TXT record for the name
    /// - `Err(Error)`: the server could not be queried
    async fn lookup_txt(&self, server: &str, name: &str) -> Result<Vec<String>, crate::Error>;
}
