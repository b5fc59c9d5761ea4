// # Persisted State
//
// Everything the rotation tool remembers between runs:
//
// - `ledger`: DKIM records published by earlier runs, pending expiry
// - `sessions`: opaque provider session state handed from `close` to `open`
// - `file`: atomic write / backup recovery shared by both

pub mod file;
pub mod ledger;
pub mod sessions;

pub use ledger::{LedgerEntry, RecordLedger};
pub use sessions::SessionStore;
