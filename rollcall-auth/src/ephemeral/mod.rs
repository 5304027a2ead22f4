//! TTL-scoped in-memory storage.
//!
//! Entries carry an absolute expiry computed when they are written. Reads
//! treat expired entries as absent, so correctness never depends on the
//! sweep; the [`Janitor`] only reclaims memory.

mod janitor;
mod store;

pub use janitor::{Janitor, Registration, Sweep};
pub use store::EphemeralStore;
