//! Durable storage.
//!
//! Holds the sled-backed coordination dedup ledger, for deployments where
//! a restart must not re-run coordination actions that already succeeded.

pub mod sled_store;

pub use sled_store::SledDedup;
