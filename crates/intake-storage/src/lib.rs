//! Session persistence for the intake engine.
//!
//! Provides the two-tier session store: an authoritative primary backend
//! (SQLite or in-process) behind a bounded, TTL-aware local cache that keeps
//! conversations alive while the primary is unreachable.

pub mod cache;
pub mod db;
pub mod migrations;
pub mod primary;
pub mod session;

pub use cache::{CacheStats, LocalCache};
pub use db::SqlitePrimary;
pub use primary::{MemoryPrimary, PrimaryStore};
pub use session::SessionStore;
