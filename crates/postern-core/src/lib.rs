//! Device-fingerprinted daily message quota.
//!
//! Three cooperating pieces:
//!
//! - [`signals`] / [`fingerprint`] — derive a stable identifier for the
//!   current host from a battery of environment probes (SHA-256 over the
//!   joined signal values). No signal is required: probes degrade to
//!   sentinels individually rather than failing the whole derivation.
//! - [`obfuscate`] / [`store`] — persist a fingerprint-keyed usage database
//!   as one obfuscated JSON blob in a single storage slot, behind an
//!   injectable key-value abstraction.
//! - [`limiter`] — the two-call admission API: check whether this device may
//!   send another message today, and record a dispatched message. Day
//!   buckets roll over lazily at local midnight.
//!
//! Nothing here throws to the caller in normal operation: probe misses,
//! storage corruption and lookup failures all degrade toward admitting the
//! message, with a tracing record of what went wrong.

pub mod config;
pub mod enrich;
pub mod fingerprint;
pub mod limiter;
pub mod obfuscate;
pub mod signals;
pub mod store;

pub use config::Config;
pub use limiter::{current_day, Decision, MessageLimiter};
pub use store::{FileStore, KvStore, MemoryStore, StoreError, UsageDb, UsageRecord};
