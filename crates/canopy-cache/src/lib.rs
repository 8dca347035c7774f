//! Time-bounded caches for discovery results and permission decisions.
//!
//! [`TtlCache`] never returns an entry older than its TTL. Expiry is checked
//! lazily on read and the read that discovers an expired entry removes it.
//! An optional entry bound evicts the least-recently-used entry on insert.
//!
//! Time comes from a [`Clock`] so tests can step past a TTL with
//! [`ManualClock::advance`] instead of sleeping.

pub mod cache;
pub mod clock;

pub use cache::{CacheConfig, CacheStats, TtlCache, spawn_cleanup};
pub use clock::{Clock, ManualClock, SystemClock};
