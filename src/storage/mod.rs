//! Tiered storage system for rule vectors.
//!
//! Three-tier architecture:
//! - **Hot**: In-memory LRU cache (10K rules, <1μs)
//! - **Warm**: Memory-mapped file (100K rules, ~10μs)
//! - **Cold**: SQLite database (unlimited, ~100μs)
//!
//! Rules are promoted into hot on access.
//! Rules are demoted out of hot when the cache is full, and overflow
//! from warm into cold when warm is full.

pub mod cold_storage;
pub mod coordinator;
pub mod hot_cache;
pub mod types;
pub mod warm_storage;

pub use cold_storage::ColdStorage;
pub use coordinator::{InstallReport, TierCoordinator};
pub use hot_cache::{HotCache, HotCacheStats};
pub use types::{StorageStats, StorageTier};
pub use warm_storage::WarmStorage;
