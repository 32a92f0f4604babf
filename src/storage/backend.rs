//! Key-value backend trait definition
//!
//! The window store only needs two primitive structures per metric:
//!
//! - a **hash** mapping a field (the observation timestamp) to a value
//! - a **sorted set** of members ordered by a floating point score
//!
//! Any store offering these (Redis, SQLite tables, an in-memory map) can back
//! the sliding window by implementing [`KvBackend`].

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Inclusive score bounds for sorted-set range operations
///
/// `f64::NEG_INFINITY` / `f64::INFINITY` leave a side unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Everything with a score lower than or equal to `max`
    pub fn up_to(max: f64) -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max,
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && score <= self.max
    }
}

/// Trait for key-value storage backends
///
/// Implementations must provide atomic per-key operations, as the ingestion
/// collector writes concurrently from many tasks.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Set `field` of the hash at `key`, overwriting any previous value
    async fn hset(&self, key: &str, field: &str, value: &str) -> StorageResult<()>;

    /// Get `field` of the hash at `key`
    async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<String>>;

    /// Delete `fields` from the hash at `key`, returning how many existed
    async fn hdel(&self, key: &str, fields: &[String]) -> StorageResult<usize>;

    /// Add `member` to the sorted set at `key` (updating its score if present)
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StorageResult<()>;

    /// Members of the sorted set at `key` whose score lies in `range`, ordered by score
    async fn zrange_by_score(&self, key: &str, range: ScoreRange)
    -> StorageResult<Vec<(String, f64)>>;

    /// Remove members of the sorted set at `key` whose score lies in `range`
    ///
    /// Returns the number of members removed.
    async fn zrem_range_by_score(&self, key: &str, range: ScoreRange) -> StorageResult<usize>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
