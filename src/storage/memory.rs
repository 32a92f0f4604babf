//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Running collector and agent inside one process
//!
//! All data is lost on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use super::backend::{HealthStatus, KvBackend, ScoreRange};
use super::error::{StorageError, StorageResult};

type Hash = HashMap<String, String>;
type SortedSet = HashMap<String, f64>;

/// In-memory key-value backend
#[derive(Default)]
pub struct MemoryBackend {
    hashes: RwLock<HashMap<String, Hash>>,
    sorted_sets: RwLock<HashMap<String, SortedSet>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields stored in the hash at `key`
    pub fn hash_len(&self, key: &str) -> usize {
        self.hashes
            .read()
            .map(|hashes| hashes.get(key).map_or(0, HashMap::len))
            .unwrap_or_default()
    }

    /// Number of members of the sorted set at `key`
    pub fn sorted_set_len(&self, key: &str) -> usize {
        self.sorted_sets
            .read()
            .map(|sets| sets.get(key).map_or(0, HashMap::len))
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::BackendError("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn hset(&self, key: &str, field: &str, value: &str) -> StorageResult<()> {
        let mut hashes = self.hashes.write().map_err(poisoned)?;
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<String>> {
        let hashes = self.hashes.read().map_err(poisoned)?;
        Ok(hashes.get(key).and_then(|hash| hash.get(field)).cloned())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StorageResult<usize> {
        let mut hashes = self.hashes.write().map_err(poisoned)?;
        let Some(hash) = hashes.get_mut(key) else {
            return Ok(0);
        };

        let removed = fields
            .iter()
            .filter(|field| hash.remove(*field).is_some())
            .count();

        if hash.is_empty() {
            hashes.remove(key);
        }

        Ok(removed)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StorageResult<()> {
        let mut sets = self.sorted_sets.write().map_err(poisoned)?;
        sets.entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
    ) -> StorageResult<Vec<(String, f64)>> {
        let sets = self.sorted_sets.read().map_err(poisoned)?;

        let mut members: Vec<(String, f64)> = sets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| range.contains(**score))
                    .map(|(member, score)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();

        members.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(members)
    }

    async fn zrem_range_by_score(&self, key: &str, range: ScoreRange) -> StorageResult<usize> {
        let mut sets = self.sorted_sets.write().map_err(poisoned)?;
        let Some(set) = sets.get_mut(key) else {
            return Ok(0);
        };

        let before = set.len();
        set.retain(|_, score| !range.contains(*score));
        let removed = before - set.len();

        if set.is_empty() {
            sets.remove(key);
        }

        Ok(removed)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let keys = self.hashes.read().map_err(poisoned)?.len();

        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("hash_keys".to_string(), keys.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
