//! Sliding-window counter store
//!
//! Every observation of a metric is kept twice:
//!
//! - in the hash `<metric>`, field `<timestamp µs>` → value with 3 decimals
//! - in the sorted set `<metric>::timestamps`, member and score `<timestamp µs>`
//!
//! The sorted set answers "which observations fall in `[now - interval, now]`",
//! the hash holds their values.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::backend::{KvBackend, ScoreRange};
use super::error::{StorageError, StorageResult};
use crate::util::now_micros;

/// Suffix appended to a metric name to form its timestamp index key
pub const TIMESTAMP_KEY_SUFFIX: &str = "::timestamps";

/// Key of the sorted timestamp index for `metric`
pub fn index_key(metric: &str) -> String {
    format!("{metric}{TIMESTAMP_KEY_SUFFIX}")
}

/// Windowed counter storage over a shared [`KvBackend`]
#[derive(Clone)]
pub struct WindowStore {
    backend: Arc<dyn KvBackend>,
}

impl WindowStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Record `value` for `metric` at `ts_micros`
    ///
    /// An existing observation with the same timestamp is overwritten.
    pub async fn append(&self, metric: &str, ts_micros: i64, value: f32) -> StorageResult<()> {
        if !value.is_finite() {
            return Err(StorageError::NonFiniteValue {
                metric: metric.to_string(),
                value,
            });
        }

        let field = ts_micros.to_string();

        self.backend
            .hset(metric, &field, &format!("{value:.3}"))
            .await?;
        self.backend
            .zadd(&index_key(metric), &field, ts_micros as f64)
            .await?;

        Ok(())
    }

    /// Sum of all values of `metric` observed during the last `interval`
    pub async fn sum_range(&self, metric: &str, interval: Duration) -> f32 {
        self.sum_range_at(metric, interval, now_micros()).await
    }

    /// Sum of all values of `metric` with a timestamp in `[now - interval, now]`
    ///
    /// Entries that are missing or unparsable are skipped. A failing index
    /// lookup yields 0.
    #[instrument(skip(self))]
    pub async fn sum_range_at(&self, metric: &str, interval: Duration, now: i64) -> f32 {
        let start = now.saturating_sub(interval.as_micros() as i64);

        let members = match self
            .backend
            .zrange_by_score(&index_key(metric), ScoreRange::new(start as f64, now as f64))
            .await
        {
            Ok(members) => members,
            Err(e) => {
                warn!("failed to read timestamp index of {metric}: {e}");
                return 0.0;
            }
        };

        let mut sum = 0.0;

        for (timestamp, _) in members {
            match self.backend.hget(metric, &timestamp).await {
                Ok(Some(raw)) if !raw.is_empty() => match raw.parse::<f32>() {
                    Ok(value) if value.is_finite() => sum += value,
                    _ => warn!("skipping unparsable value {raw:?} of {metric} at {timestamp}"),
                },
                Ok(_) => warn!("no value stored for {metric} at {timestamp}"),
                Err(e) => warn!("failed to read value of {metric} at {timestamp}: {e}"),
            }
        }

        sum
    }

    /// Remove every observation of `metric` with a timestamp ≤ `cutoff_micros`
    ///
    /// Returns the number of observations evicted from the index.
    #[instrument(skip(self))]
    pub async fn evict_before(&self, metric: &str, cutoff_micros: i64) -> StorageResult<usize> {
        let key = index_key(metric);
        let range = ScoreRange::up_to(cutoff_micros as f64);

        let fields: Vec<String> = self
            .backend
            .zrange_by_score(&key, range)
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect();

        if fields.is_empty() {
            return Ok(0);
        }

        self.backend.hdel(metric, &fields).await?;
        let evicted = self.backend.zrem_range_by_score(&key, range).await?;

        debug!("evicted {evicted} observations of {metric}");
        Ok(evicted)
    }
}
