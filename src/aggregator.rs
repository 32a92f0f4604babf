//! Aggregation of windowed observations into a single comparable value

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::storage::WindowStore;

/// Reduces the observations of a metric over a trailing interval
#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn collect(&self, metric: &str, interval: Duration) -> f32;
}

/// Counts occurrences: the windowed sum rounded to the nearest integer
#[derive(Clone)]
pub struct CountAggregator {
    store: WindowStore,
}

impl CountAggregator {
    pub fn new(store: WindowStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Aggregator for CountAggregator {
    async fn collect(&self, metric: &str, interval: Duration) -> f32 {
        let count = self.store.sum_range(metric, interval).await.round();
        trace!("{metric} counted {count} over {interval:?}");
        count
    }
}
