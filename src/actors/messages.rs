//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Rendezvous**: Every command that needs an answer carries a oneshot sender

use tokio::sync::oneshot;

/// Commands that can be sent to the ingestion collector
#[derive(Debug)]
pub enum CollectorCommand {
    /// Flush the pending batch now, answering once all writes finished
    Flush {
        respond_to: oneshot::Sender<CollectorStats>,
    },

    /// Get collector statistics
    GetStats {
        respond_to: oneshot::Sender<CollectorStats>,
    },

    /// Flush the pending batch and stop
    ///
    /// The acknowledgement is sent after the final flush completed.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Collector statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Number of flushes performed (any trigger)
    pub flush_count: u64,

    /// Flushes started because the batch reached its size limit
    pub size_flushes: u64,

    /// Flushes started by the periodic tick
    pub tick_flushes: u64,

    /// Counter observations written to the window store
    pub written: u64,

    /// Counter observations whose write failed
    pub failed: u64,

    /// Metrics handed to a flush that were not counters
    pub ignored: u64,

    /// Metrics in the pending batch
    pub pending: usize,

    /// Metrics dropped because the queue stayed full
    pub dropped: u64,
}

/// Commands that can be sent to a threshold monitor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Stop the monitor, acknowledging once it left its loop
    Stop { respond_to: oneshot::Sender<()> },
}

/// Commands that can be sent to the retention actor
#[derive(Debug)]
pub enum RetentionCommand {
    /// Run an eviction pass now and report how many observations were removed
    RunNow {
        respond_to: oneshot::Sender<usize>,
    },

    /// Gracefully shut down the retention actor
    Shutdown,
}

/// Reported once every threshold monitor of a configured monitor has exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringStopped {
    pub metric: String,
    pub reason: String,
}
