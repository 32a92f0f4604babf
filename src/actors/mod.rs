//! Actor-based ingestion and alerting
//!
//! Each actor runs as an independent async task communicating via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!   RPC connections ──► CollectorHandle ──► IngestCollectorActor ──► WindowStore
//!                                                                       ▲   ▲
//!   MonitoringAgent ──► ThresholdMonitorActor (one per trigger) ──reads─┘   │
//!                              │                                            │
//!                              └──► Notifier ──► Mailer                     │
//!                                                                           │
//!   RetentionActor ──────────────────────────────────────────evicts─────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **IngestCollectorActor**: Batches decoded metrics and writes counters
//! - **ThresholdMonitorActor**: Compares a windowed count with a trigger threshold
//! - **RetentionActor**: Evicts observations older than the retention period
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Cancellation**: Monitors share a `watch` channel that stops all of them
//! 3. **Request/Response**: oneshot channels for synchronous queries and stops

pub mod collector;
pub mod messages;
pub mod monitor;
pub mod retention;
