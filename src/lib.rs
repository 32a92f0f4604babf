pub mod actors;
pub mod agent;
pub mod aggregator;
pub mod config;
pub mod notifier;
pub mod protocol;
pub mod rpc;
pub mod storage;
pub mod util;

pub use protocol::{DecodeError, Metric, MetricKind, parse_datagram};
