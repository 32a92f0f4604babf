//! JSON-RPC transport over a Unix stream socket
//!
//! Requests and responses are single JSON documents, one per line:
//!
//! ```text
//! --> {"method":"Metric.Handle","params":[{"Text":"http.response.500:1|c"}],"id":1}
//! <-- {"id":1,"result":0,"error":null}
//! ```
//!
//! `result` is `0` when the metric was accepted and `1` when it was not.

use serde::{Deserialize, Serialize};

pub mod client;
pub mod server;

pub use client::{Instrument, RpcClient};
pub use server::MetricServer;

/// The only method the metric server exposes
pub const METHOD_HANDLE: &str = "Metric.Handle";

pub const STATUS_OK: i32 = 0;
pub const STATUS_FAILED: i32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Vec<MetricArgs>,
    #[serde(default)]
    pub id: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricArgs {
    #[serde(rename = "Text")]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: serde_json::Value,
    pub result: Option<i32>,
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(STATUS_OK),
            error: None,
        }
    }

    pub fn failed(id: serde_json::Value, error: impl Into<String>) -> Self {
        Self {
            id,
            result: Some(STATUS_FAILED),
            error: Some(error.into()),
        }
    }

    /// An error without a status, for requests that never reached a method
    pub fn error(id: serde_json::Value, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}
