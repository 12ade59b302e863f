//! chainevents-rpc: JSON-RPC 2.0 HTTP implementation of `NodeClient`.

pub mod client;
pub mod request;
pub mod retry;

pub use client::{HttpClientConfig, HttpNodeClient};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use retry::{RetryConfig, RetryPolicy};
