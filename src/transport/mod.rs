//! Downstream transports implementing [`RemoteCall`](crate::RemoteCall).

#[cfg(feature = "json-rpc")]
pub mod json_rpc;

#[cfg(feature = "json-rpc")]
pub use json_rpc::JsonRpcTransport;
