//! JSON-RPC 2.0 over HTTP.
//!
//! Each attempt POSTs one request object to the resolved endpoint URL:
//!
//! ```json
//! {"jsonrpc": "2.0", "id": 7, "method": "<operation>", "params": [<args>]}
//! ```
//!
//! The descriptor's `target` is not sent: for RPC nodes the contract or
//! account is already part of `args`, and the target only scopes the cache
//! key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, trace};

use crate::traits::RemoteCall;
use crate::types::{CallDescriptor, Endpoint};
use crate::{HuginnError, Result};

/// JSON-RPC invalid request.
const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC invalid params.
const INVALID_PARAMS: i64 = -32602;

/// [`RemoteCall`] implementation for JSON-RPC 2.0 nodes.
#[derive(Debug)]
pub struct JsonRpcTransport {
    http: Client,
    bearer_token: Option<String>,
    user_agent: String,
    timeout: Option<Duration>,
    next_id: AtomicU64,
}

impl Default for JsonRpcTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRpcTransport {
    /// Create a transport with a default HTTP client.
    ///
    /// Deadlines are enforced by the client layer around each attempt.
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Create a transport over an existing HTTP client.
    pub fn with_client(http: Client) -> Self {
        Self {
            http,
            bearer_token: None,
            user_agent: crate::version::user_agent(),
            timeout: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a transport whose HTTP client enforces `timeout` per request.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HuginnError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            timeout: Some(timeout),
            ..Self::with_client(http)
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn map_send_error(&self, err: reqwest::Error, method: &str) -> HuginnError {
        if err.is_timeout() {
            HuginnError::Timeout {
                operation: method.to_owned(),
                after: self.timeout.unwrap_or_default(),
            }
        } else if err.is_connect() {
            HuginnError::Network(err.to_string())
        } else {
            HuginnError::Http(err.to_string())
        }
    }
}

/// Map a non-2xx status to an error.
fn status_error(
    status: StatusCode,
    headers: &reqwest::header::HeaderMap,
    body: String,
) -> HuginnError {
    match status.as_u16() {
        401 => HuginnError::Unauthorized(body),
        403 => HuginnError::Forbidden(body),
        429 => {
            let retry_after = headers
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            HuginnError::RateLimited { retry_after }
        }
        code => HuginnError::Api {
            status: code,
            message: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        },
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

#[derive(Deserialize)]
struct RpcResponse {
    /// `null` is a valid result (e.g. an unknown transaction hash).
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl From<RpcErrorObject> for HuginnError {
    fn from(err: RpcErrorObject) -> Self {
        match err.code {
            INVALID_REQUEST | INVALID_PARAMS => HuginnError::InvalidInput(err.message),
            code => HuginnError::Rpc {
                code,
                message: err.message,
            },
        }
    }
}

#[async_trait]
impl RemoteCall for JsonRpcTransport {
    fn name(&self) -> &str {
        "json-rpc"
    }

    #[instrument(skip_all, fields(endpoint = %endpoint, method = %call.operation))]
    async fn call(&self, endpoint: &Endpoint, call: &CallDescriptor) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method: &call.operation,
            params: &call.args,
        };

        let mut request = self
            .http
            .post(endpoint.url())
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .json(&body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_send_error(e, &call.operation))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &headers, body));
        }

        let payload: RpcResponse = response
            .json()
            .await
            .map_err(|e| HuginnError::Json(e.to_string()))?;
        trace!(id, "rpc response");

        match payload.error {
            Some(err) => Err(err.into()),
            None => Ok(payload.result),
        }
    }
}
