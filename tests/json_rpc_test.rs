//! Wiremock tests for the JSON-RPC transport and for failover over real HTTP.
#![cfg(feature = "json-rpc")]

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use huginn::transport::JsonRpcTransport;
use huginn::{
    CallDescriptor, Endpoint, Huginn, HuginnError, RemoteCall, RetryConfig, ServiceEndpoints,
};

fn primary(server: &MockServer) -> Endpoint {
    Endpoint::Primary { url: server.uri() }
}

fn block_number() -> CallDescriptor {
    CallDescriptor::new("rpc", "eth_blockNumber")
}

#[tokio::test]
async fn successful_call_returns_the_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "eth_getBalance",
            "params": ["0xabc", "latest"]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x1bc16d674ec80000"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let call = CallDescriptor::new("0xabc", "eth_getBalance")
        .arg("0xabc")
        .arg("latest");
    let value = JsonRpcTransport::new()
        .call(&primary(&server), &call)
        .await
        .unwrap();
    assert_eq!(value, json!("0x1bc16d674ec80000"));
}

#[tokio::test]
async fn null_result_is_a_value() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": null})),
        )
        .mount(&server)
        .await;

    let call = CallDescriptor::new("rpc", "eth_getTransactionByHash");
    let value = JsonRpcTransport::new()
        .call(&primary(&server), &call)
        .await
        .unwrap();
    assert!(value.is_null());
}

#[tokio::test]
async fn rpc_error_objects_become_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "header not found"}
        })))
        .mount(&server)
        .await;

    let err = JsonRpcTransport::new()
        .call(&primary(&server), &block_number())
        .await
        .unwrap_err();
    match err {
        HuginnError::Rpc { code, message } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "header not found");
        }
        other => panic!("expected Rpc, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_params_are_caller_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32602, "message": "invalid argument 0"}
        })))
        .mount(&server)
        .await;

    let err = JsonRpcTransport::new()
        .call(&primary(&server), &block_number())
        .await
        .unwrap_err();
    assert!(err.is_caller_error());
}

#[tokio::test]
async fn too_many_requests_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
        .mount(&server)
        .await;

    let err = JsonRpcTransport::new()
        .call(&primary(&server), &block_number())
        .await
        .unwrap_err();
    assert!(matches!(err, HuginnError::RateLimited { .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
}

#[tokio::test]
async fn unauthorized_status_maps_to_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("missing api key"))
        .mount(&server)
        .await;

    let err = JsonRpcTransport::new()
        .call(&primary(&server), &block_number())
        .await
        .unwrap_err();
    assert!(matches!(err, HuginnError::Unauthorized(ref m) if m == "missing api key"));
}

#[tokio::test]
async fn server_errors_map_to_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
        .mount(&server)
        .await;

    let err = JsonRpcTransport::new()
        .call(&primary(&server), &block_number())
        .await
        .unwrap_err();
    assert!(matches!(err, HuginnError::Api { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn refused_connections_map_to_network_errors() {
    let endpoint = Endpoint::Primary {
        url: "http://127.0.0.1:1".into(),
    };
    let err = JsonRpcTransport::new()
        .call(&endpoint, &block_number())
        .await
        .unwrap_err();
    assert!(matches!(err, HuginnError::Network(_)), "got {err:?}");
}

#[tokio::test]
async fn client_timeouts_map_to_timeout_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let transport = JsonRpcTransport::with_timeout(Duration::from_millis(50)).unwrap();
    let err = transport
        .call(&primary(&server), &block_number())
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");
}

#[tokio::test]
async fn bearer_token_and_user_agent_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer secret-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    JsonRpcTransport::new()
        .bearer_token("secret-key")
        .call(&primary(&server), &block_number())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let agent = requests[0].headers.get("user-agent").unwrap().to_str().unwrap();
    assert!(agent.starts_with("huginn/"));
}

#[tokio::test]
async fn client_fails_over_from_a_dead_primary() {
    let backup = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})),
        )
        .mount(&backup)
        .await;

    let client = Huginn::builder()
        .service("rpc-reads")
        .endpoints(ServiceEndpoints::new("http://127.0.0.1:1").fallback(backup.uri()))
        .transport(JsonRpcTransport::new())
        .retry(
            RetryConfig::new()
                .max_attempts(4)
                .initial_delay(Duration::from_millis(5)),
        )
        .failover_threshold(2)
        .build()
        .unwrap();

    let value = client.execute(block_number().skip_cache()).await.unwrap();
    assert_eq!(value, json!("0x10"));
    assert!(client.stats().await.using_fallback);
}
