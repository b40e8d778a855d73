//! JSON-RPC 2.0 endpoint mounted by the `rpc` listener protocol.
//!
//! Methods:
//! - `ping` → `"pong"`
//! - `echo` → the request's `params`
//! - `rpc.methods` → the list of method names

use axum::{routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const RPC_PATH: &str = "/rpc";

const METHODS: &[&str] = &["ping", "echo", "rpc.methods"];
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Protocol definitions for [`ListenerBuilder`](crate::net::ListenerBuilder):
/// mounts the RPC endpoint next to the application routes.
pub fn definitions(router: Router) -> Router {
    router.route(RPC_PATH, post(handle))
}

async fn handle(Json(request): Json<RpcRequest>) -> Json<RpcResponse> {
    tracing::debug!(method = %request.method, "RPC call");
    Json(dispatch(request))
}

pub fn dispatch(request: RpcRequest) -> RpcResponse {
    let result = match request.method.as_str() {
        "ping" => Ok(json!("pong")),
        "echo" => Ok(request.params),
        "rpc.methods" => Ok(json!(METHODS)),
        other => Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: format!("method not found: {other}"),
        }),
    };

    let (result, error) = match result {
        Ok(value) => (Some(value), None),
        Err(error) => (None, Some(error)),
    };
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id: request.id,
        result,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(method: &str, params: Value) -> RpcResponse {
        dispatch(RpcRequest {
            method: method.into(),
            params,
            id: json!(7),
        })
    }

    #[test]
    fn ping_and_echo() {
        assert_eq!(call("ping", Value::Null).result, Some(json!("pong")));
        let echoed = call("echo", json!({ "a": 1 }));
        assert_eq!(echoed.result, Some(json!({ "a": 1 })));
        assert_eq!(echoed.id, json!(7));
    }

    #[test]
    fn unknown_method_is_an_error() {
        let response = call("nope", Value::Null);
        assert_eq!(response.result, None);
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }
}
