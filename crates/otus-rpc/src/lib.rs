//! Newline-delimited JSON-RPC 2.0 transport used to reach the in-guest
//! agent (§4.1 RPC transport, §6 "Guest RPC").

mod client;
mod connect;
mod error;
mod wire;

pub use client::RpcClient;
pub use connect::{connect_tcp, connect_vsock_proxy, Stream};
pub use error::{RpcError, RpcResult};
pub use wire::{JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// A loopback pair standing in for a real guest connection: one end
    /// given to `RpcClient`, the other driven by the test to emit
    /// responses and assert on requests.
    fn loopback_pair() -> (tokio::io::DuplexStream, tokio::io::DuplexStream) {
        tokio::io::duplex(64 * 1024)
    }

    #[tokio::test]
    async fn call_correlates_response_by_id() {
        let (client_side, mut server_side) = loopback_pair();
        let client = RpcClient::new(Box::new(client_side), Duration::from_secs(5));

        let server_task = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(&mut server_side);
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let req: JsonRpcRequest = serde_json::from_str(line.trim()).unwrap();
            assert_eq!(req.method, "health");

            let response = json!({"jsonrpc":"2.0","id":req.id,"result":{"status":"ok"}});
            let mut line = serde_json::to_string(&response).unwrap();
            line.push('\n');
            write_half.write_all(line.as_bytes()).await.unwrap();
        });

        let result = client.call("health", None).await.unwrap();
        assert_eq!(result["status"], "ok");
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_removes_pending_id_and_fails_call() {
        let (client_side, _server_side) = loopback_pair();
        let client = RpcClient::new(Box::new(client_side), Duration::from_millis(30));

        let result = client.call("health", None).await;
        assert!(matches!(result, Err(RpcError::Timeout { .. })));
    }

    #[tokio::test]
    async fn remote_error_object_is_surfaced() {
        let (client_side, mut server_side) = loopback_pair();
        let client = RpcClient::new(Box::new(client_side), Duration::from_secs(5));

        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(&mut server_side);
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let req: JsonRpcRequest = serde_json::from_str(line.trim()).unwrap();

            let response =
                json!({"jsonrpc":"2.0","id":req.id,"error":{"code":-32601,"message":"not found"}});
            let mut line = serde_json::to_string(&response).unwrap();
            line.push('\n');
            write_half.write_all(line.as_bytes()).await.unwrap();
        });

        let result = client.call("unknown", None).await;
        assert!(matches!(result, Err(RpcError::Remote { code: -32601, .. })));
    }

    #[tokio::test]
    async fn closing_transport_fails_pending_calls() {
        let (client_side, server_side) = loopback_pair();
        let client = RpcClient::new(Box::new(client_side), Duration::from_secs(5));
        drop(server_side);

        let result = client.call("health", None).await;
        assert!(matches!(result, Err(RpcError::Closed(_))));
    }
}
