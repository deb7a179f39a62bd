//! Request/response correlation over a newline-delimited JSON-RPC stream.
//!
//! The transport never interleaves partial lines across responses: the
//! reader task buffers bytes until a full line is seen before attempting
//! to parse a response (§4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::connect::Stream;
use crate::error::{RpcError, RpcResult};
use crate::wire::{JsonRpcRequest, JsonRpcResponse};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResult<Value>>>>>;

/// A JSON-RPC client bound to one transport connection.
///
/// Cloning an [`RpcClient`] shares the same underlying connection and
/// pending-id map; every clone can issue requests concurrently and each
/// gets its own response once the id is correlated.
#[derive(Clone)]
pub struct RpcClient {
    next_id: Arc<AtomicU64>,
    pending: PendingMap,
    writer: Arc<Mutex<WriteHalf<Box<dyn Stream>>>>,
    default_timeout: Duration,
}

impl RpcClient {
    /// Take ownership of `stream` and start the background reader task.
    #[must_use]
    pub fn new(stream: Box<dyn Stream>, default_timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(read_loop(read_half, reader_pending));

        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
            writer: Arc::new(Mutex::new(write_half)),
            default_timeout,
        }
    }

    /// Issue `method` with `params` and await the correlated response,
    /// subject to the transport's configured timeout.
    ///
    /// On timeout the id is removed from the pending map and the call
    /// fails with [`RpcError::Timeout`].
    ///
    /// # Errors
    /// Returns a transport, protocol, timeout, or remote error.
    pub async fn call(&self, method: &str, params: Option<Value>) -> RpcResult<Value> {
        self.call_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// As [`RpcClient::call`] but with an explicit per-request timeout.
    ///
    /// # Errors
    /// Returns a transport, protocol, timeout, or remote error.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> RpcResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest::new(id, method, params);
        let mut line = serde_json::to_string(&request)
            .map_err(|e| RpcError::Protocol(format!("encode request: {e}")))?;
        line.push('\n');

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                self.pending.lock().await.remove(&id);
                self.fail_all(RpcError::Closed(e.to_string())).await;
                return Err(RpcError::Transport(e.to_string()));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_recv_err)) => Err(RpcError::Closed(
                "transport closed before response arrived".to_string(),
            )),
            Err(_elapsed) => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::Timeout {
                    elapsed_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            },
        }
    }

    /// Fail every currently pending call with `err`. Used when the
    /// transport closes or hits an unrecoverable I/O error.
    async fn fail_all(&self, err: RpcError) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

async fn read_loop(read_half: ReadHalf<Box<dyn Stream>>, pending: PendingMap) {
    let mut reader = tokio::io::BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let n = match tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "rpc transport read error");
                fail_all_detached(&pending, RpcError::Closed(e.to_string())).await;
                return;
            },
        };

        if n == 0 {
            debug!("rpc transport closed by peer");
            fail_all_detached(&pending, RpcError::Closed("peer closed connection".to_string()))
                .await;
            return;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response: JsonRpcResponse = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, line = %trimmed, "malformed rpc response line");
                continue;
            },
        };

        let mut guard = pending.lock().await;
        let Some(tx) = guard.remove(&response.id) else {
            warn!(id = response.id, "rpc response with no matching pending request");
            continue;
        };
        drop(guard);

        let result = if let Some(err) = response.error {
            Err(RpcError::Remote {
                code: err.code,
                message: err.message,
            })
        } else {
            Ok(response.result.unwrap_or(Value::Null))
        };
        let _ = tx.send(result);
    }
}

async fn fail_all_detached(pending: &PendingMap, err: RpcError) {
    let mut guard = pending.lock().await;
    for (_, tx) in guard.drain() {
        let _ = tx.send(Err(err.clone()));
    }
}
