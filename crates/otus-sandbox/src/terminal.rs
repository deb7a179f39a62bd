//! Terminal multiplexer: thin wrapper over guest-side persistent shell
//! sessions. The only host-side state is a read cursor per
//! `(sandbox_id, name)` (§4.7).

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use otus_core::SandboxId;
use otus_rpc::RpcClient;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::{SandboxError, SandboxResult};

/// Default number of trailing lines returned by `read_terminal` in full
/// (non-incremental) mode, unless overridden by configuration.
pub const DEFAULT_READ_LINES: u32 = 200;

/// One line of terminal output returned by the guest.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalLine {
    /// Line content.
    pub content: String,
}

/// Result of a `read_terminal` call.
#[derive(Debug, Clone)]
pub struct TerminalRead {
    /// Output lines produced since the last read (incremental) or the
    /// most recent `lines` lines (full).
    pub lines: Vec<String>,
    /// Total bytes the guest has ever produced for this session, used to
    /// advance the host-side cursor.
    pub total_bytes: u64,
}

/// Summary entry for `list_terminals`.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalSummary {
    /// Session name.
    pub name: String,
    /// Whether the underlying shell process is still alive.
    #[serde(default)]
    pub alive: bool,
}

/// Tracks per-`(sandbox, session)` read cursors and delegates every other
/// operation to the sandbox's guest RPC client.
pub struct TerminalMultiplexer {
    cursors: Mutex<HashMap<(SandboxId, String), u64>>,
}

impl Default for TerminalMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalMultiplexer {
    /// Build an empty multiplexer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or no-op if already running) a named persistent shell
    /// session in the sandbox (§4.7 "idempotent `start_terminal`").
    ///
    /// # Errors
    /// Returns [`SandboxError::Rpc`] if the guest call fails.
    #[instrument(skip(self, rpc))]
    pub async fn start_terminal(
        &self,
        rpc: &RpcClient,
        sandbox_id: &SandboxId,
        name: &str,
    ) -> SandboxResult<()> {
        rpc.call("start_session", Some(json!({ "name": name }))).await?;
        self.cursors
            .lock()
            .await
            .entry((sandbox_id.clone(), name.to_string()))
            .or_insert(0);
        Ok(())
    }

    /// Send a command to a running session. Commands travel base64-wrapped
    /// on the wire, like every other RPC payload (§4.1, §6).
    ///
    /// # Errors
    /// Returns [`SandboxError::Rpc`] if the guest call fails.
    #[instrument(skip(self, rpc, command))]
    pub async fn send_to_terminal(
        &self,
        rpc: &RpcClient,
        name: &str,
        command: &str,
    ) -> SandboxResult<()> {
        let encoded = BASE64.encode(command.as_bytes());
        rpc.call(
            "send_to_session",
            Some(json!({ "name": name, "commandBase64": encoded })),
        )
        .await?;
        Ok(())
    }

    /// Read output from a session.
    ///
    /// Always requests the last `lines` lines from the guest (§6
    /// `read_session{name, lines?}` — there is no guest-side cursor
    /// parameter). When `incremental` is `true`, the suffix past the
    /// stored host-side byte cursor for this `(sandbox_id, name)` pair is
    /// computed here and the cursor is advanced by the bytes returned;
    /// when `false`, the whole capture is returned and the cursor is left
    /// untouched (§4.7, §8 scenario 5).
    ///
    /// # Errors
    /// Returns [`SandboxError::Rpc`] if the guest call fails.
    #[instrument(skip(self, rpc))]
    pub async fn read_terminal(
        &self,
        rpc: &RpcClient,
        sandbox_id: &SandboxId,
        name: &str,
        incremental: bool,
        lines: u32,
    ) -> SandboxResult<TerminalRead> {
        let response = rpc
            .call("read_session", Some(json!({ "name": name, "lines": lines })))
            .await?;
        let raw_lines: Vec<String> = response
            .get("lines")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let capture = raw_lines.join("\n");
        let capture_bytes = capture.as_bytes();
        let capture_len = capture_bytes.len() as u64;

        if !incremental {
            return Ok(TerminalRead {
                lines: raw_lines,
                total_bytes: capture_len,
            });
        }

        let key = (sandbox_id.clone(), name.to_string());
        let mut cursors = self.cursors.lock().await;
        let cursor = cursors.get(&key).copied().unwrap_or(0).min(capture_len);
        let suffix = &capture_bytes[cursor as usize..];
        let suffix_text = String::from_utf8_lossy(suffix).into_owned();
        cursors.insert(key, capture_len);
        drop(cursors);

        let suffix_lines = if suffix_text.is_empty() {
            Vec::new()
        } else {
            suffix_text.split('\n').map(ToString::to_string).collect()
        };

        Ok(TerminalRead {
            lines: suffix_lines,
            total_bytes: capture_len,
        })
    }

    /// List every session known to the sandbox.
    ///
    /// # Errors
    /// Returns [`SandboxError::Rpc`] if the guest call fails, or a
    /// protocol error if the response is malformed.
    #[instrument(skip(self, rpc))]
    pub async fn list_terminals(&self, rpc: &RpcClient) -> SandboxResult<Vec<TerminalSummary>> {
        let response = rpc.call("list_sessions", None).await?;
        let sessions = response
            .get("sessions")
            .cloned()
            .unwrap_or_else(|| json!([]));
        serde_json::from_value(sessions)
            .map_err(|e| SandboxError::Rpc(otus_rpc::RpcError::Protocol(e.to_string())))
    }

    /// Kill a named session and drop its host-side read cursor.
    ///
    /// # Errors
    /// Returns [`SandboxError::Rpc`] if the guest call fails.
    #[instrument(skip(self, rpc))]
    pub async fn kill_terminal(
        &self,
        rpc: &RpcClient,
        sandbox_id: &SandboxId,
        name: &str,
    ) -> SandboxResult<()> {
        rpc.call("kill_session", Some(json!({ "name": name }))).await?;
        self.cursors
            .lock()
            .await
            .remove(&(sandbox_id.clone(), name.to_string()));
        Ok(())
    }

    /// Drop every cursor associated with `sandbox_id` (called when a
    /// sandbox is stopped).
    pub async fn forget_sandbox(&self, sandbox_id: &SandboxId) {
        self.cursors
            .lock()
            .await
            .retain(|(id, _), _| id != sandbox_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forget_sandbox_drops_only_its_cursors() {
        let mux = TerminalMultiplexer::new();
        let a = SandboxId::new();
        let b = SandboxId::new();
        mux.cursors.lock().await.insert((a.clone(), "main".into()), 42);
        mux.cursors.lock().await.insert((b.clone(), "main".into()), 7);

        mux.forget_sandbox(&a).await;

        let cursors = mux.cursors.lock().await;
        assert!(!cursors.contains_key(&(a, "main".into())));
        assert!(cursors.contains_key(&(b, "main".into())));
    }

    /// §8 scenario 5: the guest's capture grows from `B0` ("hello") to
    /// `B0 ‖ E` ("hello1234567890"); the second incremental read must
    /// return exactly `E` (length 10) and the cursor must land at
    /// `|B0| + 10`.
    #[tokio::test]
    async fn incremental_read_returns_only_the_suffix_past_the_cursor() {
        use serde_json::json;
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);
        let rpc = RpcClient::new(Box::new(client_side), std::time::Duration::from_secs(5));

        let server = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(&mut server_side);
            let mut reader = BufReader::new(read_half);

            for capture in ["hello", "hello1234567890"] {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                let req: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": req["id"],
                    "result": { "lines": [capture] }
                });
                let mut out = serde_json::to_string(&response).unwrap();
                out.push('\n');
                write_half.write_all(out.as_bytes()).await.unwrap();
            }
        });

        let mux = TerminalMultiplexer::new();
        let sandbox_id = SandboxId::new();

        let first = mux
            .read_terminal(&rpc, &sandbox_id, "main", true, DEFAULT_READ_LINES)
            .await
            .unwrap();
        assert_eq!(first.lines, vec!["hello".to_string()]);
        assert_eq!(first.total_bytes, 5);

        let second = mux
            .read_terminal(&rpc, &sandbox_id, "main", true, DEFAULT_READ_LINES)
            .await
            .unwrap();
        assert_eq!(second.lines, vec!["1234567890".to_string()]);
        assert_eq!(second.total_bytes, 15);

        server.await.unwrap();
    }
}
