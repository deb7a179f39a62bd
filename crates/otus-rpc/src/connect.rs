//! Transport connectors (§4.1, §6 "Guest RPC").
//!
//! Two ways to reach the in-guest agent: a host Unix socket that proxies to
//! a guest vsock port via a text handshake, or a plain TCP socket to a
//! guest IP/port. Both share the same newline-delimited JSON-RPC framing
//! once connected.

use std::net::IpAddr;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};

use crate::error::{RpcError, RpcResult};

/// A duplex byte stream usable as an RPC transport.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// Connect to a guest vsock port through a host-side Unix socket proxy.
///
/// Performs the proxy's text handshake: writes `CONNECT <port>\n` and
/// expects a reply line starting with `OK` before the stream is considered
/// ready for JSON-RPC framing (§4.1, §6).
///
/// # Errors
/// Returns [`RpcError::Transport`] if the socket cannot be opened, or
/// [`RpcError::Protocol`] if the handshake reply is malformed.
pub async fn connect_vsock_proxy(
    proxy_socket_path: &std::path::Path,
    guest_port: u32,
) -> RpcResult<Box<dyn Stream>> {
    let stream = UnixStream::connect(proxy_socket_path)
        .await
        .map_err(|e| RpcError::Transport(format!("connect {}: {e}", proxy_socket_path.display())))?;

    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let handshake = format!("CONNECT {guest_port}\n");
    write_half
        .write_all(handshake.as_bytes())
        .await
        .map_err(|e| RpcError::Transport(format!("handshake write: {e}")))?;

    let mut reply = String::new();
    reader
        .read_line(&mut reply)
        .await
        .map_err(|e| RpcError::Transport(format!("handshake read: {e}")))?;

    if !reply.trim_start().starts_with("OK") {
        return Err(RpcError::Protocol(format!(
            "vsock-proxy handshake rejected: {}",
            reply.trim()
        )));
    }

    Ok(Box::new(reader.into_inner().unsplit(write_half)))
}

/// Connect directly via TCP to a guest IP and port.
///
/// # Errors
/// Returns [`RpcError::Transport`] if the TCP connection fails.
pub async fn connect_tcp(ip: IpAddr, port: u16) -> RpcResult<Box<dyn Stream>> {
    let stream = TcpStream::connect((ip, port))
        .await
        .map_err(|e| RpcError::Transport(format!("connect {ip}:{port}: {e}")))?;
    stream
        .set_nodelay(true)
        .map_err(|e| RpcError::Transport(format!("set_nodelay: {e}")))?;
    Ok(Box::new(stream))
}
