//! Accept loop and per-connection framing for the IPC Server.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;

use super::frame::{read_frame, write_frame};
use super::pool::Connection;
use crate::api::ApiHandlers;
use crate::config::IpcTransport;

pub async fn serve(transport: IpcTransport, handlers: Arc<ApiHandlers>) -> Result<()> {
    match transport {
        IpcTransport::UnixSocket { path } => serve_unix(path, handlers).await,
        IpcTransport::Tcp { port } => serve_tcp(port, handlers).await,
    }
}

#[cfg(unix)]
async fn serve_unix(path: std::path::PathBuf, handlers: Arc<ApiHandlers>) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(&path).context("remove stale socket")?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create socket directory")?;
    }
    let listener = tokio::net::UnixListener::bind(&path)
        .with_context(|| format!("bind {}", path.display()))?;
    info!(path = %path.display(), "IPC server listening on Unix socket");
    loop {
        let (stream, _addr) = listener.accept().await.context("accept Unix connection")?;
        let handlers = Arc::clone(&handlers);
        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            handle_connection(read_half, write_half, handlers).await;
        });
    }
}

#[cfg(not(unix))]
async fn serve_unix(_path: std::path::PathBuf, _handlers: Arc<ApiHandlers>) -> Result<()> {
    anyhow::bail!("Unix domain sockets are not supported on this platform")
}

async fn serve_tcp(port: u16, handlers: Arc<ApiHandlers>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("bind 127.0.0.1:{port}"))?;
    info!(port, "IPC server listening on localhost TCP");
    loop {
        let (stream, _addr) = listener.accept().await.context("accept TCP connection")?;
        let handlers = Arc::clone(&handlers);
        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            handle_connection(read_half, write_half, handlers).await;
        });
    }
}

/// One connection's lifecycle: read exactly one request, dispatch it, send
/// the response, then keep the writer alive for any follow-up broadcasts
/// until the client disconnects.
async fn handle_connection<R, W>(mut read_half: R, mut write_half: W, handlers: Arc<ApiHandlers>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        while let Some(value) = rx.recv().await {
            if write_frame(&mut write_half, &value).await.is_err() {
                break;
            }
        }
    });

    let conn_id = handlers.pool().next_connection_id();
    let mut subscribed: Option<String> = None;

    match read_frame(&mut read_half).await {
        Ok(request) => {
            let response = dispatch_request(&handlers, request, conn_id, tx.clone(), &mut subscribed).await;
            let _ = tx.send(response);
        }
        Err(e) => {
            let _ = tx.send(json!({"ok": false, "error": e.to_string()}));
        }
    }

    // A subscribed connection only ever sends one request; further reads just
    // detect disconnect so the pool can be pruned promptly.
    while read_frame(&mut read_half).await.is_ok() {}

    if let Some(hash) = subscribed {
        handlers.pool().remove_connection(&hash, conn_id);
    }
    drop(tx);
    let _ = writer.await;
}

async fn dispatch_request(
    handlers: &Arc<ApiHandlers>,
    request: Value,
    conn_id: u64,
    tx: mpsc::UnboundedSender<Value>,
    subscribed: &mut Option<String>,
) -> Value {
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let message = request.get("message").cloned().unwrap_or(Value::Null);

    let handlers_for_blocking = Arc::clone(handlers);
    let outcome = tokio::task::spawn_blocking(move || handlers_for_blocking.dispatch(&method, message)).await;

    match outcome {
        Ok(Ok(result)) => {
            if let Some(hash) = &result.subscribe_hash {
                handlers
                    .pool()
                    .add_connection(hash, Connection { id: conn_id, tx });
                *subscribed = Some(hash.clone());
            }
            json!({"ok": true, "update": {"type": result.type_code, "message": result.message}})
        }
        Ok(Err(e)) => json!({"ok": false, "error": e}),
        Err(e) => json!({"ok": false, "error": format!("handler panicked: {e}")}),
    }
}
