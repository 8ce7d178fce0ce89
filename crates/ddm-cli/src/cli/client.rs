//! IPC client: one request per connection, then prints every follow-up
//! `update`/`error` frame until the daemon closes the connection.

use anyhow::{bail, Context, Result};
use ddm_core::config::IpcTransport;
use ddm_core::ipc::frame::{read_frame, write_frame};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};

/// Method codes whose initial response subscribes the connection to further
/// progress broadcasts.
const SUBSCRIBING_METHODS: &[&str] = &["download", "resume", "attach"];

pub async fn call(transport: &IpcTransport, method: &str, message: Value) -> Result<Value> {
    match transport {
        IpcTransport::UnixSocket { path } => {
            let stream = tokio::net::UnixStream::connect(path)
                .await
                .with_context(|| format!("connect to daemon at {}", path.display()))?;
            run_over(stream, method, message).await
        }
        IpcTransport::Tcp { port } => {
            let stream = tokio::net::TcpStream::connect(("127.0.0.1", *port))
                .await
                .with_context(|| format!("connect to daemon on 127.0.0.1:{port}"))?;
            run_over(stream, method, message).await
        }
    }
}

async fn run_over<S>(mut stream: S, method: &str, message: Value) -> Result<Value>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = json!({"method": method, "message": message});
    write_frame(&mut stream, &request).await?;

    let response = read_frame(&mut stream).await.context("daemon closed the connection")?;
    print_frame(&response);
    if response.get("ok").and_then(Value::as_bool) != Some(true) {
        let error = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("daemon returned an error")
            .to_string();
        bail!(error);
    }

    if SUBSCRIBING_METHODS.contains(&method) {
        while let Ok(update) = read_frame(&mut stream).await {
            print_frame(&update);
            if is_terminal(&update) {
                break;
            }
        }
    }

    Ok(response)
}

fn is_terminal(frame: &Value) -> bool {
    if frame.get("ok").and_then(Value::as_bool) == Some(false) {
        return true;
    }
    matches!(
        frame.pointer("/update/type").and_then(Value::as_str),
        Some("complete") | Some("stopped")
    )
}

fn print_frame(frame: &Value) {
    println!("{}", serde_json::to_string_pretty(frame).unwrap_or_else(|_| frame.to_string()));
}
