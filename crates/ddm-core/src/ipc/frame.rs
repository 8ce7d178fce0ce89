//! Wire framing: 4-byte little-endian length prefix, then a UTF-8 JSON payload.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Frames larger than this are rejected rather than allocated.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Value> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .context("read frame length")?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        bail!("frame length {len} exceeds {MAX_FRAME_LEN} byte limit");
    }
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .context("read frame payload")?;
    serde_json::from_slice(&payload).context("parse frame JSON")
}

pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, value: &Value) -> Result<()> {
    let payload = serde_json::to_vec(value).context("serialize frame JSON")?;
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        bail!("frame length {} exceeds {MAX_FRAME_LEN} byte limit", payload.len());
    }
    let len = (payload.len() as u32).to_le_bytes();
    writer.write_all(&len).await.context("write frame length")?;
    writer.write_all(&payload).await.context("write frame payload")?;
    writer.flush().await.context("flush frame")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_through_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let value = serde_json::json!({"method": "version", "message": {}});
        write_frame(&mut a, &value).await.unwrap();
        let got = read_frame(&mut b).await.unwrap();
        assert_eq!(got, value);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(16);
        let len = (MAX_FRAME_LEN + 1).to_le_bytes();
        a.write_all(&len).await.unwrap();
        drop(a);
        assert!(read_frame(&mut b).await.is_err());
    }
}
