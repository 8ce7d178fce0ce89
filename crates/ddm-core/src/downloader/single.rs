//! Single-stream HTTP GET (non-Range fallback).
//!
//! Used when a probe reports the server does not accept ranges, or when a
//! download is explicitly not resumable. Writes the response body
//! sequentially to storage starting at offset 0; cannot be paused and
//! resumed mid-part the way ranged Part Fetches can, since there is no
//! Range header to resume from.

use std::collections::HashMap;
use std::str;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::speed_limiter::SpeedLimiter;
use crate::storage::StorageWriter;

/// Downloads `url` with a single GET (no Range), writing sequentially to
/// `storage`. Honors `limiter` and `cancel` the same way Part Fetches do.
/// Returns the number of bytes written.
pub fn download_single(
    url: &str,
    custom_headers: &HashMap<String, String>,
    storage: &StorageWriter,
    expected_len: Option<u64>,
    limiter: &SpeedLimiter,
    cancel: &Arc<AtomicBool>,
    request_timeout: Duration,
    mut on_progress: impl FnMut(u64),
) -> Result<u64> {
    let offset = Arc::new(AtomicU64::new(0));
    let offset_cb = Arc::clone(&offset);
    let storage_error: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));
    let storage_error_cb = Arc::clone(&storage_error);
    let storage = storage.clone();
    let limiter = limiter.clone();
    let cancel_cb = Arc::clone(cancel);

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(Duration::from_secs(30))?;
    easy.low_speed_limit(1024)
        .map_err(|e| anyhow::anyhow!("curl: {}", e))?;
    easy.low_speed_time(Duration::from_secs(60))?;
    easy.timeout(request_timeout)?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.write_function(move |data| {
            if cancel_cb.load(Ordering::Relaxed) {
                return Ok(0);
            }
            if !limiter.acquire(data.len() as u64, &cancel_cb) {
                return Ok(0);
            }
            let off = offset_cb.fetch_add(data.len() as u64, Ordering::Relaxed);
            match storage.write_at(off, data) {
                Ok(()) => Ok(data.len()),
                Err(e) => {
                    let io_err = e
                        .downcast::<std::io::Error>()
                        .unwrap_or_else(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
                    let _ = storage_error_cb.lock().unwrap().replace(io_err);
                    Ok(0)
                }
            }
        })?;
        transfer.perform().context("GET request failed")?;
    }

    let written = offset.load(Ordering::Relaxed);
    if written > 0 {
        on_progress(written);
    }

    if cancel.load(Ordering::Relaxed) {
        anyhow::bail!("cancelled");
    }
    if let Some(io_err) = storage_error.lock().unwrap().take() {
        return Err(io_err).context("storage write failed");
    }

    let code = easy.response_code().context("no response code")?;
    if code < 200 || code >= 300 {
        anyhow::bail!("GET {} returned HTTP {}", url, code);
    }

    if let Some(exp) = expected_len {
        if written != exp {
            anyhow::bail!("partial transfer: wrote {} of {}", written, exp);
        }
    }
    Ok(written)
}
