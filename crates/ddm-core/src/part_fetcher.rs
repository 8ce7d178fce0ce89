//! Part Fetcher: fetch one byte range of a URL into a part file.
//!
//! Generalizes the single-segment GET used by the downloader backends with
//! speed-limiting, cooperative cancellation, and progress/error callbacks,
//! wrapped in the shared retry policy. `storage` is the part's own file;
//! all offsets written through it are relative to the part's start, not the
//! final file's start.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::retry::{classify, RetryDecision, RetryPolicy, SegmentError};
use crate::speed_limiter::SpeedLimiter;
use crate::storage::StorageWriter;

/// Parameters for one part fetch.
pub struct PartFetchRequest<'a> {
    pub url: &'a str,
    pub headers: &'a HashMap<String, String>,
    /// Absolute start offset within the final file.
    pub start: u64,
    /// Absolute end offset (exclusive) within the final file.
    pub end: u64,
    /// Bytes already present in the part file (resume offset within the part).
    pub already_downloaded: u64,
    pub request_timeout: Duration,
    /// True when this is the only part of the Item. A 200 response (server
    /// ignored `Range`) is only acceptable when this is set and the request
    /// starts at offset 0; otherwise it's treated as a terminal mismatch.
    pub single_part: bool,
}

/// Fetch one part, retrying transient failures per `policy`. Calls
/// `on_progress(n_new_bytes)` after every chunk actually written, and
/// acquires `n` tokens from `limiter` before each write. Honors `cancel`
/// between chunks and before each retry sleep.
///
/// Returns `Err(SegmentError)` (already retry-exhausted or terminal) on failure.
pub fn fetch_part(
    req: &PartFetchRequest<'_>,
    storage: &StorageWriter,
    limiter: &SpeedLimiter,
    cancel: &Arc<AtomicBool>,
    policy: &RetryPolicy,
    mut on_progress: impl FnMut(u64),
) -> Result<(), SegmentError> {
    let mut attempt = 1u32;
    let mut downloaded = req.already_downloaded;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(SegmentError::Cancelled);
        }
        match fetch_part_once(req, storage, limiter, cancel, downloaded, &mut on_progress) {
            Ok(()) => return Ok(()),
            Err((e, bytes_this_attempt)) => {
                downloaded += bytes_this_attempt;
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        sleep_cancelable(d, cancel);
                        attempt += 1;
                    }
                }
            }
        }
    }
}

fn sleep_cancelable(d: Duration, cancel: &Arc<AtomicBool>) {
    let step = Duration::from_millis(50);
    let mut remaining = d;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        let s = step.min(remaining);
        std::thread::sleep(s);
        remaining -= s;
    }
}

/// Single attempt at fetching `[start+already_downloaded, end)`. On partial
/// failure, returns the number of bytes written during *this* attempt so the
/// caller can update its resume offset before retrying.
fn fetch_part_once(
    req: &PartFetchRequest<'_>,
    storage: &StorageWriter,
    limiter: &SpeedLimiter,
    cancel: &Arc<AtomicBool>,
    already_downloaded: u64,
    on_progress: &mut impl FnMut(u64),
) -> Result<(), (SegmentError, u64)> {
    let range_start = req.start + already_downloaded;
    let expected = req.end.saturating_sub(range_start);
    if expected == 0 {
        return Ok(());
    }

    let bytes_written = Arc::new(AtomicU64::new(0));
    let bytes_written_cb = Arc::clone(&bytes_written);
    let storage_error: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));
    let storage_error_cb = Arc::clone(&storage_error);
    let content_range: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let content_range_cb = Arc::clone(&content_range);
    let limiter = limiter.clone();
    let cancel_cb = Arc::clone(cancel);
    let storage = storage.clone();

    let mut easy = curl::easy::Easy::new();
    (|| -> Result<(), curl::Error> {
        easy.url(req.url)?;
        easy.follow_location(true)?;
        easy.connect_timeout(Duration::from_secs(30))?;
        easy.low_speed_limit(1024)?;
        easy.low_speed_time(Duration::from_secs(60))?;
        easy.timeout(req.request_timeout)?;
        let range_str = format!("{}-{}", range_start, req.end.saturating_sub(1));
        easy.range(&range_str)?;

        let mut list = curl::easy::List::new();
        for (k, v) in req.headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))?;
        }
        if !req.headers.is_empty() {
            easy.http_headers(list)?;
        }
        Ok(())
    })()
    .map_err(|e| (SegmentError::Curl(e), 0))?;

    let local_offset = range_start - req.start;
    let result = {
        let mut transfer = easy.transfer();
        let header_result = transfer.header_function(move |line| {
            if let Ok(text) = std::str::from_utf8(line) {
                if let Some(value) = text.strip_prefix("Content-Range:").or_else(|| text.strip_prefix("content-range:")) {
                    *content_range_cb.lock().unwrap() = Some(value.trim().to_string());
                }
            }
            true
        });
        if let Err(e) = header_result {
            return Err((SegmentError::Curl(e), 0));
        }
        let write_result = transfer.write_function(move |data| {
            if cancel_cb.load(Ordering::Relaxed) {
                return Ok(0);
            }
            if !limiter.acquire(data.len() as u64, &cancel_cb) {
                return Ok(0);
            }
            let off = bytes_written_cb.fetch_add(data.len() as u64, Ordering::Relaxed);
            match storage.write_at(req.start + local_offset + off, data) {
                Ok(()) => Ok(data.len()),
                Err(e) => {
                    let io_err = e
                        .downcast::<std::io::Error>()
                        .unwrap_or_else(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
                    let _ = storage_error_cb.lock().unwrap().replace(io_err);
                    Ok(0)
                }
            }
        });
        match write_result {
            Ok(()) => transfer.perform(),
            Err(e) => Err(e),
        }
    };

    let written = bytes_written.load(Ordering::Relaxed);
    if written > 0 {
        on_progress(written);
    }

    if let Err(e) = result {
        if e.is_write_error() {
            if let Some(io_err) = storage_error.lock().unwrap().take() {
                return Err((SegmentError::Storage(io_err), written));
            }
        }
        return Err((SegmentError::Curl(e), written));
    }

    let code = easy
        .response_code()
        .map_err(|e| (SegmentError::Curl(e), written))? as u32;
    if code < 200 || code >= 300 {
        return Err((SegmentError::Http(code), written));
    }

    if code == 200 {
        if !(req.single_part && range_start == 0) {
            return Err((
                SegmentError::RangeMismatch(format!(
                    "server returned 200 (ignored Range: bytes={}-{}) for a multi-part fetch",
                    range_start,
                    req.end.saturating_sub(1)
                )),
                written,
            ));
        }
    } else if code == 206 {
        let header = content_range.lock().unwrap().clone();
        match header.as_deref().and_then(parse_content_range) {
            Some((start, end)) if start == range_start && end == req.end.saturating_sub(1) => {}
            _ => {
                return Err((
                    SegmentError::RangeMismatch(format!(
                        "Content-Range {:?} does not match requested bytes={}-{}",
                        header,
                        range_start,
                        req.end.saturating_sub(1)
                    )),
                    written,
                ));
            }
        }
    }

    if written != expected {
        return Err((
            SegmentError::PartialTransfer {
                expected,
                received: written,
            },
            written,
        ));
    }

    Ok(())
}

/// Parse a `Content-Range` value of the form `bytes start-end/total` (or
/// `bytes start-end/*`) into `(start, end)`. Any other unit or malformed
/// range returns `None`.
fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let rest = value.trim().strip_prefix("bytes ")?;
    let (range, _total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_request_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.bin");
        let mut builder = crate::storage::StorageWriterBuilder::create(&path).unwrap();
        builder.preallocate(0).unwrap();
        let storage = builder.build();
        let limiter = SpeedLimiter::unlimited();
        let cancel = Arc::new(AtomicBool::new(false));
        let req = PartFetchRequest {
            url: "https://example.invalid/",
            headers: &HashMap::new(),
            start: 10,
            end: 10,
            already_downloaded: 0,
            request_timeout: Duration::from_secs(5),
            single_part: true,
        };
        let mut calls = 0u64;
        let result = fetch_part_once(&req, &storage, &limiter, &cancel, 0, &mut |n| calls += n);
        assert!(result.is_ok());
        assert_eq!(calls, 0);
    }

    #[test]
    fn parses_well_formed_content_range() {
        assert_eq!(parse_content_range("bytes 0-99/200"), Some((0, 99)));
        assert_eq!(parse_content_range("bytes 100-199/*"), Some((100, 199)));
    }

    #[test]
    fn rejects_malformed_content_range() {
        assert_eq!(parse_content_range("bytes */200"), None);
        assert_eq!(parse_content_range("items 0-99/200"), None);
        assert_eq!(parse_content_range("bogus"), None);
    }
}
