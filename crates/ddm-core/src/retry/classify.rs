//! Classify HTTP status and curl errors into retry policy error kinds.

use super::error::SegmentError;
use crate::retry::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        408 | 429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

/// Classify a segment error into an ErrorKind. Partial transfers are treated
/// like connection failures (retryable); storage failures are not retried.
/// Cancellation is classified as `Other` (not retried) since the retry loop
/// should short-circuit on it before consulting the policy at all.
pub fn classify(e: &SegmentError) -> ErrorKind {
    match e {
        SegmentError::Curl(ce) => classify_curl_error(ce),
        SegmentError::Http(code) => classify_http_status(*code),
        SegmentError::PartialTransfer { .. } => ErrorKind::Connection,
        SegmentError::Storage(_) => ErrorKind::Other,
        SegmentError::Cancelled => ErrorKind::Other,
        SegmentError::RangeMismatch(_) => ErrorKind::Other,
    }
}
