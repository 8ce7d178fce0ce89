//! Error taxonomy shared across the daemon.
//!
//! `DdmError` is the stable kind surfaced over IPC and used to decide retry
//! and broadcast behaviour. Leaf errors (e.g. `SegmentError`) are classified
//! into one of these before crossing a component boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DdmError {
    /// Missing argument, malformed URL, unknown hash, illegal flag combination.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Retryable: network reset, DNS failure, 5xx, 408, 429.
    #[error("transient error: {0}")]
    Transient(String),

    /// Not retryable at the fetch level: 4xx (other than 408/429), range
    /// unsupported on a multi-part plan, content-length mismatch.
    #[error("terminal fetch error: {0}")]
    TerminalFetch(String),

    /// Part-file or Item Store write failure. Treated as `TerminalFetch`.
    #[error("storage error: {0}")]
    Storage(String),

    /// The Downloader was stopped by the user; not a failure.
    #[error("cancelled")]
    Cancelled,

    /// Rejected at request entry; never partially applied.
    #[error("config error: {0}")]
    ConfigError(String),
}

impl DdmError {
    /// True if this kind should suppress a `download_error` broadcast
    /// (the Downloader was stopped intentionally).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DdmError::Cancelled)
    }

    /// Map a `retry::ErrorKind` + final-retry-exhausted segment error into a `DdmError`.
    pub fn from_segment_error(e: &crate::retry::SegmentError) -> Self {
        use crate::retry::SegmentError as SE;
        match e {
            SE::Cancelled => DdmError::Cancelled,
            SE::Storage(io) => DdmError::Storage(io.to_string()),
            SE::Http(code) if (400..500).contains(code) && *code != 408 && *code != 429 => {
                DdmError::TerminalFetch(format!("HTTP {code}"))
            }
            SE::RangeMismatch(reason) => DdmError::TerminalFetch(reason.clone()),
            other => DdmError::Transient(other.to_string()),
        }
    }
}

pub type DdmResult<T> = Result<T, DdmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_cancelled() {
        assert!(DdmError::Cancelled.is_cancelled());
        assert!(!DdmError::Storage("x".into()).is_cancelled());
    }

    #[test]
    fn client_error_is_terminal() {
        let e = crate::retry::SegmentError::Http(404);
        assert!(matches!(
            DdmError::from_segment_error(&e),
            DdmError::TerminalFetch(_)
        ));
    }

    #[test]
    fn throttle_status_is_transient() {
        let e = crate::retry::SegmentError::Http(429);
        assert!(matches!(
            DdmError::from_segment_error(&e),
            DdmError::Transient(_)
        ));
    }
}
