//! Compares stored job metadata with current HEAD result for safe resume.

mod error;

use crate::fetch_head::HeadResult;
use crate::model::Item;

pub use error::{ValidationError, ValidationErrorKind};

/// Returns Ok(()) if `item` can be safely resumed against the current HEAD result.
///
/// If the item has no stored metadata (never probed), returns Ok(()) so the caller
/// can proceed with initial probe and segment planning. Otherwise compares ETag,
/// Last-Modified, and size; returns Err(ValidationError) if any differ.
pub fn validate_for_resume(item: &Item, head: &HeadResult) -> Result<(), ValidationError> {
    let has_stored = item.total_size > 0 || item.etag.is_some() || item.last_modified.is_some();

    if !has_stored {
        return Ok(());
    }

    let etag_changed = match (&item.etag, &head.etag) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    };

    let last_modified_changed = match (&item.last_modified, &head.last_modified) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    };

    let stored_size = if item.total_size > 0 {
        Some(item.total_size)
    } else {
        None
    };
    let size_changed = match (stored_size, head.content_length) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    };

    if etag_changed || last_modified_changed || size_changed {
        return Err(ValidationError {
            kind: ValidationErrorKind::RemoteChanged {
                etag_changed,
                last_modified_changed,
                size_changed,
            },
        });
    }

    Ok(())
}
