//! Data model: `Item`, `Part`, and related enums.
//!
//! An `Item` is the persistent record of one logical download. It is mutated
//! only through the Manager and never constructed directly by a handler.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Download priority. Higher variants sort first in the waiting queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Schedule lifecycle for a download created with `--start-at`/`--start-in`/`--schedule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleState {
    /// Not schedule-driven; started immediately or already running.
    None,
    /// Waiting for `scheduled_at` (or the next cron occurrence) to fire.
    Scheduled,
    /// The scheduler has fired this item and handed it to the Manager.
    Triggered,
    /// `scheduled_at` was in the past when the daemon started; fired immediately on recovery.
    Missed,
    /// Cancelled via `stop` before it fired.
    Cancelled,
}

impl Default for ScheduleState {
    fn default() -> Self {
        ScheduleState::None
    }
}

/// One contiguous byte range of the target file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    /// Offset of this part within the final file.
    pub offset: u64,
    /// Total size of this part.
    pub size: u64,
    /// Bytes fetched so far for this part.
    pub downloaded: u64,
    /// Path to this part's on-disk file, under `data/<hash>/`.
    pub path: std::path::PathBuf,
}

impl Part {
    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.size
    }
}

/// The persistent record of one logical download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Stable 16-hex-char identifier, assigned at creation.
    pub hash: String,
    pub url: String,
    pub name: String,
    pub download_location: std::path::PathBuf,
    pub absolute_location: std::path::PathBuf,
    pub total_size: u64,
    pub downloaded: u64,
    pub resumable: bool,
    pub force_parts: bool,
    pub max_connections: usize,
    pub max_segments: usize,
    /// Parts keyed by offset.
    pub parts: HashMap<u64, Part>,
    pub child_hash: Option<String>,
    pub hidden: bool,
    pub children: Vec<String>,
    pub date_added: DateTime<Utc>,
    pub priority: Priority,
    pub schedule_state: ScheduleState,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub cron_expr: Option<String>,
    pub headers: HashMap<String, String>,
    pub cookie_source_path: Option<String>,
    /// ETag observed at probe time, used by safe-resume validation.
    pub etag: Option<String>,
    /// Last-Modified observed at probe time, used by safe-resume validation.
    pub last_modified: Option<String>,
    /// True once all parts are complete and the file has been compiled.
    pub completed: bool,
    /// True if the download was explicitly stopped (paused) by the user.
    pub stopped: bool,
}

impl Item {
    /// Sum of `parts[*].downloaded`. Should equal `downloaded` by invariant.
    pub fn parts_downloaded(&self) -> u64 {
        self.parts.values().map(|p| p.downloaded).sum()
    }

    /// True once every part has reached its target size.
    pub fn all_parts_complete(&self) -> bool {
        !self.parts.is_empty() && self.parts.values().all(Part::is_complete)
    }

    /// Parts in ascending offset order, for compilation.
    pub fn parts_in_order(&self) -> Vec<&Part> {
        let mut v: Vec<&Part> = self.parts.values().collect();
        v.sort_by_key(|p| p.offset);
        v
    }
}
