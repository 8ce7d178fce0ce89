//! Downloader (C3): drives probe, part fan-out, and compile for one Item.
//!
//! Each part gets its own on-disk file under `data/<hash>/<offset>` and is
//! fetched by a Part Fetcher worker thread; up to `item.max_connections`
//! workers pull from a shared queue, modeled on the bounded thread-pool
//! pattern the segment downloader used before per-part files replaced the
//! single preallocated file. Once every part is complete the Downloader
//! streams them into the final destination via `storage::compile_parts`.

mod single;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use crate::fetch_head::{self, HeadResult};
use crate::model::{Item, Part};
use crate::part_fetcher::{fetch_part, PartFetchRequest};
use crate::retry::{RetryPolicy, SegmentError};
use crate::segmenter::plan_segments;
use crate::speed_limiter::SpeedLimiter;
use crate::storage::{self, StorageWriter, StorageWriterBuilder};

pub use single::download_single;

/// Callbacks fired while a Downloader drives one Item. Implementors should
/// be cheap and non-blocking; heavier work (persistence, IPC fanout) belongs
/// to the Manager that owns the `DownloadEvents` impl.
pub trait DownloadEvents: Send + Sync {
    fn error(&self, hash: &str, message: &str);
    fn download_progress(&self, hash: &str, downloaded: u64, total_size: u64);
    fn download_complete(&self, hash: &str, total_bytes: u64);
    fn download_stopped(&self, hash: &str);
    fn compile_start(&self, hash: &str);
    fn compile_progress(&self, hash: &str, written: u64, total_size: u64);
    fn compile_complete(&self, hash: &str);
}

/// Tuning shared by every Part Fetch a Downloader runs.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(3600),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Outcome of one `Downloader::run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// All parts fetched and compiled into the destination file.
    Completed,
    /// Stopped via the cancel token before completion; progress persisted.
    Stopped,
    /// A part exhausted its retries with a terminal error.
    Failed,
}

pub struct Downloader {
    limiter: SpeedLimiter,
    config: DownloaderConfig,
}

impl Downloader {
    pub fn new(limiter: SpeedLimiter, config: DownloaderConfig) -> Self {
        Self { limiter, config }
    }

    /// HEAD-probe a URL for size, resumability, and cache-validator headers.
    pub fn probe(&self, url: &str, headers: &HashMap<String, String>) -> Result<HeadResult> {
        fetch_head::probe(url, headers)
    }

    /// Build an Item's initial part plan. Falls back to a single whole-file
    /// part when the item isn't resumable or `segment_count` is 1.
    pub fn plan_parts(
        data_dir: &std::path::Path,
        hash: &str,
        total_size: u64,
        segment_count: usize,
        resumable: bool,
    ) -> HashMap<u64, Part> {
        let segment_count = if resumable { segment_count.max(1) } else { 1 };
        plan_segments(total_size, segment_count)
            .into_iter()
            .map(|s| {
                let path = storage::part_path(data_dir, hash, s.start);
                (
                    s.start,
                    Part {
                        offset: s.start,
                        size: s.len(),
                        downloaded: 0,
                        path,
                    },
                )
            })
            .collect()
    }

    /// Fetch every incomplete part of `item`, then compile. Blocking; call
    /// from a dedicated worker thread. `on_part_progress(offset, new_bytes)`
    /// is called from worker threads as bytes land, so the caller can persist
    /// progress; `events` carries the higher-level lifecycle notifications.
    pub fn run(
        &self,
        item: &Item,
        events: &Arc<dyn DownloadEvents>,
        cancel: Arc<AtomicBool>,
        on_part_progress: Arc<dyn Fn(u64, u64) + Send + Sync>,
    ) -> Result<DownloadOutcome> {
        let parts = item.parts_in_order();
        let incomplete: VecDeque<Part> = parts
            .into_iter()
            .filter(|p| !p.is_complete())
            .cloned()
            .collect();

        if incomplete.is_empty() {
            return self.compile(item, events);
        }

        if !item.resumable {
            return self.run_single(item, &incomplete, events, cancel, on_part_progress);
        }

        let queue = Arc::new(Mutex::new(incomplete));
        let worker_count = item
            .max_connections
            .max(1)
            .min(queue.lock().unwrap().len());
        let (tx, rx) = std::sync::mpsc::channel::<Result<(), SegmentError>>();
        let single_part = item.parts.len() == 1;

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let url = item.url.clone();
            let headers = item.headers.clone();
            let limiter = self.limiter.clone();
            let policy = self.config.retry_policy;
            let timeout = self.config.request_timeout;
            let cancel = Arc::clone(&cancel);
            let on_part_progress = Arc::clone(&on_part_progress);
            let events = Arc::clone(events);
            let hash = item.hash.clone();

            handles.push(std::thread::spawn(move || loop {
                let part = {
                    let mut q = queue.lock().unwrap();
                    match q.pop_front() {
                        Some(p) => p,
                        None => break,
                    }
                };
                if cancel.load(Ordering::Relaxed) {
                    let _ = tx.send(Err(SegmentError::Cancelled));
                    break;
                }
                let storage = match open_part_storage(&part) {
                    Ok(s) => s,
                    Err(e) => {
                        events.error(&hash, &e.to_string());
                        let _ = tx.send(Err(SegmentError::Storage(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            e.to_string(),
                        ))));
                        continue;
                    }
                };
                let req = PartFetchRequest {
                    url: &url,
                    headers: &headers,
                    start: part.offset,
                    end: part.offset + part.size,
                    already_downloaded: part.downloaded,
                    request_timeout: timeout,
                    single_part,
                };
                let offset = part.offset;
                let result = fetch_part(&req, &storage, &limiter, &cancel, &policy, |n| {
                    on_part_progress(offset, n);
                });
                if let Err(e) = &result {
                    if !matches!(e, SegmentError::Cancelled) {
                        events.error(&hash, &e.to_string());
                    }
                }
                let _ = tx.send(result);
            }));
        }
        drop(tx);

        let mut had_error = false;
        let mut was_cancelled = false;
        for r in rx {
            match r {
                Ok(()) => {}
                Err(SegmentError::Cancelled) => was_cancelled = true,
                Err(_) => had_error = true,
            }
        }
        for h in handles {
            let _ = h.join();
        }

        if was_cancelled || cancel.load(Ordering::Relaxed) {
            events.download_stopped(&item.hash);
            return Ok(DownloadOutcome::Stopped);
        }
        if had_error {
            return Ok(DownloadOutcome::Failed);
        }

        self.compile(item, events)
    }

    /// Non-resumable fallback: a plain sequential GET into the (single) part file.
    fn run_single(
        &self,
        item: &Item,
        incomplete: &VecDeque<Part>,
        events: &Arc<dyn DownloadEvents>,
        cancel: Arc<AtomicBool>,
        on_part_progress: Arc<dyn Fn(u64, u64) + Send + Sync>,
    ) -> Result<DownloadOutcome> {
        let part = incomplete.front().expect("checked non-empty by caller");
        let storage = open_part_storage(part)?;
        let offset = part.offset;
        let result = single::download_single(
            &item.url,
            &item.headers,
            &storage,
            Some(part.size),
            &self.limiter,
            &cancel,
            self.config.request_timeout,
            |n| on_part_progress(offset, n),
        );

        match result {
            Ok(_) => self.compile(item, events),
            Err(e) if cancel.load(Ordering::Relaxed) => {
                let _ = e;
                events.download_stopped(&item.hash);
                Ok(DownloadOutcome::Stopped)
            }
            Err(e) => {
                events.error(&item.hash, &e.to_string());
                Ok(DownloadOutcome::Failed)
            }
        }
    }

    fn compile(&self, item: &Item, events: &Arc<dyn DownloadEvents>) -> Result<DownloadOutcome> {
        let total = item.total_size;
        events.download_complete(&item.hash, total);
        events.compile_start(&item.hash);
        let parts = item.parts_in_order();
        let mut written = 0u64;
        let result = storage::compile_parts(&parts, &item.absolute_location, |n| {
            written += n;
            events.compile_progress(&item.hash, written, total);
        });
        match result {
            Ok(()) => {
                events.compile_complete(&item.hash);
                Ok(DownloadOutcome::Completed)
            }
            Err(e) => {
                events.error(&item.hash, &e.to_string());
                Ok(DownloadOutcome::Failed)
            }
        }
    }
}

fn open_part_storage(part: &Part) -> Result<StorageWriter> {
    if let Some(parent) = part.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if part.path.exists() {
        StorageWriter::open_existing(&part.path)
    } else {
        let mut builder = StorageWriterBuilder::create(&part.path)?;
        builder.preallocate(part.size)?;
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, ScheduleState};
    use std::sync::atomic::AtomicU64;

    struct RecordingEvents {
        completed: AtomicBool,
        compiled: AtomicBool,
        progress_calls: AtomicU64,
    }

    impl Default for RecordingEvents {
        fn default() -> Self {
            Self {
                completed: AtomicBool::new(false),
                compiled: AtomicBool::new(false),
                progress_calls: AtomicU64::new(0),
            }
        }
    }

    impl DownloadEvents for RecordingEvents {
        fn error(&self, _hash: &str, _message: &str) {}
        fn download_progress(&self, _hash: &str, _downloaded: u64, _total_size: u64) {
            self.progress_calls.fetch_add(1, Ordering::Relaxed);
        }
        fn download_complete(&self, _hash: &str, _total_bytes: u64) {
            self.completed.store(true, Ordering::Relaxed);
        }
        fn download_stopped(&self, _hash: &str) {}
        fn compile_start(&self, _hash: &str) {}
        fn compile_progress(&self, _hash: &str, _written: u64, _total_size: u64) {}
        fn compile_complete(&self, _hash: &str) {
            self.compiled.store(true, Ordering::Relaxed);
        }
    }

    fn item_with_one_complete_part(dir: &std::path::Path) -> Item {
        let part_path = dir.join("part0");
        std::fs::write(&part_path, b"hello world").unwrap();
        let mut parts = HashMap::new();
        parts.insert(
            0,
            Part {
                offset: 0,
                size: 11,
                downloaded: 11,
                path: part_path,
            },
        );
        Item {
            hash: "abc".to_string(),
            url: "https://example.invalid/file".to_string(),
            name: "file".to_string(),
            download_location: dir.to_path_buf(),
            absolute_location: dir.join("out.bin"),
            total_size: 11,
            downloaded: 11,
            resumable: true,
            force_parts: false,
            max_connections: 4,
            max_segments: 1,
            parts,
            child_hash: None,
            hidden: false,
            children: Vec::new(),
            date_added: chrono::Utc::now(),
            priority: Priority::Normal,
            schedule_state: ScheduleState::None,
            scheduled_at: None,
            cron_expr: None,
            headers: HashMap::new(),
            cookie_source_path: None,
            etag: None,
            last_modified: None,
            completed: false,
            stopped: false,
        }
    }

    #[test]
    fn run_with_all_parts_complete_goes_straight_to_compile() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_with_one_complete_part(dir.path());
        let downloader = Downloader::new(SpeedLimiter::unlimited(), DownloaderConfig::default());
        let events: Arc<dyn DownloadEvents> = Arc::new(RecordingEvents::default());
        let outcome = downloader
            .run(
                &item,
                &events,
                Arc::new(AtomicBool::new(false)),
                Arc::new(|_, _| {}),
            )
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Completed);
        assert!(item.absolute_location.exists());
        assert_eq!(std::fs::read(&item.absolute_location).unwrap(), b"hello world");
    }

    #[test]
    fn plan_parts_falls_back_to_one_part_when_not_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let parts = Downloader::plan_parts(dir.path(), "abc", 1000, 4, false);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[&0].size, 1000);
    }

    #[test]
    fn plan_parts_splits_when_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let parts = Downloader::plan_parts(dir.path(), "abc", 1000, 4, true);
        assert_eq!(parts.len(), 4);
    }
}
