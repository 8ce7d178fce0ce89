//! Item Store (C4): persisted registry of downloads and parts.
//!
//! Backed by a single append-mostly binary log (`userdata.warp`) rather than
//! a SQL database: the wire-visible persisted state layout is part of the
//! contract this daemon keeps with its CLI collaborator, and that contract
//! names a log file, not a database. Mutation is write-through and
//! single-writer: every call takes the same mutex that guards the in-memory
//! map, so concurrent Manager calls serialize naturally.

mod log;

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::model::Item;
use log::LogRecord;

pub struct ItemStore {
    log_path: PathBuf,
    data_dir: PathBuf,
    file: Mutex<File>,
    items: Mutex<HashMap<String, Item>>,
}

/// Default state directory (`userdata.warp` and `data/` live directly under
/// this), the same XDG state home other daemon components use.
pub fn default_state_dir() -> Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("ddm")?.get_state_home();
    Ok(dir)
}

impl ItemStore {
    /// Open (or create) the store rooted at `state_dir`, with part files
    /// under `state_dir/data/`.
    pub fn init(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        let log_path = state_dir.join("userdata.warp");
        let data_dir = state_dir.join("data");
        std::fs::create_dir_all(&data_dir).context("create data dir")?;

        let records = log::replay(&log_path)?;
        let mut items = HashMap::new();
        for record in records {
            match record {
                LogRecord::Upsert(item) => {
                    items.insert(item.hash.clone(), item);
                }
                LogRecord::Tombstone(hash) => {
                    items.remove(&hash);
                }
            }
        }

        let file = File::options()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("open {}", log_path.display()))?;

        Ok(Self {
            log_path,
            data_dir,
            file: Mutex::new(file),
            items: Mutex::new(items),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn part_dir(&self, hash: &str) -> PathBuf {
        crate::storage::part_dir(&self.data_dir, hash)
    }

    /// Atomically update (insert or replace) one Item's record.
    pub fn update_item(&self, item: Item) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        log::append(&mut file, &LogRecord::Upsert(item.clone()))?;
        self.items.lock().unwrap().insert(item.hash.clone(), item);
        Ok(())
    }

    pub fn get_item(&self, hash: &str) -> Option<Item> {
        self.items.lock().unwrap().get(hash).cloned()
    }

    pub fn get_items(&self) -> Vec<Item> {
        self.items.lock().unwrap().values().cloned().collect()
    }

    pub fn get_completed_items(&self) -> Vec<Item> {
        self.items
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.completed)
            .cloned()
            .collect()
    }

    pub fn get_incomplete_items(&self) -> Vec<Item> {
        self.items
            .lock()
            .unwrap()
            .values()
            .filter(|i| !i.completed)
            .cloned()
            .collect()
    }

    /// Remove one Item and its part directory.
    pub fn flush_one(&self, hash: &str) -> Result<()> {
        {
            let mut file = self.file.lock().unwrap();
            log::append(&mut file, &LogRecord::Tombstone(hash.to_string()))?;
        }
        self.items.lock().unwrap().remove(hash);
        let dir = self.part_dir(hash);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("remove part dir {}", dir.display()))?;
        }
        Ok(())
    }

    /// Remove every Item and its part directory, truncating the log.
    pub fn flush(&self) -> Result<()> {
        let hashes: Vec<String> = self.items.lock().unwrap().keys().cloned().collect();
        for hash in hashes {
            let dir = self.part_dir(&hash);
            if dir.exists() {
                let _ = std::fs::remove_dir_all(&dir);
            }
        }
        self.items.lock().unwrap().clear();
        let mut file = self.file.lock().unwrap();
        *file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.log_path)
            .with_context(|| format!("truncate {}", self.log_path.display()))?;
        // Re-open in append mode so subsequent appends don't re-truncate.
        *file = File::options()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("reopen {}", self.log_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, ScheduleState};

    fn sample_item(hash: &str) -> Item {
        Item {
            hash: hash.to_string(),
            url: "https://example.com/file".to_string(),
            name: "file".to_string(),
            download_location: "/tmp".into(),
            absolute_location: "/tmp".into(),
            total_size: 100,
            downloaded: 0,
            resumable: true,
            force_parts: false,
            max_connections: 4,
            max_segments: 4,
            parts: HashMap::new(),
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
    fn update_and_get_item() {
        let dir = tempfile::tempdir().unwrap();
        let store = ItemStore::init(dir.path()).unwrap();
        store.update_item(sample_item("abc")).unwrap();
        let item = store.get_item("abc").unwrap();
        assert_eq!(item.url, "https://example.com/file");
    }

    #[test]
    fn reload_from_disk_replays_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ItemStore::init(dir.path()).unwrap();
            store.update_item(sample_item("abc")).unwrap();
        }
        let store2 = ItemStore::init(dir.path()).unwrap();
        assert!(store2.get_item("abc").is_some());
    }

    #[test]
    fn flush_one_removes_item_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ItemStore::init(dir.path()).unwrap();
        store.update_item(sample_item("abc")).unwrap();
        std::fs::create_dir_all(store.part_dir("abc")).unwrap();
        store.flush_one("abc").unwrap();
        assert!(store.get_item("abc").is_none());
        assert!(!store.part_dir("abc").exists());

        let store2 = ItemStore::init(dir.path()).unwrap();
        assert!(store2.get_item("abc").is_none());
    }

    #[test]
    fn flush_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = ItemStore::init(dir.path()).unwrap();
        store.update_item(sample_item("a")).unwrap();
        store.update_item(sample_item("b")).unwrap();
        store.flush().unwrap();
        assert!(store.get_items().is_empty());

        let store2 = ItemStore::init(dir.path()).unwrap();
        assert!(store2.get_items().is_empty());
    }

    #[test]
    fn completed_and_incomplete_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = ItemStore::init(dir.path()).unwrap();
        let mut done = sample_item("done");
        done.completed = true;
        store.update_item(done).unwrap();
        store.update_item(sample_item("pending")).unwrap();

        assert_eq!(store.get_completed_items().len(), 1);
        assert_eq!(store.get_incomplete_items().len(), 1);
    }
}
