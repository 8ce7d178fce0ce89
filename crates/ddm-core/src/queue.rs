//! Download Queue (C5): priority admission control.
//!
//! Guarded by a single mutex, never held across I/O. Waiting order is
//! stable-by-insertion within a priority tier; `move` overrides that order
//! for the touched hash until it is promoted.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::model::Priority;

#[derive(Debug, Clone)]
struct Waiting {
    hash: String,
    priority: Priority,
}

struct Inner {
    max_concurrent: usize,
    active: Vec<String>,
    waiting: VecDeque<Waiting>,
    paused: bool,
}

/// Admission-controlled queue of download hashes.
pub struct DownloadQueue {
    inner: Mutex<Inner>,
}

/// Snapshot of one waiting entry, for `queue.status`.
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub hash: String,
    pub priority: Priority,
    pub position: usize,
}

impl DownloadQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                max_concurrent: max_concurrent.max(1),
                active: Vec::new(),
                waiting: VecDeque::new(),
                paused: false,
            }),
        }
    }

    /// Insert `hash` into the waiting list at its priority-sorted position.
    fn insert_waiting(inner: &mut Inner, hash: String, priority: Priority) {
        let pos = inner
            .waiting
            .iter()
            .position(|w| w.priority < priority)
            .unwrap_or(inner.waiting.len());
        inner.waiting.insert(pos, Waiting { hash, priority });
    }

    /// Admit `hash` if room allows and the queue is not paused; otherwise enqueue.
    /// Returns `true` if admitted to active immediately.
    pub fn add(&self, hash: &str, priority: Priority) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.paused && inner.active.len() < inner.max_concurrent {
            inner.active.push(hash.to_string());
            true
        } else {
            Self::insert_waiting(&mut inner, hash.to_string(), priority);
            false
        }
    }

    /// Mark `hash` complete (or stopped) and, if not paused, promote the next
    /// waiting entry. Returns the promoted hash, if any.
    pub fn complete(&self, hash: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.active.retain(|h| h != hash);
        if inner.paused {
            return None;
        }
        if inner.active.len() >= inner.max_concurrent {
            return None;
        }
        let promoted = inner.waiting.pop_front()?;
        inner.active.push(promoted.hash.clone());
        Some(promoted.hash)
    }

    /// Stop auto-promotion. Completions while paused do not promote.
    pub fn pause(&self) {
        self.inner.lock().unwrap().paused = true;
    }

    /// Resume auto-promotion, filling active slots from the waiting list.
    /// Returns every hash promoted as a result.
    pub fn resume(&self) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.paused = false;
        let mut promoted = Vec::new();
        while inner.active.len() < inner.max_concurrent {
            match inner.waiting.pop_front() {
                Some(w) => {
                    inner.active.push(w.hash.clone());
                    promoted.push(w.hash);
                }
                None => break,
            }
        }
        promoted
    }

    /// Move `hash` within the waiting list to `position` (0-based). Errors if
    /// `hash` is active or not present in the waiting list.
    pub fn move_to(&self, hash: &str, position: usize) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.active.iter().any(|h| h == hash) {
            anyhow::bail!("{hash} is active, cannot reorder");
        }
        let idx = inner
            .waiting
            .iter()
            .position(|w| w.hash == hash)
            .ok_or_else(|| anyhow::anyhow!("{hash} not found in waiting list"))?;
        let entry = inner.waiting.remove(idx).unwrap();
        let position = position.min(inner.waiting.len());
        inner.waiting.insert(position, entry);
        Ok(())
    }

    pub fn get_active_hashes(&self) -> Vec<String> {
        self.inner.lock().unwrap().active.clone()
    }

    pub fn get_waiting_items(&self) -> Vec<WaitingEntry> {
        self.inner
            .lock()
            .unwrap()
            .waiting
            .iter()
            .enumerate()
            .map(|(position, w)| WaitingEntry {
                hash: w.hash.clone(),
                priority: w.priority,
                position,
            })
            .collect()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.lock().unwrap().max_concurrent
    }

    pub fn set_max_concurrent(&self, n: usize) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.max_concurrent = n.max(1);
        let mut promoted = Vec::new();
        if !inner.paused {
            while inner.active.len() < inner.max_concurrent {
                match inner.waiting.pop_front() {
                    Some(w) => {
                        inner.active.push(w.hash.clone());
                        promoted.push(w.hash);
                    }
                    None => break,
                }
            }
        }
        promoted
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().active.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.inner.lock().unwrap().waiting.len()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().unwrap().paused
    }
}
