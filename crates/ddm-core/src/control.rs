//! Job control for stop/cancel: shared abort tokens keyed by item hash.
//!
//! Every running download is registered with an abort token before its
//! Part Fetchers are spawned. The `stop` API handler calls `request_abort`;
//! Part Fetchers and the compile step check the token between chunks and
//! stop cooperatively, leaving progress persisted for a later `resume`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Error returned when a download is stopped by the user.
#[derive(Debug)]
pub struct JobAborted;

impl std::fmt::Display for JobAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job aborted by user")
    }
}

impl std::error::Error for JobAborted {}

/// Shared registry of item hash -> abort token.
#[derive(Default)]
pub struct JobControl {
    jobs: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running item; returns the abort token to pass to its Part Fetchers.
    pub fn register(&self, hash: &str) -> Arc<AtomicBool> {
        let token = Arc::new(AtomicBool::new(false));
        self.jobs
            .write()
            .unwrap()
            .insert(hash.to_string(), Arc::clone(&token));
        token
    }

    /// Unregister an item (call when it finishes, stops, or errors).
    pub fn unregister(&self, hash: &str) {
        self.jobs.write().unwrap().remove(hash);
    }

    /// Request abort for a running item. The Part Fetchers see the token set
    /// and stop between chunks; progress already written stays on disk.
    pub fn request_abort(&self, hash: &str) {
        if let Some(token) = self.jobs.read().unwrap().get(hash) {
            token.store(true, Ordering::Relaxed);
        }
    }

    pub fn is_running(&self, hash: &str) -> bool {
        self.jobs.read().unwrap().contains_key(hash)
    }
}

/// Default path for the IPC socket (same XDG state dir as the Item Store).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("ddm")?.get_state_home();
    Ok(dir.join("ddmd.sock"))
}
