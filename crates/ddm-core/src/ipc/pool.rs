//! Subscription pool: hash -> connections watching that download's updates.
//!
//! Guarded by a single read-write lock, per the concurrency model: broadcast
//! takes a read lock, add/remove take a write lock, and no I/O happens while
//! either is held (writes are handed off to each connection's own mpsc
//! channel, which its writer task drains independently).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// One connection attached to a download's update stream.
#[derive(Clone)]
pub struct Connection {
    pub id: u64,
    pub tx: UnboundedSender<Value>,
}

#[derive(Default)]
pub struct SubscriptionPool {
    by_hash: RwLock<HashMap<String, Vec<Connection>>>,
    next_id: AtomicU64,
}

impl SubscriptionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Attach the first connection for a newly-started download, creating its entry.
    pub fn add_download(&self, hash: &str, conn: Connection) {
        self.by_hash
            .write()
            .unwrap()
            .entry(hash.to_string())
            .or_default()
            .push(conn);
    }

    /// Attach an additional watcher (e.g. from `attach`) to an existing download.
    pub fn add_connection(&self, hash: &str, conn: Connection) {
        self.add_download(hash, conn);
    }

    pub fn has_download(&self, hash: &str) -> bool {
        self.by_hash.read().unwrap().contains_key(hash)
    }

    /// Detach one connection (on disconnect) without disturbing the rest.
    pub fn remove_connection(&self, hash: &str, conn_id: u64) {
        let mut by_hash = self.by_hash.write().unwrap();
        if let Some(conns) = by_hash.get_mut(hash) {
            conns.retain(|c| c.id != conn_id);
            if conns.is_empty() {
                by_hash.remove(hash);
            }
        }
    }

    /// Drop every connection attached to `hash`.
    pub fn stop_download(&self, hash: &str) {
        self.by_hash.write().unwrap().remove(hash);
    }

    /// Send `msg` to every connection attached to `hash`. Failed sends (a
    /// closed connection) are logged and pruned, not propagated.
    pub fn broadcast(&self, hash: &str, msg: Value) {
        let mut by_hash = self.by_hash.write().unwrap();
        if let Some(conns) = by_hash.get_mut(hash) {
            conns.retain(|c| match c.tx.send(msg.clone()) {
                Ok(()) => true,
                Err(_) => {
                    warn!(hash, conn_id = c.id, "dropping dead subscriber connection");
                    false
                }
            });
            if conns.is_empty() {
                by_hash.remove(hash);
            }
        }
    }

    /// Broadcast a typed error record to `hash`'s subscribers. Uses the same
    /// `{ok: false, error}` envelope as a synchronous handler failure, so the
    /// client doesn't need a second error shape to handle.
    pub fn write_error(&self, hash: &str, kind: &str, message: &str) {
        self.broadcast(
            hash,
            serde_json::json!({
                "ok": false,
                "error": format!("{kind}: {message}"),
            }),
        );
    }
}
