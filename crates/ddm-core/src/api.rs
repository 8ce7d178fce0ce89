//! API Handlers (C9): one handler per method code, dispatched from the IPC Server.
//!
//! Handlers are synchronous and may block (HEAD probes, Item Store I/O); the
//! IPC Server runs `dispatch` on a blocking thread pool so the async accept
//! loop never stalls behind one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::DdmConfig;
use crate::ipc::pool::SubscriptionPool;
use crate::manager::{AddDownloadOptions, Manager};
use crate::model::{Item, Priority, ScheduleState};
use crate::scheduler::{self, ScheduleEvent, SchedulerHandle};

/// Broadcasts a Downloader's lifecycle events to the subscription pool,
/// keyed by item hash, per the IPC wire's `update` envelope.
pub struct PoolEvents {
    pool: Arc<SubscriptionPool>,
}

impl PoolEvents {
    pub fn new(pool: Arc<SubscriptionPool>) -> Self {
        Self { pool }
    }
}

fn update_frame(type_code: &str, message: Value) -> Value {
    json!({"ok": true, "update": {"type": type_code, "message": message}})
}

impl crate::downloader::DownloadEvents for PoolEvents {
    fn error(&self, hash: &str, message: &str) {
        self.pool.write_error(hash, "terminal_fetch", message);
    }
    fn download_progress(&self, hash: &str, downloaded: u64, total_size: u64) {
        self.pool.broadcast(
            hash,
            update_frame("progress", json!({"downloaded": downloaded, "total_size": total_size})),
        );
    }
    fn download_complete(&self, hash: &str, total_bytes: u64) {
        self.pool
            .broadcast(hash, update_frame("complete", json!({"total_bytes": total_bytes})));
    }
    fn download_stopped(&self, hash: &str) {
        self.pool.broadcast(hash, update_frame("stopped", json!({})));
    }
    fn compile_start(&self, hash: &str) {
        self.pool.broadcast(hash, update_frame("compile_start", json!({})));
    }
    fn compile_progress(&self, hash: &str, written: u64, total_size: u64) {
        self.pool.broadcast(
            hash,
            update_frame("compile_progress", json!({"written": written, "total_size": total_size})),
        );
    }
    fn compile_complete(&self, hash: &str) {
        self.pool.broadcast(hash, update_frame("compile_complete", json!({})));
    }
}

/// One successful dispatch: the `update.type` code, its `update.message`
/// payload, and the hash (if any) the caller's connection should be
/// attached to for follow-up broadcasts.
pub struct DispatchOutcome {
    pub type_code: String,
    pub message: Value,
    pub subscribe_hash: Option<String>,
}

pub struct ApiHandlers {
    manager: Arc<Manager>,
    pool: Arc<SubscriptionPool>,
    scheduler: SchedulerHandle,
    config: DdmConfig,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DownloadParams {
    url: String,
    file_name: Option<String>,
    download_path: Option<String>,
    max_connection: Option<usize>,
    max_parts: Option<usize>,
    force_parts: bool,
    priority: Option<Priority>,
    hidden: bool,
    headers: HashMap<String, String>,
    start_at: Option<String>,
    start_in: Option<String>,
    schedule: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct HashParam {
    hash: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ListParams {
    show_completed: bool,
    show_pending: bool,
    show_hidden: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FlushParams {
    download_id: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct QueueMoveParams {
    hash: String,
    position: usize,
}

impl ApiHandlers {
    pub fn new(manager: Arc<Manager>, pool: Arc<SubscriptionPool>, scheduler: SchedulerHandle, config: DdmConfig) -> Self {
        Self {
            manager,
            pool,
            scheduler,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<SubscriptionPool> {
        &self.pool
    }

    /// Dispatch one request. `Err` maps to `{ok: false, error}` on the wire.
    pub fn dispatch(&self, method: &str, message: Value) -> Result<DispatchOutcome, String> {
        match method {
            "download" => self.handle_download(message),
            "resume" => self.handle_resume(message),
            "attach" => self.handle_attach(message),
            "stop" => self.handle_stop(message),
            "list" => self.handle_list(message),
            "flush" => self.handle_flush(message),
            "version" => self.handle_version(),
            "queue.status" => self.handle_queue_status(),
            "queue.pause" => self.handle_queue_pause(),
            "queue.resume" => self.handle_queue_resume(),
            "queue.move" => self.handle_queue_move(message),
            other => Err(format!("unknown method \"{other}\"")),
        }
    }

    fn handle_download(&self, message: Value) -> Result<DispatchOutcome, String> {
        let params: DownloadParams = serde_json::from_value(message).map_err(|e| e.to_string())?;
        if params.url.is_empty() {
            return Err("missing required field \"url\"".to_string());
        }
        let download_location = params
            .download_path
            .map(std::path::PathBuf::from)
            .or_else(|| self.config.default_download_dir.clone())
            .unwrap_or_else(|| std::path::PathBuf::from("."));

        if params.start_at.is_some() && params.start_in.is_some() {
            return Err("--start-at and --start-in are mutually exclusive".to_string());
        }
        let cron_expr = match &params.schedule {
            Some(expr) if scheduler::validate_cron(expr) => Some(expr.clone()),
            Some(expr) => return Err(format!("invalid cron expression \"{expr}\"")),
            None => None,
        };
        let scheduled_at = if let Some(at) = &params.start_at {
            Some(parse_start_at(at)?)
        } else if let Some(inn) = &params.start_in {
            Some(Utc::now() + parse_start_in(inn)?)
        } else if let Some(expr) = &cron_expr {
            scheduler::next_cron_after(expr, Utc::now())
        } else {
            None
        };

        let opts = AddDownloadOptions {
            url: params.url,
            headers: params.headers,
            download_location,
            file_name: params.file_name,
            max_connections: params.max_connection.unwrap_or(self.config.max_connections_per_host),
            max_segments: params.max_parts.unwrap_or(self.config.max_segments),
            force_parts: params.force_parts,
            priority: params.priority.unwrap_or(self.config.default_priority),
            hidden: params.hidden,
            child_hash: None,
            scheduled_at,
            cron_expr,
            resolver: None,
        };

        let item = self.manager.add_download(opts).map_err(|e| e.to_string())?;

        if item.schedule_state == ScheduleState::Scheduled {
            self.scheduler.add(ScheduleEvent {
                hash: item.hash.clone(),
                trigger_at: item.scheduled_at.expect("scheduled item always has scheduled_at"),
                cron_expr: item.cron_expr.clone(),
            });
            return Ok(DispatchOutcome {
                type_code: "download".to_string(),
                message: download_response(&item),
                subscribe_hash: None,
            });
        }

        Ok(DispatchOutcome {
            type_code: "download".to_string(),
            message: download_response(&item),
            subscribe_hash: Some(item.hash),
        })
    }

    fn handle_resume(&self, message: Value) -> Result<DispatchOutcome, String> {
        let params: HashParam = serde_json::from_value(message).map_err(|e| e.to_string())?;
        let item = self.manager.resume_download(&params.hash).map_err(|e| e.to_string())?;
        Ok(DispatchOutcome {
            type_code: "resume".to_string(),
            message: json!({
                "download_id": item.hash,
                "total_size": item.total_size,
                "downloaded": item.downloaded,
                "max_connections": item.max_connections,
            }),
            subscribe_hash: Some(params.hash),
        })
    }

    fn handle_attach(&self, message: Value) -> Result<DispatchOutcome, String> {
        let params: HashParam = serde_json::from_value(message).map_err(|e| e.to_string())?;
        if !self.pool.has_download(&params.hash) {
            return Err(format!("no active download for hash {}", params.hash));
        }
        let item = self
            .manager
            .item_store()
            .get_item(&params.hash)
            .ok_or_else(|| format!("unknown download {}", params.hash))?;
        Ok(DispatchOutcome {
            type_code: "attach".to_string(),
            message: download_response(&item),
            subscribe_hash: Some(params.hash),
        })
    }

    fn handle_stop(&self, message: Value) -> Result<DispatchOutcome, String> {
        let params: HashParam = serde_json::from_value(message).map_err(|e| e.to_string())?;
        let item = self
            .manager
            .item_store()
            .get_item(&params.hash)
            .ok_or_else(|| format!("unknown download {}", params.hash))?;

        if item.schedule_state == ScheduleState::Scheduled {
            self.scheduler.remove(&params.hash);
            let mut cancelled = item;
            cancelled.schedule_state = ScheduleState::Cancelled;
            self.manager.item_store().update_item(cancelled).map_err(|e| e.to_string())?;
            return Ok(DispatchOutcome {
                type_code: "stop".to_string(),
                message: json!({"message": "scheduled download cancelled"}),
                subscribe_hash: None,
            });
        }

        self.manager.stop_download(&params.hash);
        self.pool.stop_download(&params.hash);
        Ok(DispatchOutcome {
            type_code: "stop".to_string(),
            message: json!({"message": "stop requested"}),
            subscribe_hash: None,
        })
    }

    fn handle_list(&self, message: Value) -> Result<DispatchOutcome, String> {
        let params: ListParams = serde_json::from_value(message).map_err(|e| e.to_string())?;
        let items = self.manager.item_store().get_items();
        let filtered: Vec<Value> = items
            .into_iter()
            .filter(|i| {
                if i.hidden && !params.show_hidden {
                    return false;
                }
                if !params.show_completed && !params.show_pending {
                    return !i.completed;
                }
                (params.show_completed && i.completed) || (params.show_pending && !i.completed)
            })
            .map(|i| item_summary(&i))
            .collect();
        Ok(DispatchOutcome {
            type_code: "list".to_string(),
            message: json!({"items": filtered}),
            subscribe_hash: None,
        })
    }

    fn handle_flush(&self, message: Value) -> Result<DispatchOutcome, String> {
        let params: FlushParams = serde_json::from_value(message).map_err(|e| e.to_string())?;
        if params.download_id.is_empty() {
            self.manager.flush(None).map_err(|e| e.to_string())?;
        } else {
            self.manager.flush(Some(params.download_id.as_str())).map_err(|e| e.to_string())?;
            self.pool.stop_download(&params.download_id);
        }
        Ok(DispatchOutcome {
            type_code: "flush".to_string(),
            message: json!({"flushed": true}),
            subscribe_hash: None,
        })
    }

    fn handle_version(&self) -> Result<DispatchOutcome, String> {
        Ok(DispatchOutcome {
            type_code: "version".to_string(),
            message: json!({"version": env!("CARGO_PKG_VERSION")}),
            subscribe_hash: None,
        })
    }

    fn handle_queue_status(&self) -> Result<DispatchOutcome, String> {
        let Some(queue) = self.manager.queue() else {
            return Ok(DispatchOutcome {
                type_code: "queue.status".to_string(),
                message: json!({
                    "active": [], "active_count": 0,
                    "waiting": [], "waiting_count": 0,
                    "paused": false, "max_concurrent": null,
                }),
                subscribe_hash: None,
            });
        };
        let active = queue.get_active_hashes();
        let waiting: Vec<Value> = queue
            .get_waiting_items()
            .into_iter()
            .map(|w| json!({"hash": w.hash, "priority": w.priority, "position": w.position}))
            .collect();
        Ok(DispatchOutcome {
            type_code: "queue.status".to_string(),
            message: json!({
                "active_count": active.len(),
                "active": active,
                "waiting_count": waiting.len(),
                "waiting": waiting,
                "paused": queue.is_paused(),
                "max_concurrent": queue.max_concurrent(),
            }),
            subscribe_hash: None,
        })
    }

    fn handle_queue_pause(&self) -> Result<DispatchOutcome, String> {
        if let Some(queue) = self.manager.queue() {
            queue.pause();
        }
        Ok(DispatchOutcome {
            type_code: "queue.pause".to_string(),
            message: json!({"paused": true}),
            subscribe_hash: None,
        })
    }

    fn handle_queue_resume(&self) -> Result<DispatchOutcome, String> {
        let promoted = self.manager.queue().map(|q| q.resume()).unwrap_or_default();
        Ok(DispatchOutcome {
            type_code: "queue.resume".to_string(),
            message: json!({"promoted": promoted}),
            subscribe_hash: None,
        })
    }

    fn handle_queue_move(&self, message: Value) -> Result<DispatchOutcome, String> {
        let params: QueueMoveParams = serde_json::from_value(message).map_err(|e| e.to_string())?;
        let Some(queue) = self.manager.queue() else {
            return Err("no queue configured".to_string());
        };
        queue.move_to(&params.hash, params.position).map_err(|e| e.to_string())?;
        Ok(DispatchOutcome {
            type_code: "queue.move".to_string(),
            message: json!({"moved": true}),
            subscribe_hash: None,
        })
    }
}

/// `start-at` uses the layout `YYYY-MM-DD HH:MM` in local time; a past value
/// is accepted (the Item is created `missed` and fires on daemon recovery or
/// immediately once the Scheduler sees it), not rejected.
fn parse_start_at(s: &str) -> Result<DateTime<Utc>, String> {
    let naive = chrono::NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M")
        .map_err(|e| format!("invalid --start-at \"{s}\": {e}"))?;
    let local = chrono::Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| format!("ambiguous or invalid local time \"{s}\""))?;
    Ok(local.with_timezone(&Utc))
}

/// `start-in` is a sequence of `<n><unit>` pairs (`s`/`m`/`h`), e.g. `1h30m`;
/// the literal `0` means "now".
fn parse_start_in(s: &str) -> Result<chrono::Duration, String> {
    let s = s.trim();
    if s == "0" {
        return Ok(chrono::Duration::zero());
    }
    let mut total = chrono::Duration::zero();
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: i64 = digits
            .parse()
            .map_err(|_| format!("invalid --start-in duration \"{s}\""))?;
        digits.clear();
        total = total
            + match c {
                's' => chrono::Duration::seconds(n),
                'm' => chrono::Duration::minutes(n),
                'h' => chrono::Duration::hours(n),
                other => return Err(format!("unknown duration unit \"{other}\" in \"{s}\"")),
            };
    }
    if !digits.is_empty() {
        return Err(format!("--start-in duration \"{s}\" is missing a trailing unit"));
    }
    Ok(total)
}

fn download_response(item: &Item) -> Value {
    json!({
        "download_id": item.hash,
        "filename": item.name,
        "save_path": item.absolute_location,
        "download_directory": item.download_location,
        "content_length": item.total_size,
        "max_connections": item.max_connections,
        "max_segments": item.max_segments,
    })
}

fn item_summary(item: &Item) -> Value {
    json!({
        "hash": item.hash,
        "url": item.url,
        "name": item.name,
        "total_size": item.total_size,
        "downloaded": item.downloaded,
        "completed": item.completed,
        "stopped": item.stopped,
        "priority": item.priority,
        "schedule_state": item.schedule_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::JobControl;
    use crate::downloader::DownloaderConfig;
    use crate::host_policy::HostPolicy;
    use crate::item_store::ItemStore;
    use crate::queue::DownloadQueue;
    use crate::speed_limiter::SpeedLimiter;
    use std::sync::Mutex;

    fn test_handlers(dir: &std::path::Path) -> ApiHandlers {
        let pool = Arc::new(SubscriptionPool::new());
        let store = Arc::new(ItemStore::init(dir).unwrap());
        let events: Arc<dyn crate::downloader::DownloadEvents> = Arc::new(PoolEvents::new(Arc::clone(&pool)));
        let manager = Arc::new(Manager::new(
            store,
            Some(Arc::new(DownloadQueue::new(2))),
            Arc::new(JobControl::new()),
            SpeedLimiter::unlimited(),
            DownloaderConfig::default(),
            events,
            Arc::new(Mutex::new(HostPolicy::new(4, 16))),
        ));
        let scheduler = crate::scheduler::spawn(|_hash| {});
        ApiHandlers::new(manager, pool, scheduler, DdmConfig::default())
    }

    #[test]
    fn version_returns_crate_version() {
        let dir = tempfile::tempdir().unwrap();
        let handlers = test_handlers(dir.path());
        let outcome = handlers.dispatch("version", json!({})).unwrap();
        assert_eq!(outcome.message["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn unknown_method_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let handlers = test_handlers(dir.path());
        assert!(handlers.dispatch("bogus", json!({})).is_err());
    }

    #[test]
    fn list_defaults_to_incomplete_items() {
        let dir = tempfile::tempdir().unwrap();
        let handlers = test_handlers(dir.path());
        let outcome = handlers.dispatch("list", json!({})).unwrap();
        assert_eq!(outcome.message["items"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn stop_unknown_hash_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let handlers = test_handlers(dir.path());
        assert!(handlers.dispatch("stop", json!({"hash": "missing"})).is_err());
    }

    #[test]
    fn queue_status_without_items_reports_empty() {
        let dir = tempfile::tempdir().unwrap();
        let handlers = test_handlers(dir.path());
        let outcome = handlers.dispatch("queue.status", json!({})).unwrap();
        assert_eq!(outcome.message["active"].as_array().unwrap().len(), 0);
        assert_eq!(outcome.message["active_count"], 0);
        assert_eq!(outcome.message["waiting_count"], 0);
        assert_eq!(outcome.message["paused"], false);
    }

    #[test]
    fn start_in_zero_means_now() {
        assert_eq!(parse_start_in("0").unwrap(), chrono::Duration::zero());
    }

    #[test]
    fn start_in_parses_combined_units() {
        let d = parse_start_in("1h30m10s").unwrap();
        assert_eq!(d, chrono::Duration::hours(1) + chrono::Duration::minutes(30) + chrono::Duration::seconds(10));
    }

    #[test]
    fn start_in_rejects_missing_unit() {
        assert!(parse_start_in("10").is_err());
    }

    #[test]
    fn start_at_rejects_malformed_input() {
        assert!(parse_start_at("not-a-date").is_err());
    }

    #[test]
    fn download_rejects_start_at_and_start_in_together() {
        let dir = tempfile::tempdir().unwrap();
        let handlers = test_handlers(dir.path());
        let err = handlers
            .dispatch(
                "download",
                json!({"url": "https://example.invalid/x", "start_at": "2030-01-01 00:00", "start_in": "1h"}),
            )
            .unwrap_err();
        assert!(err.contains("mutually exclusive"));
    }
}
