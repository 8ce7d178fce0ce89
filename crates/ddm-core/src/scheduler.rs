//! Scheduler (C7): time-triggered dispatch for scheduled/cron downloads.
//!
//! Runs as a dedicated thread owning a min-heap of `ScheduleEvent`s ordered
//! by `trigger_at`. `add`/`remove` travel over an mpsc channel; the loop
//! wakes on whichever comes first: the next timer, a control message, or
//! shutdown. Timer waits are capped at 60s so a suspended host, DST jump, or
//! NTP step cannot push the wake arbitrarily far past the true trigger.

use std::collections::BinaryHeap;
use std::str::FromStr;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::model::{Item, ScheduleState};

const MAX_WAIT: Duration = Duration::from_secs(60);

/// One pending trigger: fire `hash` at `trigger_at`, and if `cron_expr` is
/// set, re-push the next occurrence after firing.
#[derive(Debug, Clone)]
pub struct ScheduleEvent {
    pub hash: String,
    pub trigger_at: DateTime<Utc>,
    pub cron_expr: Option<String>,
}

impl PartialEq for ScheduleEvent {
    fn eq(&self, other: &Self) -> bool {
        self.trigger_at == other.trigger_at
    }
}
impl Eq for ScheduleEvent {}
impl PartialOrd for ScheduleEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduleEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest trigger_at sorts first.
        other.trigger_at.cmp(&self.trigger_at)
    }
}

enum Command {
    Add(ScheduleEvent),
    Remove(String),
    Shutdown,
}

/// Handle for talking to a running Scheduler thread. Dropping it shuts the
/// thread down and joins it.
pub struct SchedulerHandle {
    tx: Sender<Command>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn add(&self, event: ScheduleEvent) {
        let _ = self.tx.send(Command::Add(event));
    }

    pub fn remove(&self, hash: &str) {
        let _ = self.tx.send(Command::Remove(hash.to_string()));
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Spawn the Scheduler thread. `on_trigger(hash)` runs on the Scheduler's own
/// thread for every event whose `trigger_at` has passed, so it should be
/// cheap (e.g. send to another channel) — the Scheduler cannot process
/// `add`/`remove` while a trigger callback is running.
pub fn spawn(on_trigger: impl Fn(String) + Send + 'static) -> SchedulerHandle {
    let (tx, rx) = std::sync::mpsc::channel::<Command>();
    let join = std::thread::spawn(move || run(rx, on_trigger));
    SchedulerHandle {
        tx,
        join: Some(join),
    }
}

fn run(rx: Receiver<Command>, on_trigger: impl Fn(String)) {
    let mut heap: BinaryHeap<ScheduleEvent> = BinaryHeap::new();

    loop {
        let wait = heap.peek().map(|top| {
            let now = Utc::now();
            (top.trigger_at - now).to_std().unwrap_or(Duration::ZERO).min(MAX_WAIT)
        });

        let recv_result = match wait {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(d) => rx.recv_timeout(d),
        };

        match recv_result {
            Ok(Command::Add(event)) => {
                heap.push(event);
                continue;
            }
            Ok(Command::Remove(hash)) => {
                heap = heap.into_iter().filter(|e| e.hash != hash).collect();
                continue;
            }
            Ok(Command::Shutdown) => return,
            Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Utc::now();
        while matches!(heap.peek(), Some(top) if top.trigger_at <= now) {
            let event = heap.pop().expect("peek just confirmed an entry");
            on_trigger(event.hash.clone());
            if let Some(expr) = &event.cron_expr {
                if let Some(next) = next_cron_after(expr, now) {
                    heap.push(ScheduleEvent {
                        hash: event.hash,
                        trigger_at: next,
                        cron_expr: Some(expr.clone()),
                    });
                }
            }
        }
    }
}

/// Startup recovery: partition `items` into immediately-fireable hashes
/// (`missed`) and future events to re-arm the Scheduler with. Items whose
/// `schedule_state` is not `Scheduled` are skipped.
pub fn load_schedules(items: &[Item], now: DateTime<Utc>) -> (Vec<String>, Vec<ScheduleEvent>) {
    let mut missed = Vec::new();
    let mut future = Vec::new();

    for item in items {
        if item.schedule_state != ScheduleState::Scheduled {
            continue;
        }
        let Some(scheduled_at) = item.scheduled_at else {
            continue;
        };

        if scheduled_at < now {
            missed.push(item.hash.clone());
            if let Some(expr) = &item.cron_expr {
                if let Some(next) = next_cron_after(expr, now) {
                    future.push(ScheduleEvent {
                        hash: item.hash.clone(),
                        trigger_at: next,
                        cron_expr: Some(expr.clone()),
                    });
                }
            }
        } else {
            future.push(ScheduleEvent {
                hash: item.hash.clone(),
                trigger_at: scheduled_at,
                cron_expr: item.cron_expr.clone(),
            });
        }
    }

    (missed, future)
}

/// A 5-field Unix cron expression is valid only with exactly 5 whitespace
/// separated fields; the `cron` crate's parser wants a leading seconds
/// field, which we pin to `0`.
fn to_six_field(expr: &str) -> Option<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }
    Some(format!("0 {expr}"))
}

/// True if `expr` is a well-formed 5-field cron expression.
pub fn validate_cron(expr: &str) -> bool {
    to_six_field(expr)
        .and_then(|s| Schedule::from_str(&s).ok())
        .is_some()
}

/// Next occurrence of `expr` strictly after `after`, or `None` if `expr`
/// does not parse.
pub fn next_cron_after(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let six = to_six_field(expr)?;
    let schedule = Schedule::from_str(&six).ok()?;
    schedule.after(&after).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration as StdDuration;

    fn scheduled_item(hash: &str, scheduled_at: DateTime<Utc>, cron_expr: Option<&str>) -> Item {
        Item {
            hash: hash.to_string(),
            url: "https://example.com/file".to_string(),
            name: "file".to_string(),
            download_location: "/tmp".into(),
            absolute_location: "/tmp/file".into(),
            total_size: 0,
            downloaded: 0,
            resumable: true,
            force_parts: false,
            max_connections: 4,
            max_segments: 4,
            parts: HashMap::new(),
            child_hash: None,
            hidden: false,
            children: Vec::new(),
            date_added: Utc::now(),
            priority: Priority::Normal,
            schedule_state: ScheduleState::Scheduled,
            scheduled_at: Some(scheduled_at),
            cron_expr: cron_expr.map(String::from),
            headers: HashMap::new(),
            cookie_source_path: None,
            etag: None,
            last_modified: None,
            completed: false,
            stopped: false,
        }
    }

    #[test]
    fn validate_cron_rejects_wrong_field_count() {
        assert!(validate_cron("0 2 * * *"));
        assert!(!validate_cron("* * *"));
        assert!(!validate_cron(""));
    }

    #[test]
    fn next_cron_after_is_strictly_later() {
        let now = Utc::now();
        let next = next_cron_after("0 2 * * *", now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn load_schedules_partitions_missed_and_future() {
        let now = Utc::now();
        let missed_item = scheduled_item("missed", now - chrono::Duration::hours(1), None);
        let future_item = scheduled_item("future", now + chrono::Duration::hours(1), None);
        let not_scheduled = {
            let mut i = scheduled_item("other", now, None);
            i.schedule_state = ScheduleState::None;
            i
        };
        let items = vec![missed_item, future_item, not_scheduled];

        let (missed, future) = load_schedules(&items, now);
        assert_eq!(missed, vec!["missed".to_string()]);
        assert_eq!(future.len(), 1);
        assert_eq!(future[0].hash, "future");
    }

    #[test]
    fn load_schedules_recurring_missed_item_also_gets_future_event() {
        let now = Utc::now();
        let item = scheduled_item("daily", now - chrono::Duration::hours(1), Some("0 2 * * *"));
        let (missed, future) = load_schedules(&[item], now);
        assert_eq!(missed, vec!["daily".to_string()]);
        assert_eq!(future.len(), 1);
        assert!(future[0].trigger_at > now);
    }

    #[test]
    fn scheduler_fires_event_after_delay() {
        let fired: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let fired_cb = Arc::clone(&fired);
        let handle = spawn(move |hash| fired_cb.lock().unwrap().push(hash));

        handle.add(ScheduleEvent {
            hash: "a".to_string(),
            trigger_at: Utc::now() + chrono::Duration::milliseconds(50),
            cron_expr: None,
        });

        std::thread::sleep(StdDuration::from_millis(300));
        assert_eq!(*fired.lock().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn scheduler_remove_prevents_firing() {
        let fired: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let fired_cb = Arc::clone(&fired);
        let handle = spawn(move |hash| fired_cb.lock().unwrap().push(hash));

        handle.add(ScheduleEvent {
            hash: "a".to_string(),
            trigger_at: Utc::now() + chrono::Duration::milliseconds(100),
            cron_expr: None,
        });
        handle.remove("a");

        std::thread::sleep(StdDuration::from_millis(300));
        assert!(fired.lock().unwrap().is_empty());
    }
}
