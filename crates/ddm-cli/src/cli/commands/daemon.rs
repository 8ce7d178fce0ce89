//! `daemon`: wires the Item Store, Queue, Manager, Scheduler, API Handlers
//! and IPC Server together and runs the accept loop in the foreground.

use std::sync::Arc;

use anyhow::{Context, Result};
use ddm_core::api::{ApiHandlers, PoolEvents};
use ddm_core::control::JobControl;
use ddm_core::downloader::DownloaderConfig;
use ddm_core::host_policy::HostPolicy;
use ddm_core::ipc::SubscriptionPool;
use ddm_core::item_store::{default_state_dir, ItemStore};
use ddm_core::manager::Manager;
use ddm_core::queue::DownloadQueue;
use ddm_core::scheduler;
use ddm_core::speed_limiter::SpeedLimiter;

#[derive(clap::Args)]
pub struct DaemonArgs {
    #[arg(long = "max-concurrent")]
    max_concurrent: Option<usize>,
    /// Shared secret required on every request. Not yet enforced by the IPC Server.
    #[arg(long = "rpc-secret")]
    rpc_secret: Option<String>,
    /// Bind TCP transport on all interfaces rather than localhost only. Not yet honored.
    #[arg(long = "rpc-listen-all")]
    rpc_listen_all: bool,
}

pub async fn run(args: DaemonArgs) -> Result<()> {
    if args.rpc_secret.is_some() || args.rpc_listen_all {
        tracing::warn!("--rpc-secret and --rpc-listen-all are accepted but not yet enforced by the IPC Server");
    }

    let config = ddm_core::config::load_or_init()?;
    let state_dir = default_state_dir()?;

    let store = Arc::new(ItemStore::init(&state_dir).context("open item store")?);
    let max_concurrent = args.max_concurrent.unwrap_or(config.max_total_connections);
    let queue = Arc::new(DownloadQueue::new(max_concurrent));
    let control = Arc::new(JobControl::new());
    let limiter = if config.default_speed_limit == 0 {
        SpeedLimiter::unlimited()
    } else {
        SpeedLimiter::new(config.default_speed_limit, config.default_speed_limit)
    };
    let downloader_config = DownloaderConfig {
        request_timeout: std::time::Duration::from_secs(config.default_timeout_secs),
        retry_policy: config.retry.to_policy(),
    };

    let pool = Arc::new(SubscriptionPool::new());
    let events = Arc::new(PoolEvents::new(pool.clone()));
    let host_policy = Arc::new(std::sync::Mutex::new(HostPolicy::new(config.min_segments, config.max_segments)));

    let manager = Arc::new(Manager::new(
        store.clone(),
        Some(queue),
        control,
        limiter,
        downloader_config,
        events,
        host_policy,
    ));

    let scheduler_manager = manager.clone();
    let scheduler = scheduler::spawn(move |hash| scheduler_manager.trigger_scheduled(&hash));

    let (missed, future) = scheduler::load_schedules(&store.get_items(), chrono::Utc::now());
    for hash in missed {
        manager.trigger_scheduled(&hash);
    }
    for event in future {
        scheduler.add(event);
    }

    let handlers = Arc::new(ApiHandlers::new(manager, pool, scheduler, config.clone()));

    let pid_path = state_dir.join("daemon.pid");
    std::fs::write(&pid_path, std::process::id().to_string()).context("write daemon.pid")?;
    let _pid_guard = PidGuard(pid_path);

    tracing::info!(transport = ?config.ipc_transport, "ddm daemon starting");
    ddm_core::ipc::serve(config.ipc_transport, handlers).await
}

/// Removes `daemon.pid` on drop, including on an early return from `serve`.
struct PidGuard(std::path::PathBuf);

impl Drop for PidGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
