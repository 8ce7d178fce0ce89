use anyhow::Result;
use ddm_core::config::DdmConfig;
use serde_json::json;

use crate::cli::client;

#[derive(clap::Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    action: QueueAction,
}

#[derive(clap::Subcommand)]
enum QueueAction {
    Status,
    Pause,
    Resume,
    Move { hash: String, position: usize },
}

pub async fn run(config: &DdmConfig, args: QueueArgs) -> Result<()> {
    match args.action {
        QueueAction::Status => {
            client::call(&config.ipc_transport, "queue.status", json!({})).await?;
        }
        QueueAction::Pause => {
            client::call(&config.ipc_transport, "queue.pause", json!({})).await?;
        }
        QueueAction::Resume => {
            client::call(&config.ipc_transport, "queue.resume", json!({})).await?;
        }
        QueueAction::Move { hash, position } => {
            client::call(&config.ipc_transport, "queue.move", json!({"hash": hash, "position": position})).await?;
        }
    }
    Ok(())
}
