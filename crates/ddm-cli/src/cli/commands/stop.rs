use anyhow::Result;
use ddm_core::config::DdmConfig;
use serde_json::json;

use crate::cli::client;

#[derive(clap::Args)]
pub struct StopArgs {
    hash: String,
}

pub async fn run(config: &DdmConfig, args: StopArgs) -> Result<()> {
    client::call(&config.ipc_transport, "stop", json!({"hash": args.hash})).await?;
    Ok(())
}
