use anyhow::Result;
use ddm_core::config::DdmConfig;
use serde_json::json;

use crate::cli::client;

#[derive(clap::Args)]
pub struct ResumeArgs {
    hash: String,
}

pub async fn run(config: &DdmConfig, args: ResumeArgs) -> Result<()> {
    client::call(&config.ipc_transport, "resume", json!({"hash": args.hash})).await?;
    Ok(())
}
