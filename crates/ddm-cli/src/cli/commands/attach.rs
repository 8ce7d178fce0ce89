use anyhow::Result;
use ddm_core::config::DdmConfig;
use serde_json::json;

use crate::cli::client;

#[derive(clap::Args)]
pub struct AttachArgs {
    hash: String,
}

pub async fn run(config: &DdmConfig, args: AttachArgs) -> Result<()> {
    client::call(&config.ipc_transport, "attach", json!({"hash": args.hash})).await?;
    Ok(())
}
