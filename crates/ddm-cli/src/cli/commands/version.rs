use anyhow::Result;
use ddm_core::config::DdmConfig;
use serde_json::json;

use crate::cli::client;

pub async fn run(config: &DdmConfig) -> Result<()> {
    client::call(&config.ipc_transport, "version", json!({})).await?;
    Ok(())
}
