use anyhow::Result;
use ddm_core::config::DdmConfig;
use serde_json::json;

use crate::cli::client;

#[derive(clap::Args)]
pub struct FlushArgs {
    /// Hash of the download to remove. Omit to flush every known download.
    hash: Option<String>,
    #[arg(short = 'i', long = "item-hash")]
    item_hash: Option<String>,
    /// Skip the confirmation prompt.
    #[arg(short = 'f', long = "force")]
    force: bool,
}

pub async fn run(config: &DdmConfig, args: FlushArgs) -> Result<()> {
    let download_id = args.hash.or(args.item_hash).unwrap_or_default();

    if !args.force && !download_id.is_empty() {
        eprint!("remove download {download_id} and its on-disk parts? [y/N] ");
        use std::io::Write;
        std::io::stderr().flush().ok();
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer).ok();
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("aborted");
            return Ok(());
        }
    }

    client::call(&config.ipc_transport, "flush", json!({"download_id": download_id})).await?;
    Ok(())
}
