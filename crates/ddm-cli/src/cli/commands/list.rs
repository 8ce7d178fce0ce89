use anyhow::Result;
use ddm_core::config::DdmConfig;
use serde_json::json;

use crate::cli::client;

#[derive(clap::Args)]
pub struct ListArgs {
    #[arg(short = 'c', long = "show-completed")]
    show_completed: bool,
    #[arg(short = 'p', long = "show-pending")]
    show_pending: bool,
    #[arg(short = 'a', long = "show-all")]
    show_all: bool,
    #[arg(short = 'g', long = "show-hidden")]
    show_hidden: bool,
}

pub async fn run(config: &DdmConfig, args: ListArgs) -> Result<()> {
    let (show_completed, show_pending) = if args.show_all {
        (true, true)
    } else {
        (args.show_completed, args.show_pending)
    };
    client::call(
        &config.ipc_transport,
        "list",
        json!({
            "show_completed": show_completed,
            "show_pending": show_pending,
            "show_hidden": args.show_hidden,
        }),
    )
    .await?;
    Ok(())
}
