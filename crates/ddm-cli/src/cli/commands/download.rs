use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Result};
use ddm_core::config::DdmConfig;
use serde_json::{json, Value};

use super::batch;
use crate::cli::client;

#[derive(Clone, Copy, clap::ValueEnum, serde::Serialize)]
#[value(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CliPriority {
    Low,
    Normal,
    High,
}

#[derive(clap::Args)]
pub struct DownloadArgs {
    /// URL to download. Omit when `-i` supplies a batch of URLs.
    url: Option<String>,

    #[arg(short = 'o', long = "file-name")]
    file_name: Option<String>,
    #[arg(short = 'l', long = "download-path")]
    download_path: Option<String>,
    #[arg(short = 'y', long = "overwrite")]
    overwrite: bool,
    #[arg(long = "proxy")]
    proxy: Option<String>,
    #[arg(short = 's', long = "max-parts")]
    max_parts: Option<usize>,
    #[arg(short = 'x', long = "max-connection")]
    max_connection: Option<usize>,
    #[arg(short = 'f', long = "force-parts")]
    force_parts: bool,
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,
    #[arg(long = "max-retries")]
    max_retries: Option<u32>,
    #[arg(long = "retry-delay")]
    retry_delay: Option<u64>,
    #[arg(long = "background")]
    background: bool,
    #[arg(long = "cookie")]
    cookie: Option<String>,
    #[arg(long = "start-at")]
    start_at: Option<String>,
    #[arg(long = "start-in")]
    start_in: Option<String>,
    #[arg(long = "schedule")]
    schedule: Option<String>,
    #[arg(long = "speed-limit")]
    speed_limit: Option<String>,
    #[arg(long = "priority", value_enum)]
    priority: Option<CliPriority>,
    #[arg(short = 'i', long = "input-file")]
    input_file: Option<PathBuf>,
}

pub async fn run(config: &DdmConfig, args: DownloadArgs) -> Result<()> {
    let urls = resolve_urls(&args)?;

    if args.overwrite || args.proxy.is_some() || args.timeout.is_some() || args.max_retries.is_some()
        || args.retry_delay.is_some() || args.speed_limit.is_some()
    {
        tracing::debug!("--overwrite/--proxy/--timeout/--max-retries/--retry-delay/--speed-limit are accepted but not yet forwarded per-download; they only take effect via the daemon's global config");
    }

    let mut headers = HashMap::new();
    if let Some(cookie) = &args.cookie {
        headers.insert("Cookie".to_string(), cookie.clone());
    }

    for url in urls {
        let message = json!({
            "url": url,
            "file_name": args.file_name,
            "download_path": args.download_path,
            "max_connection": args.max_connection,
            "max_parts": args.max_parts,
            "force_parts": args.force_parts,
            "priority": args.priority,
            "hidden": false,
            "headers": headers,
            "start_at": args.start_at,
            "start_in": args.start_in,
            "schedule": args.schedule,
        });

        let response = client::call(&config.ipc_transport, "download", message).await?;
        if args.background {
            break_after_initial_response(&response);
        }
    }

    Ok(())
}

/// `--background` means print the initial response and return without
/// waiting on the progress stream; `client::call` already drains it, so
/// this just documents intent for a future non-blocking client mode.
fn break_after_initial_response(_response: &Value) {}

fn resolve_urls(args: &DownloadArgs) -> Result<Vec<String>> {
    match (&args.url, &args.input_file) {
        (Some(_), Some(_)) => bail!("pass a URL or -i <input-file>, not both"),
        (Some(url), None) => Ok(vec![url.clone()]),
        (None, Some(path)) => {
            let batch = batch::read(path)?;
            for invalid in &batch.invalid {
                eprintln!("{}:{}: skipping \"{}\" ({})", path.display(), invalid.line_number, invalid.text, invalid.reason);
            }
            if batch.urls.is_empty() {
                bail!("input file {} contained no valid URLs", path.display());
            }
            Ok(batch.urls)
        }
        (None, None) => bail!("a URL or -i <input-file> is required"),
    }
}
