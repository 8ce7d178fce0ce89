//! `info <url>`: a local HEAD probe, no daemon round-trip required.

use std::collections::HashMap;

use anyhow::Result;
use ddm_core::config::DdmConfig;
use ddm_core::url_model::derive_filename;

#[derive(clap::Args)]
pub struct InfoArgs {
    url: String,
}

pub async fn run(_config: &DdmConfig, args: InfoArgs) -> Result<()> {
    let head = ddm_core::fetch_head::probe(&args.url, &HashMap::new())?;
    let filename = derive_filename(&args.url, head.content_disposition.as_deref());

    println!("url: {}", args.url);
    println!("filename: {filename}");
    match head.content_length {
        Some(len) => println!("content-length: {len}"),
        None => println!("content-length: unknown"),
    }
    println!("resumable: {}", head.accept_ranges);
    if let Some(etag) = &head.etag {
        println!("etag: {etag}");
    }
    if let Some(last_modified) = &head.last_modified {
        println!("last-modified: {last_modified}");
    }
    Ok(())
}
