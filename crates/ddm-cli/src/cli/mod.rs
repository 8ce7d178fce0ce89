//! Top-level CLI surface: clap-derived commands, each dispatched to a thin
//! handler in `commands/` that either talks to a running daemon over IPC or
//! (for `daemon`) becomes the daemon.

pub mod client;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ddm", version, about = "Segmented HTTP download manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new download.
    Download(commands::download::DownloadArgs),
    /// Resume a stopped or paused download.
    Resume(commands::resume::ResumeArgs),
    /// Request a running download stop (or cancel a scheduled one).
    Stop(commands::stop::StopArgs),
    /// Attach to an in-progress download's update stream without starting it.
    Attach(commands::attach::AttachArgs),
    /// List known downloads.
    List(commands::list::ListArgs),
    /// Remove download records (and their on-disk parts).
    Flush(commands::flush::FlushArgs),
    /// Probe a URL without downloading it.
    Info(commands::info::InfoArgs),
    /// Queue administration.
    Queue(commands::queue::QueueArgs),
    /// Run the daemon in the foreground.
    Daemon(commands::daemon::DaemonArgs),
    /// Print the daemon's reported version.
    Version,
}

pub struct CliCommand;

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let config = ddm_core::config::load_or_init()?;

        match cli.command {
            Command::Download(args) => commands::download::run(&config, args).await,
            Command::Resume(args) => commands::resume::run(&config, args).await,
            Command::Stop(args) => commands::stop::run(&config, args).await,
            Command::Attach(args) => commands::attach::run(&config, args).await,
            Command::List(args) => commands::list::run(&config, args).await,
            Command::Flush(args) => commands::flush::run(&config, args).await,
            Command::Info(args) => commands::info::run(&config, args).await,
            Command::Queue(args) => commands::queue::run(&config, args).await,
            Command::Daemon(args) => commands::daemon::run(args).await,
            Command::Version => commands::version::run(&config).await,
        }
    }
}
