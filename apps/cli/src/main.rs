mod app;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::config::Config;

#[derive(Debug, Parser)]
#[command(author, version, about = "Field client for the scan-relay backend")]
struct Cli {
    /// Backend base URL; overrides the configured one for this run.
    #[arg(long, global = true, env = "SCANRELAY_BASE_URL")]
    base_url: Option<String>,

    /// Directory holding config.toml.
    #[arg(long, global = true, env = "SCANRELAY_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and store the session on this device.
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted.
        #[arg(long, env = "SCANRELAY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session.
    Logout,
    /// Show the logged-in user.
    Whoami,
    /// List tickets visible to the logged-in user.
    Tickets,
    /// Open a new ticket for this device.
    Create {
        #[arg(long)]
        note: Option<String>,
    },
    /// Fetch the current status of a ticket.
    Status { ticket: String },
    /// Poll a ticket until it completes or fails.
    Watch {
        ticket: String,
        /// Seconds between polls; defaults to the configured interval.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Upload a scan for a ticket and wait for the result.
    Upload {
        ticket: String,
        #[arg(long)]
        usdz: PathBuf,
        #[arg(long)]
        scan_json: PathBuf,
        #[arg(long)]
        gps_json: PathBuf,
        #[arg(long)]
        motion_json: PathBuf,
        #[arg(long)]
        metadata_json: Option<PathBuf>,
    },
    /// Download the processed result of a completed ticket.
    Result {
        ticket: String,
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config_dir.as_deref())?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let app = App::new(config)?;
    match cli.command {
        Command::Login { email, password } => app.login(&email, password).await,
        Command::Logout => app.logout(),
        Command::Whoami => app.whoami(),
        Command::Tickets => app.list_tickets().await,
        Command::Create { note } => app.create_ticket(note.as_deref()).await,
        Command::Status { ticket } => app.status(&ticket).await,
        Command::Watch { ticket, interval } => app.watch(&ticket, interval).await,
        Command::Upload {
            ticket,
            usdz,
            scan_json,
            gps_json,
            motion_json,
            metadata_json,
        } => {
            let mut files =
                scanrelay_upload::ScanFiles::new(usdz, scan_json, gps_json, motion_json);
            if let Some(metadata) = metadata_json {
                files = files.with_metadata(metadata);
            }
            app.upload(&ticket, files).await
        }
        Command::Result { ticket, out } => app.download_result(&ticket, &out).await,
    }
}
