//! devicelet CLI
//!
//! Talks to a device plugin socket the way the kubelet does, for debugging.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// devicelet-ctl - inspect and exercise a devicelet plugin socket
#[derive(Parser, Debug)]
#[command(name = "devicelet-ctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Plugin socket to connect to
    #[arg(
        long,
        default_value = "/var/lib/kubelet/device-plugins/dummy.sock",
        global = true
    )]
    socket: PathBuf,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 5, global = true)]
    timeout: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the options the plugin advertises
    Options,

    /// List devices and their health
    List {
        /// Keep printing every update
        #[arg(long)]
        watch: bool,
    },

    /// Allocate devices, one container per comma-separated group (e.g. d0,d1 d2)
    Allocate {
        #[arg(required = true)]
        groups: Vec<String>,
    },

    /// Run the pre-start hook for devices
    Prestart {
        devices: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let mut client =
        commands::PluginClient::connect(&cli.socket, Duration::from_secs(cli.timeout)).await?;

    match cli.command {
        Commands::Options => {
            commands::options(&mut client).await?;
        }
        Commands::List { watch } => {
            commands::list(&mut client, watch).await?;
        }
        Commands::Allocate { groups } => {
            commands::allocate(&mut client, &groups).await?;
        }
        Commands::Prestart { devices } => {
            commands::prestart(&mut client, devices).await?;
        }
    }

    Ok(())
}
