//! devicelet daemon
//!
//! Advertises every configured resource pool to the kubelet and serves
//! allocations until a termination signal arrives.

mod plugins;
mod signals;

use anyhow::{bail, Context};
use clap::Parser;
use devicelet_core::{AgentConfig, PluginSettings, ResourceConfig};
use devicelet_plugin::DeviceManager;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// devicelet - Kubernetes device plugin for static device pools
#[derive(Parser, Debug)]
#[command(name = "devicelet")]
#[command(version, about, long_about = None)]
struct Args {
    /// Resource definition file (JSON, or TOML with a .toml extension)
    #[arg(long, default_value = "./dummyResources.json")]
    config: PathBuf,

    /// Agent settings file (TOML)
    #[arg(long)]
    agent_config: Option<PathBuf>,

    /// Directory for plugin sockets
    #[arg(long)]
    plugin_dir: Option<PathBuf>,

    /// Kubelet registration socket
    #[arg(long)]
    kubelet_socket: Option<PathBuf>,

    /// Registration attempts per plugin
    #[arg(long)]
    register_attempts: Option<u32>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Agent settings with command line overrides applied
    fn plugin_settings(&self, agent: &AgentConfig) -> PluginSettings {
        let mut settings = agent.plugin.clone();
        if let Some(dir) = &self.plugin_dir {
            settings.plugin_dir = dir.clone();
        }
        if let Some(socket) = &self.kubelet_socket {
            settings.kubelet_socket = Some(socket.clone());
        }
        if let Some(attempts) = self.register_attempts {
            settings.register_attempts = attempts;
        }
        settings
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let agent = match &args.agent_config {
        Some(path) => AgentConfig::from_file(path)?,
        None => AgentConfig::default(),
    };
    init_logging(args.log_level.as_deref().unwrap_or(&agent.logging.level))?;

    info!("Starting devicelet v{}", env!("CARGO_PKG_VERSION"));

    let settings = args.plugin_settings(&agent);
    let resources = ResourceConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load resources from {}", args.config.display()))?;

    let mut managers: Vec<DeviceManager> = resources
        .plugins
        .iter()
        .map(|pool| DeviceManager::from_pool(pool, &settings))
        .collect();

    // Listen before starting so an early signal still shuts down cleanly
    let mut signals = signals::Signals::new().context("Failed to install signal handlers")?;

    if let Err(e) = plugins::start_all(&mut managers, &settings.kubelet_socket()).await {
        error!(error = %e, "Could not start device plugins");
        plugins::stop_all(&mut managers).await;
        return Err(e.into());
    }

    let signal = signals.recv().await;
    info!(signal = signal, "Received signal, shutting down");

    let failures = plugins::stop_all(&mut managers).await;
    if !failures.is_empty() {
        bail!("{} device plugin(s) failed to stop cleanly", failures.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_agent_config() {
        let args = Args::parse_from([
            "devicelet",
            "--plugin-dir",
            "/tmp/plugins",
            "--register-attempts",
            "4",
        ]);
        assert_eq!(args.config, PathBuf::from("./dummyResources.json"));

        let settings = args.plugin_settings(&AgentConfig::default());
        assert_eq!(settings.plugin_dir, PathBuf::from("/tmp/plugins"));
        assert_eq!(settings.register_attempts, 4);
        assert_eq!(
            settings.kubelet_socket(),
            PathBuf::from("/tmp/plugins/kubelet.sock")
        );
    }

    #[test]
    fn test_defaults_come_from_agent_config() {
        let args = Args::parse_from(["devicelet"]);
        let mut agent = AgentConfig::default();
        agent.plugin.kubelet_socket = Some(PathBuf::from("/run/kubelet.sock"));

        let settings = args.plugin_settings(&agent);
        assert_eq!(settings.kubelet_socket(), PathBuf::from("/run/kubelet.sock"));
        assert_eq!(settings.register_attempts, 1);
    }
}
