//! Device manager: lifecycle of one resource pool's plugin server
//!
//! A manager moves Stopped → Serving on [`DeviceManager::start`] and back on
//! [`DeviceManager::stop`]; either transition can be repeated.

use devicelet_core::{
    Device, DeviceletError, DeviceletResult, PluginSettings, PoolConfig,
};
use devicelet_proto::device_plugin_client::DevicePluginClient;
use devicelet_proto::device_plugin_server::DevicePluginServer;
use devicelet_proto::Empty;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{debug, info, warn};

use crate::health::{HealthChecker, HealthProbe, HealthSignal, StaticProbe};
use crate::inventory::Inventory;
use crate::registration::{self, RegistrationPolicy};
use crate::service::DevicePluginService;
use crate::transport;

/// Timing knobs of a manager
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Bound on the self-connect that confirms the server is live
    pub start_timeout: Duration,
    /// How long stop waits for in-flight calls before aborting the server
    pub stop_grace: Duration,
    /// Health probe period
    pub health_interval: Duration,
    /// Registration retry policy
    pub registration: RegistrationPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        PluginSettings::default().into()
    }
}

impl From<&PluginSettings> for ManagerOptions {
    fn from(settings: &PluginSettings) -> Self {
        Self {
            start_timeout: settings.start_timeout(),
            stop_grace: settings.stop_grace(),
            health_interval: settings.health_interval(),
            registration: RegistrationPolicy {
                attempts: settings.register_attempts,
                backoff: settings.register_backoff(),
                timeout: settings.register_timeout(),
            },
        }
    }
}

impl From<PluginSettings> for ManagerOptions {
    fn from(settings: PluginSettings) -> Self {
        (&settings).into()
    }
}

/// Tasks that exist only while serving
struct ServerHandle {
    shutdown: watch::Sender<bool>,
    server: JoinHandle<Result<(), tonic::transport::Error>>,
    health: JoinHandle<()>,
}

/// Owns one pool's inventory, health signal and socket
pub struct DeviceManager {
    resource_name: String,
    socket: PathBuf,
    inventory: Arc<Inventory>,
    health: HealthSignal,
    probe: Arc<dyn HealthProbe>,
    options: ManagerOptions,
    server: Option<ServerHandle>,
}

impl DeviceManager {
    /// Create a stopped manager serving `devices` as `resource_name` on `socket`
    pub fn new(resource_name: impl Into<String>, socket: impl Into<PathBuf>, devices: Vec<Device>) -> Self {
        Self {
            resource_name: resource_name.into(),
            socket: socket.into(),
            inventory: Arc::new(Inventory::new(devices)),
            health: HealthSignal::new(),
            probe: Arc::new(StaticProbe),
            options: ManagerOptions::default(),
            server: None,
        }
    }

    /// Create a manager for a configured pool, its socket inside `settings.plugin_dir`
    pub fn from_pool(pool: &PoolConfig, settings: &PluginSettings) -> Self {
        Self::new(
            pool.resource_name.clone(),
            pool.socket_path(&settings.plugin_dir),
            pool.devices(),
        )
        .with_options(settings.into())
    }

    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Socket file name as the kubelet resolves it inside its plugin directory
    pub fn endpoint(&self) -> String {
        self.socket
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    pub fn is_serving(&self) -> bool {
        self.server.is_some()
    }

    /// Bind the socket, serve the device plugin API and confirm it answers.
    ///
    /// Starting a serving manager does nothing.
    pub async fn start(&mut self) -> DeviceletResult<()> {
        if self.server.is_some() {
            debug!(resource = %self.resource_name, "Device plugin already serving");
            return Ok(());
        }

        if self.inventory.is_empty() {
            warn!(resource = %self.resource_name, "Pool has no devices to advertise");
        }

        transport::remove_socket(&self.socket).map_err(|e| {
            DeviceletError::Startup(format!(
                "failed to remove stale socket {}: {}",
                self.socket.display(),
                e
            ))
        })?;

        let listener = UnixListener::bind(&self.socket).map_err(|e| {
            DeviceletError::Startup(format!("failed to bind {}: {}", self.socket.display(), e))
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let service = DevicePluginService::new(
            self.resource_name.clone(),
            self.inventory.clone(),
            self.health.clone(),
            shutdown_rx.clone(),
        );

        let mut server_shutdown = shutdown_rx.clone();
        let server = tokio::spawn(async move {
            Server::builder()
                .add_service(DevicePluginServer::new(service))
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async move {
                    let _ = server_shutdown.changed().await;
                })
                .await
        });

        if let Err(e) = self.confirm_serving().await {
            let _ = shutdown_tx.send(true);
            server.abort();
            if let Err(cleanup) = transport::remove_socket(&self.socket) {
                warn!(socket = ?self.socket, error = %cleanup, "Failed to remove socket after failed start");
            }
            return Err(e);
        }

        let checker = HealthChecker::new(
            self.inventory.clone(),
            self.probe.clone(),
            self.health.clone(),
            self.options.health_interval,
        );
        let health = tokio::spawn(checker.run(shutdown_rx));

        self.server = Some(ServerHandle {
            shutdown: shutdown_tx,
            server,
            health,
        });

        info!(
            resource = %self.resource_name,
            socket = ?self.socket,
            devices = self.inventory.len(),
            "Starting to serve"
        );
        Ok(())
    }

    /// Dial our own socket and complete one options round trip
    async fn confirm_serving(&self) -> DeviceletResult<()> {
        let timeout = self.options.start_timeout;

        let channel = transport::connect(&self.socket, timeout).await.map_err(|e| {
            DeviceletError::Startup(format!(
                "device plugin at {} is not reachable: {}",
                self.socket.display(),
                e
            ))
        })?;

        let mut client = DevicePluginClient::new(channel);
        match tokio::time::timeout(timeout, client.get_device_plugin_options(Empty {})).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(status)) => Err(DeviceletError::Startup(format!(
                "device plugin at {} answered with error: {}",
                self.socket.display(),
                status.message()
            ))),
            Err(_) => Err(DeviceletError::Startup(format!(
                "device plugin at {} did not answer within {:?}",
                self.socket.display(),
                timeout
            ))),
        }
    }

    /// Register this manager's socket and resource with the kubelet.
    ///
    /// Must follow a successful [`DeviceManager::start`].
    pub async fn register(&self, kubelet_socket: &Path) -> DeviceletResult<()> {
        if self.server.is_none() {
            return Err(DeviceletError::Registration(format!(
                "device plugin for {} is not serving",
                self.resource_name
            )));
        }

        registration::register(
            kubelet_socket,
            &self.endpoint(),
            &self.resource_name,
            &self.options.registration,
        )
        .await
    }

    /// Stop serving and remove the socket. Stopping a stopped manager does nothing.
    pub async fn stop(&mut self) -> DeviceletResult<()> {
        let Some(handle) = self.server.take() else {
            return Ok(());
        };

        info!(resource = %self.resource_name, socket = ?self.socket, "Stopping device plugin");

        let _ = handle.shutdown.send(true);

        let mut server = handle.server;
        match tokio::time::timeout(self.options.stop_grace, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(resource = %self.resource_name, error = %e, "Server exited with error"),
            Ok(Err(e)) => warn!(resource = %self.resource_name, error = %e, "Server task failed"),
            Err(_) => {
                warn!(
                    resource = %self.resource_name,
                    grace = ?self.options.stop_grace,
                    "In-flight calls did not finish, aborting server"
                );
                server.abort();
            }
        }

        handle.health.abort();

        transport::remove_socket(&self.socket).map_err(|e| {
            DeviceletError::Cleanup(format!(
                "failed to remove socket {}: {}",
                self.socket.display(),
                e
            ))
        })?;

        debug!(resource = %self.resource_name, "Device plugin stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicelet_core::DeviceConfig;

    fn create_test_pool() -> PoolConfig {
        PoolConfig {
            name: "dummy".to_string(),
            resource_name: "example.com/dummy".to_string(),
            devices: vec![
                DeviceConfig {
                    name: "d0".to_string(),
                    state: String::new(),
                },
                DeviceConfig {
                    name: "d1".to_string(),
                    state: String::new(),
                },
            ],
        }
    }

    #[test]
    fn test_from_pool() {
        let settings = PluginSettings {
            plugin_dir: PathBuf::from("/tmp/plugins"),
            register_attempts: 3,
            ..Default::default()
        };
        let manager = DeviceManager::from_pool(&create_test_pool(), &settings);

        assert_eq!(manager.resource_name(), "example.com/dummy");
        assert_eq!(manager.socket(), Path::new("/tmp/plugins/dummy.sock"));
        assert_eq!(manager.endpoint(), "dummy.sock");
        assert_eq!(manager.inventory().len(), 2);
        assert_eq!(manager.options.registration.attempts, 3);
        assert!(!manager.is_serving());
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let mut manager = DeviceManager::new("example.com/dummy", "/nonexistent/dummy.sock", vec![]);
        assert!(manager.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_register_requires_serving() {
        let manager = DeviceManager::new("example.com/dummy", "/nonexistent/dummy.sock", vec![]);
        let result = manager.register(Path::new("/nonexistent/kubelet.sock")).await;
        assert!(matches!(result, Err(DeviceletError::Registration(_))));
    }

    #[tokio::test]
    async fn test_start_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = DeviceManager::new(
            "example.com/dummy",
            dir.path().join("missing").join("dummy.sock"),
            vec![Device::new("d0")],
        );

        let result = manager.start().await;
        assert!(matches!(result, Err(DeviceletError::Startup(_))));
        assert!(!manager.is_serving());
    }
}
