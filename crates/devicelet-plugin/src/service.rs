//! `DevicePlugin` gRPC service

use devicelet_core::{Device, DeviceletError, DeviceletResult};
use devicelet_proto::device_plugin_server::DevicePlugin;
use devicelet_proto::{
    AllocateRequest, AllocateResponse, ContainerAllocateResponse, DevicePluginOptions, Empty,
    ListAndWatchResponse, PreStartContainerRequest, PreStartContainerResponse,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use crate::health::HealthSignal;
use crate::inventory::Inventory;

/// Environment variable through which a container learns its granted devices
pub const ALLOCATED_DEVICES_ENV: &str = "DUMMY_DEVICES";

/// Snapshots buffered per watch stream before sends start waiting
const WATCH_BUFFER: usize = 16;

/// Capabilities advertised to the kubelet; nothing optional is requested
pub fn plugin_options() -> DevicePluginOptions {
    DevicePluginOptions {
        pre_start_required: false,
        get_preferred_allocation_available: false,
    }
}

pub fn to_wire(device: &Device) -> devicelet_proto::Device {
    devicelet_proto::Device {
        id: device.id.clone(),
        health: device.health.to_string(),
        topology: None,
    }
}

/// Map a devicelet error onto the gRPC status returned to the caller
pub fn to_status(err: DeviceletError) -> Status {
    match err {
        DeviceletError::UnknownDevice(_) => Status::invalid_argument(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

/// Full inventory as one ListAndWatch update
pub async fn snapshot(inventory: &Inventory) -> ListAndWatchResponse {
    ListAndWatchResponse {
        devices: inventory.list().await.iter().map(to_wire).collect(),
    }
}

/// Grant every container request, or none if any id is unknown.
///
/// Nothing is reserved: each call is validated against the inventory alone.
pub fn allocate_devices(
    inventory: &Inventory,
    request: &AllocateRequest,
) -> DeviceletResult<AllocateResponse> {
    let mut response = AllocateResponse::default();

    for container in &request.container_requests {
        inventory.validate(container.devices_ids.iter().map(String::as_str))?;

        response.container_responses.push(ContainerAllocateResponse {
            envs: HashMap::from([(
                ALLOCATED_DEVICES_ENV.to_string(),
                container.devices_ids.join(","),
            )]),
            ..Default::default()
        });
    }

    Ok(response)
}

/// Serves one resource pool to the kubelet
#[derive(Clone)]
pub struct DevicePluginService {
    resource_name: String,
    inventory: Arc<Inventory>,
    health: HealthSignal,
    /// Flips when the owning server stops; ends open watch streams
    shutdown: watch::Receiver<bool>,
}

impl DevicePluginService {
    pub fn new(
        resource_name: String,
        inventory: Arc<Inventory>,
        health: HealthSignal,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            resource_name,
            inventory,
            health,
            shutdown,
        }
    }
}

/// Queue one snapshot for the peer.
///
/// A peer that stops reading fills the buffer; the send then waits until the
/// server stops, and `false` is returned.
async fn send_snapshot(
    tx: &mpsc::Sender<Result<ListAndWatchResponse, Status>>,
    inventory: &Inventory,
    resource: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let response = snapshot(inventory).await;
    debug!(resource = %resource, devices = ?response.devices, "Sending device list");

    tokio::select! {
        biased;

        sent = tx.send(Ok(response)) => {
            if let Err(e) = sent {
                error!(resource = %resource, error = %e, "Failed to send response to kubelet");
            }
            true
        }
        _ = shutdown.wait_for(|stopping| *stopping) => {
            warn!(resource = %resource, "Dropping device list for a peer that stopped reading");
            false
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    type ListAndWatchStream = ReceiverStream<Result<ListAndWatchResponse, Status>>;

    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<DevicePluginOptions>, Status> {
        Ok(Response::new(plugin_options()))
    }

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListAndWatchStream>, Status> {
        info!(resource = %self.resource_name, "ListAndWatch start");

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let inventory = self.inventory.clone();
        let resource = self.resource_name.clone();
        let mut updates = self.health.subscribe();
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut open = send_snapshot(&tx, &inventory, &resource, &mut shutdown).await;

            while open {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    update = updates.recv() => match update {
                        Ok(device) => {
                            info!(resource = %resource, device = %device, "Device health update");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(resource = %resource, skipped = skipped, "Watch stream lagged behind health updates");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = tx.closed() => break,
                }

                open = send_snapshot(&tx, &inventory, &resource, &mut shutdown).await;
            }

            info!(resource = %resource, "ListAndWatch end");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> Result<Response<AllocateResponse>, Status> {
        let request = request.into_inner();

        match allocate_devices(&self.inventory, &request) {
            Ok(response) => {
                for container in &request.container_requests {
                    info!(
                        resource = %self.resource_name,
                        devices = ?container.devices_ids,
                        "Allocated devices"
                    );
                }
                Ok(Response::new(response))
            }
            Err(e) => {
                error!(resource = %self.resource_name, error = %e, "Can't allocate devices");
                Err(to_status(e))
            }
        }
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> Result<Response<PreStartContainerResponse>, Status> {
        Ok(Response::new(PreStartContainerResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicelet_core::DeviceHealth;
    use devicelet_proto::ContainerAllocateRequest;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn create_test_inventory() -> Arc<Inventory> {
        Arc::new(Inventory::new(vec![Device::new("d0"), Device::new("d1")]))
    }

    fn allocate_request(groups: &[&[&str]]) -> AllocateRequest {
        AllocateRequest {
            container_requests: groups
                .iter()
                .map(|ids| ContainerAllocateRequest {
                    devices_ids: ids.iter().map(|id| id.to_string()).collect(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_wire_format() {
        let inventory = Inventory::new(vec![
            Device::new("d0"),
            Device::new("d1").with_health(DeviceHealth::Unhealthy),
        ]);
        let response = snapshot(&inventory).await;

        let devices: Vec<(&str, &str)> = response
            .devices
            .iter()
            .map(|d| (d.id.as_str(), d.health.as_str()))
            .collect();
        assert_eq!(devices, vec![("d0", "Healthy"), ("d1", "Unhealthy")]);
    }

    #[test]
    fn test_allocate_joins_ids_per_container() {
        let inventory = create_test_inventory();
        let response =
            allocate_devices(&inventory, &allocate_request(&[&["d0"], &["d0", "d1"]])).unwrap();

        assert_eq!(response.container_responses.len(), 2);
        assert_eq!(
            response.container_responses[0].envs.get(ALLOCATED_DEVICES_ENV),
            Some(&"d0".to_string())
        );
        assert_eq!(
            response.container_responses[1].envs.get(ALLOCATED_DEVICES_ENV),
            Some(&"d0,d1".to_string())
        );
    }

    #[test]
    fn test_allocate_is_all_or_nothing() {
        let inventory = create_test_inventory();
        let err = allocate_devices(&inventory, &allocate_request(&[&["d0"], &["d1", "zz"]]))
            .unwrap_err();
        assert!(matches!(err, DeviceletError::UnknownDevice(ref id) if id == "zz"));

        let status = to_status(err);
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("zz"));
    }

    #[tokio::test]
    async fn test_options_and_prestart() {
        let (_tx, rx) = watch::channel(false);
        let service = DevicePluginService::new(
            "example.com/dummy".to_string(),
            create_test_inventory(),
            HealthSignal::new(),
            rx,
        );

        let options = service
            .get_device_plugin_options(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(options, DevicePluginOptions::default());

        let prestart = service
            .pre_start_container(Request::new(PreStartContainerRequest {
                devices_ids: vec!["d0".to_string()],
            }))
            .await;
        assert!(prestart.is_ok());
    }

    #[tokio::test]
    async fn test_watch_pushes_on_signal_and_ends_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let signal = HealthSignal::new();
        let service = DevicePluginService::new(
            "example.com/dummy".to_string(),
            create_test_inventory(),
            signal.clone(),
            shutdown_rx,
        );

        let mut stream = service
            .list_and_watch(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.devices.len(), 2);

        assert_eq!(signal.publish(Device::new("d0")), 1);
        let second = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.devices.len(), 2);

        shutdown_tx.send(true).unwrap();
        let end = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_stalled_reader_does_not_block_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let signal = HealthSignal::new();
        let service = DevicePluginService::new(
            "example.com/dummy".to_string(),
            create_test_inventory(),
            signal.clone(),
            shutdown_rx,
        );

        // held open but never read
        let _stream = service
            .list_and_watch(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();

        for _ in 0..WATCH_BUFFER * 2 {
            signal.publish(Device::new("d0"));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(signal.watchers(), 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while signal.watchers() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("watch task still running after shutdown");
    }
}
