//! CLI commands implementation

use anyhow::{Context, Result};
use devicelet_plugin::transport;
use devicelet_proto::device_plugin_client::DevicePluginClient;
use devicelet_proto::{
    AllocateRequest, ContainerAllocateRequest, Empty, ListAndWatchResponse,
    PreStartContainerRequest,
};
use std::path::Path;
use std::time::Duration;
use tonic::transport::Channel;
use tracing::debug;

/// Client for one plugin socket
pub struct PluginClient {
    client: DevicePluginClient<Channel>,
}

impl PluginClient {
    pub async fn connect(socket: &Path, timeout: Duration) -> Result<Self> {
        let channel = transport::connect(socket, timeout)
            .await
            .with_context(|| format!("Failed to connect to {}", socket.display()))?;
        debug!(socket = ?socket, "Connected");

        Ok(Self {
            client: DevicePluginClient::new(channel),
        })
    }
}

/// Turn `d0,d1` style groups into one container request each
pub fn parse_groups(groups: &[String]) -> Vec<ContainerAllocateRequest> {
    groups
        .iter()
        .map(|group| ContainerAllocateRequest {
            devices_ids: group
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
        })
        .collect()
}

/// Show the advertised plugin options
pub async fn options(client: &mut PluginClient) -> Result<()> {
    let options = client
        .client
        .get_device_plugin_options(Empty {})
        .await?
        .into_inner();

    println!("Pre-start required:             {}", options.pre_start_required);
    println!(
        "Preferred allocation available: {}",
        options.get_preferred_allocation_available
    );

    Ok(())
}

fn print_devices(update: &ListAndWatchResponse) {
    if update.devices.is_empty() {
        println!("No devices advertised");
        return;
    }

    println!("{:<30} {:<10}", "DEVICE", "HEALTH");
    println!("{}", "-".repeat(41));
    for dev in &update.devices {
        println!("{:<30} {:<10}", dev.id, dev.health);
    }
}

/// List devices, optionally following every update
pub async fn list(client: &mut PluginClient, watch: bool) -> Result<()> {
    let mut stream = client.client.list_and_watch(Empty {}).await?.into_inner();

    while let Some(update) = stream.message().await? {
        print_devices(&update);
        if !watch {
            break;
        }
        println!();
    }

    Ok(())
}

/// Allocate device groups, one container each
pub async fn allocate(client: &mut PluginClient, groups: &[String]) -> Result<()> {
    let request = AllocateRequest {
        container_requests: parse_groups(groups),
    };

    match client.client.allocate(request).await {
        Ok(response) => {
            for (idx, container) in response.into_inner().container_responses.iter().enumerate() {
                println!("Container {}:", idx);
                let mut envs: Vec<_> = container.envs.iter().collect();
                envs.sort();
                for (key, value) in envs {
                    println!("  {}={}", key, value);
                }
            }
        }
        Err(status) => {
            eprintln!("Allocation failed: {}", status.message());
        }
    }

    Ok(())
}

/// Run the pre-start hook
pub async fn prestart(client: &mut PluginClient, devices: Vec<String>) -> Result<()> {
    client
        .client
        .pre_start_container(PreStartContainerRequest {
            devices_ids: devices,
        })
        .await?;
    println!("Pre-start hook completed");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_groups() {
        let groups = vec!["d0,d1".to_string(), " d2 ,".to_string()];
        let requests = parse_groups(&groups);

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].devices_ids, vec!["d0", "d1"]);
        assert_eq!(requests[1].devices_ids, vec!["d2"]);
    }
}
