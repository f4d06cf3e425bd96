//! Start and stop every device manager

use devicelet_core::{DeviceletError, DeviceletResult};
use devicelet_plugin::DeviceManager;
use std::path::Path;
use tracing::{error, info};

/// Start then register each manager in turn, stopping at the first failure
pub async fn start_all(managers: &mut [DeviceManager], kubelet_socket: &Path) -> DeviceletResult<()> {
    for manager in managers.iter_mut() {
        manager.start().await?;
        manager.register(kubelet_socket).await?;
        info!(resource = %manager.resource_name(), "device-plugin registered");
    }

    Ok(())
}

/// Stop every manager, collecting failures instead of stopping early
pub async fn stop_all(managers: &mut [DeviceManager]) -> Vec<(String, DeviceletError)> {
    let mut failures = Vec::new();

    for manager in managers.iter_mut() {
        if let Err(e) = manager.stop().await {
            error!(resource = %manager.resource_name(), error = %e, "Failed to stop device plugin");
            failures.push((manager.resource_name().to_string(), e));
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicelet_core::Device;
    use devicelet_plugin::ManagerOptions;
    use std::time::Duration;

    fn create_test_manager(dir: &Path, name: &str) -> DeviceManager {
        let options = ManagerOptions {
            stop_grace: Duration::from_secs(2),
            ..Default::default()
        };
        DeviceManager::new(
            format!("example.com/{}", name),
            dir.join(format!("{}.sock", name)),
            vec![Device::new("d0")],
        )
        .with_options(options)
    }

    #[tokio::test]
    async fn test_start_all_fails_without_kubelet() {
        let dir = tempfile::tempdir().unwrap();
        let mut managers = vec![
            create_test_manager(dir.path(), "first"),
            create_test_manager(dir.path(), "second"),
        ];

        let result = start_all(&mut managers, &dir.path().join("kubelet.sock")).await;
        assert!(matches!(result, Err(DeviceletError::Registration(_))));
        assert!(managers[0].is_serving());
        assert!(!managers[1].is_serving());

        assert!(stop_all(&mut managers).await.is_empty());
        assert!(!managers[0].socket().exists());
    }

    #[tokio::test]
    async fn test_stop_all_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut managers = vec![
            create_test_manager(dir.path(), "first"),
            create_test_manager(dir.path(), "second"),
        ];
        for manager in managers.iter_mut() {
            manager.start().await.unwrap();
        }

        // a non-empty directory where the first socket was cannot be removed as a file
        let blocked = managers[0].socket().to_path_buf();
        std::fs::remove_file(&blocked).unwrap();
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), b"").unwrap();

        let failures = stop_all(&mut managers).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "example.com/first");
        assert!(matches!(failures[0].1, DeviceletError::Cleanup(_)));

        assert!(!managers[0].is_serving());
        assert!(!managers[1].is_serving());
        assert!(!managers[1].socket().exists());
    }
}
