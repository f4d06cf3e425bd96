//! Registration handshake with the kubelet

use devicelet_core::{DeviceletError, DeviceletResult};
use devicelet_proto::registration_client::RegistrationClient;
use devicelet_proto::{RegisterRequest, VERSION};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::service::plugin_options;
use crate::transport;

/// How hard to try registering
#[derive(Debug, Clone)]
pub struct RegistrationPolicy {
    /// Total attempts; 1 fails on the first error
    pub attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
    /// Bound on connecting and on the Register call, each
    pub timeout: Duration,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Announce `endpoint` (a socket file name inside the kubelet's plugin
/// directory) as the server for `resource_name`.
pub async fn register(
    kubelet_socket: &Path,
    endpoint: &str,
    resource_name: &str,
    policy: &RegistrationPolicy,
) -> DeviceletResult<()> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match register_once(kubelet_socket, endpoint, resource_name, policy.timeout).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(
                    resource = %resource_name,
                    attempt = attempt,
                    attempts = attempts,
                    error = %e,
                    "Registration failed, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn register_once(
    kubelet_socket: &Path,
    endpoint: &str,
    resource_name: &str,
    timeout: Duration,
) -> DeviceletResult<()> {
    let channel = transport::connect(kubelet_socket, timeout)
        .await
        .map_err(|e| {
            DeviceletError::Registration(format!(
                "cannot connect to kubelet service at {}: {}",
                kubelet_socket.display(),
                e
            ))
        })?;

    let mut client = RegistrationClient::new(channel);
    let request = RegisterRequest {
        version: VERSION.to_string(),
        endpoint: endpoint.to_string(),
        resource_name: resource_name.to_string(),
        options: Some(plugin_options()),
    };

    match tokio::time::timeout(timeout, client.register(request)).await {
        Ok(Ok(_)) => {
            debug!(resource = %resource_name, endpoint = %endpoint, "Registered with kubelet");
            Ok(())
        }
        Ok(Err(status)) => Err(DeviceletError::Registration(format!(
            "cannot register to kubelet service: {}",
            status.message()
        ))),
        Err(_) => Err(DeviceletError::Registration(format!(
            "kubelet did not answer within {:?}",
            timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_fails_fast() {
        let policy = RegistrationPolicy::default();
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_kubelet_socket() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RegistrationPolicy {
            attempts: 2,
            backoff: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
        };

        let result = register(
            &dir.path().join("kubelet.sock"),
            "dummy.sock",
            "example.com/dummy",
            &policy,
        )
        .await;
        assert!(matches!(result, Err(DeviceletError::Registration(_))));
    }
}
