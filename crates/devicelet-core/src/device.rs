//! Device records advertised to the kubelet

use serde::{Deserialize, Serialize};

/// Health value the kubelet expects for a schedulable device
pub const HEALTHY: &str = "Healthy";
/// Health value the kubelet expects for a device it must not schedule
pub const UNHEALTHY: &str = "Unhealthy";

/// Health of a single device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceHealth {
    #[default]
    Healthy,
    Unhealthy,
}

impl DeviceHealth {
    /// Wire representation used by the device plugin API
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceHealth::Healthy => HEALTHY,
            DeviceHealth::Unhealthy => UNHEALTHY,
        }
    }
}

impl std::fmt::Display for DeviceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device record within one resource pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Identifier, unique within its pool
    pub id: String,
    /// Current health
    pub health: DeviceHealth,
}

impl Device {
    /// Create a healthy device
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            health: DeviceHealth::Healthy,
        }
    }

    pub fn with_health(mut self, health: DeviceHealth) -> Self {
        self.health = health;
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.health == DeviceHealth::Healthy
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.id, self.health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_device_is_healthy() {
        let dev = Device::new("d0");
        assert!(dev.is_healthy());
        assert_eq!(dev.to_string(), "d0(Healthy)");
    }

    #[test]
    fn test_health_wire_values() {
        assert_eq!(DeviceHealth::Healthy.as_str(), "Healthy");
        assert_eq!(DeviceHealth::Unhealthy.to_string(), "Unhealthy");
    }
}
