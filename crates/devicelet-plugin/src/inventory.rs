//! Device inventory for one resource pool

use devicelet_core::{Device, DeviceHealth, DeviceletError, DeviceletResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Authoritative device records of a pool.
///
/// The set of ids is fixed at construction; only health changes afterwards,
/// and only through [`Inventory::set_health`], which the health checker owns.
pub struct Inventory {
    /// Records in advertisement order
    devices: RwLock<Vec<Device>>,
    /// Position of each id in `devices`
    index: HashMap<String, usize>,
}

impl Inventory {
    /// Create an inventory from seeded records; later duplicates of an id are dropped
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut records = Vec::new();
        let mut index = HashMap::new();

        for device in devices {
            if index.contains_key(&device.id) {
                warn!(device = %device.id, "Ignoring duplicate device");
                continue;
            }
            index.insert(device.id.clone(), records.len());
            records.push(device);
        }

        Self {
            devices: RwLock::new(records),
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Every record, each exactly once
    pub async fn list(&self) -> Vec<Device> {
        self.devices.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Device> {
        let idx = *self.index.get(id)?;
        self.devices.read().await.get(idx).cloned()
    }

    /// Check that every id belongs to this pool, naming the first that does not
    pub fn validate<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> DeviceletResult<()> {
        for id in ids {
            if !self.contains(id) {
                return Err(DeviceletError::UnknownDevice(id.to_string()));
            }
        }
        Ok(())
    }

    /// Record a health transition.
    ///
    /// Returns the updated record when the health actually changed.
    pub(crate) async fn set_health(&self, id: &str, health: DeviceHealth) -> Option<Device> {
        let idx = *self.index.get(id)?;
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(idx)?;

        if device.health == health {
            return None;
        }

        debug!(device = %id, from = %device.health, to = %health, "Device health changed");
        device.health = health;
        Some(device.clone())
    }
}
