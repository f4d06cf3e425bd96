//! Device health probing and change notification

use async_trait::async_trait;
use devicelet_core::{Device, DeviceHealth};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::inventory::Inventory;

/// Pending notifications a slow watcher may fall behind by before it skips ahead
const SIGNAL_CAPACITY: usize = 64;

/// Lower bound for the probe interval; `tokio::time::interval` rejects zero
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Fan-out path carrying changed device records to every open watch stream
#[derive(Clone)]
pub struct HealthSignal {
    tx: broadcast::Sender<Device>,
}

impl HealthSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { tx }
    }

    /// Publish a changed record; returns how many watchers will see it
    pub fn publish(&self, device: Device) -> usize {
        self.tx.send(device).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Device> {
        self.tx.subscribe()
    }

    pub fn watchers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for HealthSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe deciding the current health of one device
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, device: &Device) -> DeviceHealth;

    /// Get the probe name
    fn name(&self) -> &'static str;
}

/// Probe for static pools: every device keeps the health it already has
pub struct StaticProbe;

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn probe(&self, device: &Device) -> DeviceHealth {
        device.health
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Periodically probes every device of a pool and publishes transitions
pub struct HealthChecker {
    inventory: Arc<Inventory>,
    probe: Arc<dyn HealthProbe>,
    signal: HealthSignal,
    interval: Duration,
}

impl HealthChecker {
    pub fn new(
        inventory: Arc<Inventory>,
        probe: Arc<dyn HealthProbe>,
        signal: HealthSignal,
        interval: Duration,
    ) -> Self {
        Self {
            inventory,
            probe,
            signal,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Probe every device once, applying and publishing each transition
    pub async fn check_once(&self) -> Vec<Device> {
        let mut changed = Vec::new();

        for device in self.inventory.list().await {
            let health = self.probe.probe(&device).await;
            if let Some(updated) = self.inventory.set_health(&device.id, health).await {
                info!(device = %updated.id, health = %updated.health, "Device health changed");
                let watchers = self.signal.publish(updated.clone());
                debug!(device = %updated.id, watchers = watchers, "Published health change");
                changed.push(updated);
            }
        }

        changed
    }

    /// Run until `shutdown` flips or its sender goes away
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            probe = self.probe.name(),
            interval = ?self.interval,
            "Health checker started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let devices = self.inventory.list().await;
                    debug!(devices = ?devices, "Health check tick");
                    self.check_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if self.signal.watchers() > 0 {
            warn!(
                watchers = self.signal.watchers(),
                "Health checker stopped with open watch streams"
            );
        }
        debug!("Health checker stopped");
    }
}
