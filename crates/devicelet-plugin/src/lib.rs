//! devicelet-plugin: kubelet device plugin machinery
//!
//! This crate provides everything one resource pool needs to be advertised:
//! - The device inventory and its health signal
//! - Pluggable health probing
//! - The `DevicePlugin` gRPC service served over a unix socket
//! - Registration with the kubelet
//! - The `DeviceManager` lifecycle tying them together

pub mod health;
pub mod inventory;
pub mod manager;
pub mod registration;
pub mod service;
pub mod transport;

pub use health::{HealthChecker, HealthProbe, HealthSignal, StaticProbe};
pub use inventory::Inventory;
pub use manager::{DeviceManager, ManagerOptions};
pub use registration::RegistrationPolicy;
pub use service::{DevicePluginService, ALLOCATED_DEVICES_ENV};
