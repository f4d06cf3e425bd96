//! devicelet-core: Core types for the devicelet device plugin
//!
//! This crate provides the fundamental types used throughout devicelet:
//! - Device records and health states
//! - Static resource definitions and agent configuration
//! - Error handling

pub mod config;
pub mod device;
pub mod error;

pub use config::*;
pub use device::*;
pub use error::*;
