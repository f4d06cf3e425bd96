//! devicelet-proto: kubelet device plugin API bindings
//!
//! Generated from `proto/api.proto`, the `v1beta1` device plugin contract
//! served by plugins and consumed by the kubelet.

pub mod v1beta1 {
    tonic::include_proto!("v1beta1");
}

pub use v1beta1::*;

/// Device plugin API version sent at registration
pub const VERSION: &str = "v1beta1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_request_nothing() {
        let options = DevicePluginOptions::default();
        assert!(!options.pre_start_required);
        assert!(!options.get_preferred_allocation_available);
    }
}
