pub mod ops;

use std::sync::Arc;

use axon_rs::device::{registry, AbstractDevice, DeviceContext, DeviceKind, HostContext};
use axon_rs::{AccResult, LayerAcc, LayerKind};

/// Baseline scalar host-domain device. Implements a small set of layer
/// accelerators in canonical layout; always available as the last fallback
/// candidate.
pub struct NaiveDevice;

impl AbstractDevice for NaiveDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Naive
    }

    fn create_layer_acc(&self, layer: LayerKind) -> Option<Box<dyn LayerAcc>> {
        match layer {
            LayerKind::Relu => Some(Box::<ops::ReluAcc>::default()),
            LayerKind::Sigmoid => Some(Box::<ops::SigmoidAcc>::default()),
            LayerKind::Scale => Some(Box::<ops::ScaleAcc>::default()),
            LayerKind::GlobalAvgPool => Some(Box::<ops::GlobalAvgPoolAcc>::default()),
            _ => None,
        }
    }

    fn create_context(&self) -> AccResult<DeviceContext> {
        Ok(DeviceContext::Host(HostContext::new(DeviceKind::Naive)))
    }
}

/// Register the naive device with the global device registry.
///
/// Called automatically via a static initializer, but can also be invoked
/// manually to make registration explicit in tests.
pub fn register_naive_device() {
    registry::register_device(Arc::new(NaiveDevice));
}

// Auto-register on library load
#[cfg(not(target_family = "wasm"))]
#[used]
#[link_section = ".init_array"]
static REGISTER_NAIVE_DEVICE: extern "C" fn() = {
    extern "C" fn register() {
        register_naive_device();
    }
    register
};
