//! Global device registry for runtime backend lookup.
//!
//! Backend crates register their device singleton at startup (or from an
//! `.init_array` constructor); the core resolves domains by kind when
//! probing fallback candidates or marshalling across a device boundary.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use super::{AbstractDevice, DeviceKind};

static DEVICES: Lazy<RwLock<HashMap<DeviceKind, Arc<dyn AbstractDevice>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a device under its own kind, replacing any previous entry.
pub fn register_device(device: Arc<dyn AbstractDevice>) {
    let kind = device.kind();
    DEVICES.write().unwrap().insert(kind, device);
    debug!(device = ?kind, "registered device");
}

/// Resolves a registered device, or `None` when the domain is absent.
pub fn get_device(kind: DeviceKind) -> Option<Arc<dyn AbstractDevice>> {
    DEVICES.read().unwrap().get(&kind).cloned()
}

/// Lists the currently registered domains.
pub fn registered_devices() -> Vec<DeviceKind> {
    DEVICES.read().unwrap().keys().copied().collect()
}
