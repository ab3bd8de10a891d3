//! Backend domains, execution contexts, and the device abstraction.
//!
//! A device is a backend domain with its own memory space and execution
//! context. Accelerator domains additionally expose a command stream for
//! ordering asynchronous transfers and a blob marshaller that moves bytes
//! across the host boundary.

pub mod registry;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::acc::{AccResult, LayerAcc, LayerKind};
use crate::convert::BlobMarshaller;

/// Identifies a backend domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Accelerator domain with its own memory and asynchronous command stream.
    Gpu,
    /// Mid-tier vectorized host domain.
    Simd,
    /// Baseline scalar host domain.
    Naive,
}

/// Handle used to order and synchronize asynchronous device operations.
///
/// The concrete stream type belongs to the accelerator backend; the core
/// passes the handle through opaquely and conversion primitives downcast it.
#[derive(Clone)]
pub struct CommandStream {
    inner: Arc<dyn Any + Send + Sync>,
}

impl CommandStream {
    pub fn new<T: Any + Send + Sync>(handle: T) -> Self {
        CommandStream {
            inner: Arc::new(handle),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for CommandStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommandStream(..)")
    }
}

/// Execution context of an accelerator domain.
#[derive(Debug, Clone)]
pub struct AcceleratorContext {
    device: DeviceKind,
    stream: CommandStream,
}

impl AcceleratorContext {
    pub fn new(device: DeviceKind, stream: CommandStream) -> Self {
        AcceleratorContext { device, stream }
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn stream(&self) -> &CommandStream {
        &self.stream
    }
}

/// Execution context of a host-resident substitute domain.
#[derive(Debug, Clone)]
pub struct HostContext {
    device: DeviceKind,
}

impl HostContext {
    pub fn new(device: DeviceKind) -> Self {
        HostContext { device }
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }
}

/// Tagged union over the two context kinds, validated at API boundaries
/// instead of via runtime type inspection.
#[derive(Debug, Clone)]
pub enum DeviceContext {
    Accelerator(AcceleratorContext),
    Host(HostContext),
}

impl DeviceContext {
    pub fn device(&self) -> DeviceKind {
        match self {
            DeviceContext::Accelerator(ctx) => ctx.device(),
            DeviceContext::Host(ctx) => ctx.device(),
        }
    }
}

/// Capability surface of a registered backend domain.
pub trait AbstractDevice: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Instantiates the device's accelerator for a layer type, or `None` when
    /// the device has no implementation for it.
    fn create_layer_acc(&self, layer: LayerKind) -> Option<Box<dyn LayerAcc>>;

    /// Creates an execution context for this domain.
    fn create_context(&self) -> AccResult<DeviceContext>;

    /// The device's cross-domain conversion primitive. Host-resident domains
    /// have no boundary to cross and return `None`.
    fn marshaller(&self) -> Option<Arc<dyn BlobMarshaller>> {
        None
    }
}
