//! The per-layer accelerator contract shared by every backend domain.

mod fallback;

pub use fallback::{FallbackLayerAcc, FALLBACK_PRIORITY};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blob::{Blob, DataType};
use crate::convert::ConversionError;
use crate::device::{DeviceContext, DeviceKind};
use crate::layout::{DataFormat, LayoutError};

/// Computational layer types known to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Convolution,
    Pooling,
    GlobalAvgPool,
    Relu,
    Sigmoid,
    Softmax,
    Scale,
}

/// Deserialized layer parameters, forwarded to accelerators untouched.
#[derive(Debug, Clone)]
pub struct LayerParam {
    pub kind: LayerKind,
    pub name: String,
}

impl LayerParam {
    pub fn new(kind: LayerKind, name: impl Into<String>) -> Self {
        LayerParam {
            kind,
            name: name.into(),
        }
    }
}

/// Trained weights attached to a layer, forwarded untouched.
#[derive(Debug, Clone, Default)]
pub struct LayerResource {
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

#[derive(Debug, Error)]
pub enum AccError {
    /// No fallback candidate offers an implementation for the layer type.
    #[error("no fallback backend implements layer {0:?}")]
    NoFallbackBackend(LayerKind),
    /// The supplied execution context is not of the accelerator-domain kind.
    #[error("expected an accelerator-domain context, found {found:?}")]
    ContextMismatch { found: DeviceKind },
    /// `reshape`/`forward` before a successful `init`.
    #[error("layer accelerator is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    /// Failure inside an accelerator's own kernel or contract checks.
    #[error("{0}")]
    Execution(String),
}

pub type AccResult<T> = Result<T, AccError>;

/// Per-backend, per-layer-type compute implementation.
///
/// Input/output blob lists are positional; implementations must preserve
/// index correspondence and must not retain references beyond a call.
pub trait LayerAcc: Send {
    /// One-time setup against an execution context and layer parameters.
    fn init(
        &mut self,
        context: &DeviceContext,
        param: &LayerParam,
        resource: Option<&LayerResource>,
        inputs: &[Blob],
        outputs: &mut [Blob],
    ) -> AccResult<()>;

    /// Re-derives output shapes after upstream dims changed. Called before
    /// every `forward` that follows a shape change.
    fn reshape(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()>;

    /// Executes the layer synchronously over the given blobs.
    fn forward(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()>;

    /// Layouts this accelerator accepts for blobs of the given scalar type
    /// and rank, in preference order. Defaults to canonical only.
    fn supported_data_formats(&self, data_type: DataType, rank: usize) -> Vec<DataFormat> {
        let _ = (data_type, rank);
        vec![DataFormat::Nchw]
    }
}
