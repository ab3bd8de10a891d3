//! Cross-domain marshalling contracts.
//!
//! A [`Mat`] is a host-visible, canonical-layout `f32` view of a tensor.
//! Accelerator backends implement [`BlobMarshaller`] to move bytes between
//! their memory domain and a `Mat`, issuing the transfer against the
//! domain's command stream. Each primitive's own completion contract
//! (synchronous-on-return or internally ordered) is relied upon; callers
//! never wait explicitly.

use thiserror::Error;

use crate::blob::{Blob, DataType, Dims};
use crate::device::{CommandStream, DeviceKind};
use crate::layout::{DataFormat, LayoutError};

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("no device registered for {0:?}")]
    DeviceUnavailable(DeviceKind),
    #[error("device {0:?} exposes no blob marshaller")]
    NoMarshaller(DeviceKind),
    #[error("data format {0:?} is not resolved for marshalling")]
    UnresolvedFormat(DataFormat),
    #[error("marshalling supports single-precision floats, got {0:?}")]
    UnsupportedDataType(DataType),
    #[error("mat length mismatch: dims imply {expected}, buffer holds {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("mat view is read-only")]
    ReadOnlyMat,
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("transfer failed: {0}")]
    Transfer(String),
}

pub type ConversionResult<T> = Result<T, ConversionError>;

enum MatData<'a> {
    Owned(Vec<f32>),
    View(&'a [f32]),
    ViewMut(&'a mut [f32]),
}

/// Host-visible tensor view in canonical layout.
///
/// Borrowed variants materialize directly over existing storage (the
/// zero-copy path); the owned variant is scratch space for transfers that
/// need an intermediate canonical buffer.
pub struct Mat<'a> {
    dims: Dims,
    data: MatData<'a>,
}

impl Mat<'static> {
    /// Owned, zero-initialized scratch mat.
    pub fn zeroed(dims: &[usize]) -> Self {
        let len = dims.iter().product();
        Mat {
            dims: Dims::from_slice(dims),
            data: MatData::Owned(vec![0.0; len]),
        }
    }
}

impl<'a> Mat<'a> {
    /// Read-only view over existing canonical storage.
    pub fn view(dims: &[usize], data: &'a [f32]) -> ConversionResult<Self> {
        check_view_len(dims, data.len())?;
        Ok(Mat {
            dims: Dims::from_slice(dims),
            data: MatData::View(data),
        })
    }

    /// Writable view over existing canonical storage.
    pub fn view_mut(dims: &[usize], data: &'a mut [f32]) -> ConversionResult<Self> {
        check_view_len(dims, data.len())?;
        Ok(Mat {
            dims: Dims::from_slice(dims),
            data: MatData::ViewMut(data),
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        match &self.data {
            MatData::Owned(data) => data,
            MatData::View(data) => data,
            MatData::ViewMut(data) => data,
        }
    }

    pub fn as_mut_slice(&mut self) -> ConversionResult<&mut [f32]> {
        match &mut self.data {
            MatData::Owned(data) => Ok(data),
            MatData::ViewMut(data) => Ok(data),
            MatData::View(_) => Err(ConversionError::ReadOnlyMat),
        }
    }
}

fn check_view_len(dims: &[usize], found: usize) -> ConversionResult<()> {
    let expected: usize = dims.iter().product();
    if expected != found {
        return Err(ConversionError::LengthMismatch { expected, found });
    }
    Ok(())
}

/// Optional per-channel affine hints applied during a transfer.
///
/// Empty vectors mean identity; when present, lengths are interpreted
/// per-channel by the implementing backend.
#[derive(Debug, Clone, Default)]
pub struct MarshalOptions {
    pub scale: Vec<f32>,
    pub bias: Vec<f32>,
}

impl MarshalOptions {
    pub fn is_identity(&self) -> bool {
        self.scale.is_empty() && self.bias.is_empty()
    }
}

/// Conversion primitive of an accelerator domain.
///
/// Transfers are issued against the supplied command stream and must be
/// complete (or internally ordered) when the call returns.
pub trait BlobMarshaller: Send + Sync {
    /// Device-to-host: read `src` from accelerator memory into `dst`.
    fn convert_to_mat(
        &self,
        src: &Blob,
        dst: &mut Mat<'_>,
        opts: &MarshalOptions,
        stream: &CommandStream,
    ) -> ConversionResult<()>;

    /// Host-to-device: write `src` into the accelerator memory behind `dst`.
    fn convert_from_mat(
        &self,
        dst: &mut Blob,
        src: &Mat<'_>,
        opts: &MarshalOptions,
        stream: &CommandStream,
    ) -> ConversionResult<()>;
}
