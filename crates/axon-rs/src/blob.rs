//! Device-tagged tensor descriptors and the blobs that carry their memory.
//!
//! A [`Blob`] pairs one [`BlobDesc`] with a memory handle in a specific
//! backend domain. Host-domain blobs own a plain `f32` vector; accelerator
//! blobs wrap a type-erased handle the owning backend knows how to interpret.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::device::DeviceKind;
use crate::layout::{DataFormat, LayoutError};

/// Logical dimensions of a tensor; rank four or below stays inline.
pub type Dims = SmallVec<[usize; 4]>;

/// Scalar element type of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float,
    Half,
    Int32,
    Int8,
}

impl DataType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Float | DataType::Int32 => 4,
            DataType::Half => 2,
            DataType::Int8 => 1,
        }
    }
}

/// Descriptor for a tensor resident in some backend domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDesc {
    pub device: DeviceKind,
    pub data_type: DataType,
    pub data_format: DataFormat,
    pub dims: Dims,
    pub name: String,
}

impl BlobDesc {
    pub fn new(device: DeviceKind, dims: &[usize], name: impl Into<String>) -> Self {
        BlobDesc {
            device,
            data_type: DataType::Float,
            data_format: DataFormat::Nchw,
            dims: Dims::from_slice(dims),
            name: name.into(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Element count implied by the descriptor's layout and dims.
    pub fn element_count(&self) -> Result<usize, LayoutError> {
        self.data_format.element_count(&self.dims)
    }
}

/// Backing memory of a blob.
pub enum BlobStorage {
    /// Host-visible `f32` storage, owned by whoever owns the blob.
    Host(Vec<f32>),
    /// Opaque accelerator-resident handle; only the owning backend's
    /// marshaller knows the concrete type behind it.
    External(Box<dyn Any + Send + Sync>),
}

impl fmt::Debug for BlobStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobStorage::Host(data) => f.debug_tuple("Host").field(&data.len()).finish(),
            BlobStorage::External(_) => f.write_str("External(..)"),
        }
    }
}

/// A tensor descriptor plus the memory it describes.
#[derive(Debug)]
pub struct Blob {
    desc: BlobDesc,
    storage: BlobStorage,
}

impl Blob {
    /// Allocates zeroed host storage sized for the descriptor.
    pub fn allocated(desc: BlobDesc) -> Result<Self, LayoutError> {
        let len = desc.element_count()?;
        Ok(Blob {
            desc,
            storage: BlobStorage::Host(vec![0.0; len]),
        })
    }

    /// Wraps an accelerator-resident handle without taking ownership of the
    /// memory behind it.
    pub fn external<T: Any + Send + Sync>(desc: BlobDesc, handle: T) -> Self {
        Blob {
            desc,
            storage: BlobStorage::External(Box::new(handle)),
        }
    }

    pub fn desc(&self) -> &BlobDesc {
        &self.desc
    }

    pub fn desc_mut(&mut self) -> &mut BlobDesc {
        &mut self.desc
    }

    /// Host view of the storage, `None` for accelerator-resident blobs.
    pub fn host_slice(&self) -> Option<&[f32]> {
        match &self.storage {
            BlobStorage::Host(data) => Some(data),
            BlobStorage::External(_) => None,
        }
    }

    pub fn host_slice_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.storage {
            BlobStorage::Host(data) => Some(data),
            BlobStorage::External(_) => None,
        }
    }

    /// Downcasts the external handle to the backend's concrete buffer type.
    pub fn external_ref<T: Any>(&self) -> Option<&T> {
        match &self.storage {
            BlobStorage::External(handle) => handle.downcast_ref::<T>(),
            BlobStorage::Host(_) => None,
        }
    }

    pub fn external_mut<T: Any>(&mut self) -> Option<&mut T> {
        match &mut self.storage {
            BlobStorage::External(handle) => handle.downcast_mut::<T>(),
            BlobStorage::Host(_) => None,
        }
    }

    /// Resizes host storage to the exact element count implied by the current
    /// descriptor. No-op for accelerator-resident blobs.
    pub fn ensure_host_len(&mut self) -> Result<(), LayoutError> {
        let len = self.desc.element_count()?;
        if let BlobStorage::Host(data) = &mut self.storage {
            if data.len() != len {
                data.resize(len, 0.0);
            }
        }
        Ok(())
    }
}
