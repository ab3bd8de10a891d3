pub mod acc;
pub mod blob;
pub mod convert;
pub mod device;
pub mod layout;

pub use acc::{
    AccError, AccResult, FallbackLayerAcc, LayerAcc, LayerKind, LayerParam, LayerResource,
};
pub use blob::{Blob, BlobDesc, BlobStorage, DataType, Dims};
pub use convert::{BlobMarshaller, ConversionError, ConversionResult, MarshalOptions, Mat};
pub use device::{
    AbstractDevice, AcceleratorContext, CommandStream, DeviceContext, DeviceKind, HostContext,
};
pub use layout::{DataFormat, LayoutError};
