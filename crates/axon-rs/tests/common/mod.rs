//! Shared test fixtures: a mock accelerator domain with external buffers and
//! a counting command stream, plus a packed-preference vectorized substitute.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use axon_rs::blob::{Blob, BlobDesc, DataType};
use axon_rs::convert::{BlobMarshaller, ConversionError, ConversionResult, MarshalOptions, Mat};
use axon_rs::device::{
    registry, AbstractDevice, AcceleratorContext, CommandStream, DeviceContext, DeviceKind,
    HostContext,
};
use axon_rs::layout::DataFormat;
use axon_rs::{AccError, AccResult, LayerAcc, LayerKind, LayerParam, LayerResource};

/// Stand-in for accelerator-resident memory; contents mirror canonical order.
pub struct GpuBuffer {
    pub data: Vec<f32>,
}

/// Command stream handle that counts issued transfers.
pub struct GpuStream {
    pub submissions: Arc<AtomicUsize>,
}

pub struct GpuMarshaller;

fn stream_counter(stream: &CommandStream) -> ConversionResult<&GpuStream> {
    stream
        .downcast_ref::<GpuStream>()
        .ok_or_else(|| ConversionError::Transfer("foreign command stream handle".into()))
}

fn apply_affine(data: &mut [f32], dims: &[usize], opts: &MarshalOptions) {
    if opts.is_identity() {
        return;
    }
    let batch = dims.first().copied().unwrap_or(1);
    let channels = if dims.len() >= 2 { dims[1] } else { 1 };
    let inner: usize = dims.iter().skip(2).product();
    for ni in 0..batch {
        for ci in 0..channels {
            let scale = opts.scale.get(ci).copied().unwrap_or(1.0);
            let bias = opts.bias.get(ci).copied().unwrap_or(0.0);
            let base = (ni * channels + ci) * inner;
            for s in 0..inner {
                data[base + s] = data[base + s] * scale + bias;
            }
        }
    }
}

impl BlobMarshaller for GpuMarshaller {
    fn convert_to_mat(
        &self,
        src: &Blob,
        dst: &mut Mat<'_>,
        opts: &MarshalOptions,
        stream: &CommandStream,
    ) -> ConversionResult<()> {
        stream_counter(stream)?
            .submissions
            .fetch_add(1, Ordering::SeqCst);
        let buffer = src
            .external_ref::<GpuBuffer>()
            .ok_or_else(|| ConversionError::Transfer("unexpected device buffer type".into()))?;
        if buffer.data.len() != dst.len() {
            return Err(ConversionError::LengthMismatch {
                expected: dst.len(),
                found: buffer.data.len(),
            });
        }
        let dims = dst.dims().to_vec();
        let out = dst.as_mut_slice()?;
        out.copy_from_slice(&buffer.data);
        apply_affine(out, &dims, opts);
        Ok(())
    }

    fn convert_from_mat(
        &self,
        dst: &mut Blob,
        src: &Mat<'_>,
        opts: &MarshalOptions,
        stream: &CommandStream,
    ) -> ConversionResult<()> {
        stream_counter(stream)?
            .submissions
            .fetch_add(1, Ordering::SeqCst);
        let dims = src.dims().to_vec();
        let buffer = dst
            .external_mut::<GpuBuffer>()
            .ok_or_else(|| ConversionError::Transfer("unexpected device buffer type".into()))?;
        buffer.data.clear();
        buffer.data.extend_from_slice(src.as_slice());
        apply_affine(&mut buffer.data, &dims, opts);
        Ok(())
    }
}

/// Mock accelerator domain: no native layer implementations, only memory and
/// a marshaller.
pub struct GpuDevice;

impl AbstractDevice for GpuDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Gpu
    }

    fn create_layer_acc(&self, _layer: LayerKind) -> Option<Box<dyn LayerAcc>> {
        None
    }

    fn create_context(&self) -> AccResult<DeviceContext> {
        Ok(DeviceContext::Accelerator(AcceleratorContext::new(
            DeviceKind::Gpu,
            CommandStream::new(GpuStream {
                submissions: Arc::new(AtomicUsize::new(0)),
            }),
        )))
    }

    fn marshaller(&self) -> Option<Arc<dyn BlobMarshaller>> {
        Some(Arc::new(GpuMarshaller))
    }
}

/// Vectorized substitute stub: offers only `Relu` and prefers the packed
/// layout for rank-4 blobs.
pub struct SimdDevice;

impl AbstractDevice for SimdDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Simd
    }

    fn create_layer_acc(&self, layer: LayerKind) -> Option<Box<dyn LayerAcc>> {
        match layer {
            LayerKind::Relu => Some(Box::new(SimdReluAcc)),
            _ => None,
        }
    }

    fn create_context(&self) -> AccResult<DeviceContext> {
        Ok(DeviceContext::Host(HostContext::new(DeviceKind::Simd)))
    }
}

pub struct SimdReluAcc;

impl LayerAcc for SimdReluAcc {
    fn init(
        &mut self,
        _context: &DeviceContext,
        _param: &LayerParam,
        _resource: Option<&LayerResource>,
        _inputs: &[Blob],
        _outputs: &mut [Blob],
    ) -> AccResult<()> {
        Ok(())
    }

    fn reshape(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()> {
        for (output, input) in outputs.iter_mut().zip(inputs) {
            output.desc_mut().dims = input.desc().dims.clone();
        }
        Ok(())
    }

    // Elementwise over the packed buffer; padding lanes stay zero.
    fn forward(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()> {
        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            let src = input
                .host_slice()
                .ok_or_else(|| AccError::Execution("expected host-resident blob".into()))?;
            let dst = output
                .host_slice_mut()
                .ok_or_else(|| AccError::Execution("expected host-resident blob".into()))?;
            if src.len() != dst.len() {
                return Err(AccError::Execution("buffer length mismatch".into()));
            }
            for (y, x) in dst.iter_mut().zip(src) {
                *y = x.max(0.0);
            }
        }
        Ok(())
    }

    fn supported_data_formats(&self, _data_type: DataType, rank: usize) -> Vec<DataFormat> {
        if rank == 4 {
            vec![DataFormat::Nc4hw4]
        } else {
            vec![DataFormat::Nchw]
        }
    }
}

static SETUP: Once = Once::new();

/// Registers every test device once per binary and wires test logging.
pub fn setup() {
    SETUP.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        axon_rs_backend_naive::register_naive_device();
        registry::register_device(Arc::new(GpuDevice));
        registry::register_device(Arc::new(SimdDevice));
    });
}

/// Accelerator context with an observable submission counter.
pub fn accel_context() -> (DeviceContext, Arc<AtomicUsize>) {
    let submissions = Arc::new(AtomicUsize::new(0));
    let stream = CommandStream::new(GpuStream {
        submissions: Arc::clone(&submissions),
    });
    (
        DeviceContext::Accelerator(AcceleratorContext::new(DeviceKind::Gpu, stream)),
        submissions,
    )
}

/// Accelerator-resident blob backed by a mock buffer.
pub fn gpu_blob(dims: &[usize], data: Vec<f32>, name: &str) -> Blob {
    let desc = BlobDesc::new(DeviceKind::Gpu, dims, name);
    Blob::external(desc, GpuBuffer { data })
}
