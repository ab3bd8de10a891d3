//! Heterogeneous fallback execution adapter.
//!
//! Accelerator domains do not implement every layer type. This adapter lets
//! the runtime schedule such a layer on the accelerator anyway: at
//! construction it binds the first substitute domain offering the layer, and
//! on every forward pass it marshals accelerator-resident blobs into
//! adapter-owned mirror blobs, runs the substitute kernel, and marshals the
//! results back. From the caller's perspective the accelerator ran the layer.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::{AccError, AccResult, LayerAcc, LayerKind, LayerParam, LayerResource};
use crate::blob::{Blob, DataType};
use crate::convert::{BlobMarshaller, ConversionError, MarshalOptions, Mat};
use crate::device::{registry, AcceleratorContext, DeviceContext, DeviceKind};
use crate::layout::{self, DataFormat, LayoutError};

/// Substitute domains probed for a missing layer implementation, in priority
/// order. Declarative so the policy is testable apart from the probe loop.
pub const FALLBACK_PRIORITY: &[DeviceKind] = &[DeviceKind::Simd, DeviceKind::Naive];

/// Selected substitute backend: domain, its execution context, and the inner
/// accelerator the adapter delegates to.
struct Binding {
    device: DeviceKind,
    context: DeviceContext,
    inner: Box<dyn LayerAcc>,
}

/// State reached by a successful `init`: the accelerator context supplied by
/// the caller, the accelerator's conversion primitive, and the mirror blobs
/// shadowing the device blob lists.
struct MirrorSet {
    accel: AcceleratorContext,
    marshal: Arc<dyn BlobMarshaller>,
    inputs: Vec<Blob>,
    outputs: Vec<Blob>,
}

/// Layer accelerator that transparently substitutes another backend domain.
pub struct FallbackLayerAcc {
    requested: LayerKind,
    binding: Option<Binding>,
    ready: Option<MirrorSet>,
}

impl FallbackLayerAcc {
    /// Probes [`FALLBACK_PRIORITY`] and binds the first domain offering the
    /// requested layer type. An adapter that found no candidate stays
    /// permanently unbound and reports it when `init` is called.
    pub fn new(requested: LayerKind) -> Self {
        Self::with_candidates(requested, FALLBACK_PRIORITY)
    }

    /// Probes an explicit candidate list instead of the default priority
    /// table. Selection is deterministic for a fixed list and registry state.
    pub fn with_candidates(requested: LayerKind, candidates: &[DeviceKind]) -> Self {
        FallbackLayerAcc {
            requested,
            binding: probe(requested, candidates),
            ready: None,
        }
    }

    pub fn requested_layer(&self) -> LayerKind {
        self.requested
    }

    /// The substitute domain this adapter bound to, if any.
    pub fn bound_device(&self) -> Option<DeviceKind> {
        self.binding.as_ref().map(|binding| binding.device)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// The adapter-owned mirror blob lists (diagnostics), `None` before a
    /// successful `init`.
    pub fn mirror_blobs(&self) -> Option<(&[Blob], &[Blob])> {
        self.ready
            .as_ref()
            .map(|ready| (ready.inputs.as_slice(), ready.outputs.as_slice()))
    }

    fn parts(&mut self) -> AccResult<(&mut Binding, &mut MirrorSet)> {
        match (&mut self.binding, &mut self.ready) {
            (Some(binding), Some(ready)) => Ok((binding, ready)),
            (None, _) => Err(AccError::NoFallbackBackend(self.requested)),
            (Some(_), None) => Err(AccError::NotInitialized),
        }
    }

    fn try_init(
        &mut self,
        context: &DeviceContext,
        param: &LayerParam,
        resource: Option<&LayerResource>,
        inputs: &[Blob],
        outputs: &mut [Blob],
    ) -> AccResult<()> {
        let binding = self
            .binding
            .as_mut()
            .ok_or(AccError::NoFallbackBackend(self.requested))?;

        let accel = match context {
            DeviceContext::Accelerator(accel) => accel,
            DeviceContext::Host(host) => {
                return Err(AccError::ContextMismatch {
                    found: host.device(),
                })
            }
        };

        for blob in inputs.iter().chain(outputs.iter()) {
            if blob.desc().data_type != DataType::Float {
                return Err(ConversionError::UnsupportedDataType(blob.desc().data_type).into());
            }
        }

        let device = registry::get_device(accel.device())
            .ok_or(ConversionError::DeviceUnavailable(accel.device()))?;
        let marshal = device
            .marshaller()
            .ok_or(ConversionError::NoMarshaller(accel.device()))?;

        let mut mirror_inputs = Vec::with_capacity(inputs.len());
        for blob in inputs {
            mirror_inputs.push(mirror_of(blob, binding.device)?);
        }
        let mut mirror_outputs = Vec::with_capacity(outputs.len());
        for blob in outputs.iter() {
            mirror_outputs.push(mirror_of(blob, binding.device)?);
        }

        binding
            .inner
            .init(&binding.context, param, resource, &mirror_inputs, &mut mirror_outputs)?;

        // The substitute accelerator declares its preferred layout; pin each
        // mirror descriptor so forward sees a resolved format.
        for blob in mirror_inputs.iter_mut().chain(mirror_outputs.iter_mut()) {
            let formats = binding
                .inner
                .supported_data_formats(blob.desc().data_type, blob.desc().rank());
            blob.desc_mut().data_format = formats.first().copied().unwrap_or(DataFormat::Nchw);
        }

        debug!(
            layer = ?self.requested,
            device = ?binding.device,
            inputs = mirror_inputs.len(),
            outputs = mirror_outputs.len(),
            "initialized fallback adapter"
        );

        self.ready = Some(MirrorSet {
            accel: accel.clone(),
            marshal,
            inputs: mirror_inputs,
            outputs: mirror_outputs,
        });
        Ok(())
    }
}

impl LayerAcc for FallbackLayerAcc {
    fn init(
        &mut self,
        context: &DeviceContext,
        param: &LayerParam,
        resource: Option<&LayerResource>,
        inputs: &[Blob],
        outputs: &mut [Blob],
    ) -> AccResult<()> {
        let result = self.try_init(context, param, resource, inputs, outputs);
        if result.is_err() {
            // A failed init is terminal for the instance: drop the binding so
            // no later call can revive the adapter.
            self.binding = None;
            self.ready = None;
        }
        result
    }

    fn reshape(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()> {
        let (binding, ready) = self.parts()?;
        check_list_sizes(inputs.len(), outputs.len(), ready)?;

        for (mirror, device) in ready.inputs.iter_mut().zip(inputs) {
            mirror.desc_mut().dims = device.desc().dims.clone();
        }
        for (mirror, device) in ready.outputs.iter_mut().zip(outputs.iter()) {
            mirror.desc_mut().dims = device.desc().dims.clone();
        }

        binding.inner.reshape(&ready.inputs, &mut ready.outputs)
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()> {
        let (binding, ready) = self.parts()?;
        check_list_sizes(inputs.len(), outputs.len(), ready)?;
        let stream = ready.accel.stream().clone();
        let opts = MarshalOptions::default();

        // Device -> mirror. Canonical mirrors receive the transfer directly
        // over their memory; packed mirrors go through a canonical scratch
        // buffer followed by an explicit layout transform.
        for (device_in, mirror_in) in inputs.iter().zip(ready.inputs.iter_mut()) {
            mirror_in.ensure_host_len()?;
            let dims = mirror_in.desc().dims.clone();
            match mirror_in.desc().data_format {
                DataFormat::Nchw => {
                    let buf = host_mut(mirror_in)?;
                    let mut view = Mat::view_mut(&dims, buf)?;
                    ready
                        .marshal
                        .convert_to_mat(device_in, &mut view, &opts, &stream)?;
                }
                DataFormat::Nc4hw4 => {
                    let mut scratch = Mat::zeroed(&dims);
                    ready
                        .marshal
                        .convert_to_mat(device_in, &mut scratch, &opts, &stream)?;
                    layout::pack_nc4hw4(scratch.as_slice(), host_mut(mirror_in)?, &dims)?;
                }
                DataFormat::Auto => {
                    return Err(ConversionError::UnresolvedFormat(DataFormat::Auto).into())
                }
            }
            trace!(blob = %mirror_in.desc().name, "marshalled input to mirror");
        }

        for mirror_out in ready.outputs.iter_mut() {
            mirror_out.ensure_host_len()?;
        }

        binding.inner.forward(&ready.inputs, &mut ready.outputs)?;

        // Mirror -> device, propagating the substitute's output dims onto the
        // device descriptors before the transfer back.
        for (device_out, mirror_out) in outputs.iter_mut().zip(ready.outputs.iter_mut()) {
            device_out.desc_mut().dims = mirror_out.desc().dims.clone();
            let dims = mirror_out.desc().dims.clone();
            match mirror_out.desc().data_format {
                DataFormat::Nchw => {
                    let view = Mat::view(&dims, host_ref(mirror_out)?)?;
                    ready
                        .marshal
                        .convert_from_mat(device_out, &view, &opts, &stream)?;
                }
                DataFormat::Nc4hw4 => {
                    let mut scratch = Mat::zeroed(&dims);
                    layout::unpack_nc4hw4(host_ref(mirror_out)?, scratch.as_mut_slice()?, &dims)?;
                    ready
                        .marshal
                        .convert_from_mat(device_out, &scratch, &opts, &stream)?;
                }
                DataFormat::Auto => {
                    return Err(ConversionError::UnresolvedFormat(DataFormat::Auto).into())
                }
            }
            trace!(blob = %mirror_out.desc().name, "marshalled output to device");
        }

        Ok(())
    }

    /// Packed layouts this adapter accepts from the accelerator domain:
    /// exactly one for rank-4 blobs, none otherwise (forcing canonical
    /// layout upstream). Consumed by layout negotiation, never internally.
    fn supported_data_formats(&self, data_type: DataType, rank: usize) -> Vec<DataFormat> {
        let _ = data_type;
        if rank == 4 {
            vec![DataFormat::Nc4hw4]
        } else {
            Vec::new()
        }
    }
}

fn probe(requested: LayerKind, candidates: &[DeviceKind]) -> Option<Binding> {
    for &kind in candidates {
        let Some(device) = registry::get_device(kind) else {
            continue;
        };
        let Some(inner) = device.create_layer_acc(requested) else {
            continue;
        };
        let context = match device.create_context() {
            Ok(context) => context,
            Err(err) => {
                warn!(device = ?kind, layer = ?requested, %err, "context creation failed");
                return None;
            }
        };
        debug!(device = ?kind, layer = ?requested, "bound fallback backend");
        return Some(Binding {
            device: kind,
            context,
            inner,
        });
    }
    debug!(layer = ?requested, "no fallback backend offers this layer");
    None
}

fn mirror_of(blob: &Blob, device: DeviceKind) -> Result<Blob, LayoutError> {
    let mut desc = blob.desc().clone();
    desc.device = device;
    desc.data_format = DataFormat::Auto;
    Blob::allocated(desc)
}

fn check_list_sizes(inputs: usize, outputs: usize, ready: &MirrorSet) -> AccResult<()> {
    if inputs != ready.inputs.len() || outputs != ready.outputs.len() {
        return Err(AccError::Execution(format!(
            "blob list sizes changed since init: got {inputs}/{outputs}, mirrored {}/{}",
            ready.inputs.len(),
            ready.outputs.len()
        )));
    }
    Ok(())
}

fn host_mut(blob: &mut Blob) -> AccResult<&mut [f32]> {
    blob.host_slice_mut()
        .ok_or_else(|| AccError::Execution("mirror blob is not host-resident".into()))
}

fn host_ref(blob: &Blob) -> AccResult<&[f32]> {
    blob.host_slice()
        .ok_or_else(|| AccError::Execution("mirror blob is not host-resident".into()))
}
