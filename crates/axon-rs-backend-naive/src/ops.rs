//! Reference scalar kernels for the naive host domain.
//!
//! All kernels operate on host-resident `f32` blobs in canonical layout and
//! derive output shapes during `reshape`.

use axon_rs::blob::{Blob, Dims};
use axon_rs::device::DeviceContext;
use axon_rs::{AccError, AccResult, LayerAcc, LayerParam, LayerResource};

fn host_in(blob: &Blob) -> AccResult<&[f32]> {
    blob.host_slice()
        .ok_or_else(|| AccError::Execution("naive kernels require host-resident blobs".into()))
}

fn host_out(blob: &mut Blob) -> AccResult<&mut [f32]> {
    blob.host_slice_mut()
        .ok_or_else(|| AccError::Execution("naive kernels require host-resident blobs".into()))
}

fn rank4_dims(blob: &Blob) -> AccResult<[usize; 4]> {
    match *blob.desc().dims.as_slice() {
        [n, c, h, w] => Ok([n, c, h, w]),
        _ => Err(AccError::Execution(format!(
            "blob {} must be rank 4, got rank {}",
            blob.desc().name,
            blob.desc().rank()
        ))),
    }
}

fn copy_dims(inputs: &[Blob], outputs: &mut [Blob]) {
    for (output, input) in outputs.iter_mut().zip(inputs) {
        output.desc_mut().dims = input.desc().dims.clone();
    }
}

fn unary_elementwise(
    inputs: &[Blob],
    outputs: &mut [Blob],
    f: impl Fn(f32) -> f32,
) -> AccResult<()> {
    for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
        let src = host_in(input)?;
        let dst = host_out(output)?;
        if src.len() != dst.len() {
            return Err(AccError::Execution(format!(
                "elementwise buffer mismatch: input {} vs output {}",
                src.len(),
                dst.len()
            )));
        }
        for (y, x) in dst.iter_mut().zip(src) {
            *y = f(*x);
        }
    }
    Ok(())
}

/// Rectified linear unit.
#[derive(Debug, Default)]
pub struct ReluAcc;

impl LayerAcc for ReluAcc {
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
        copy_dims(inputs, outputs);
        Ok(())
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()> {
        unary_elementwise(inputs, outputs, |x| x.max(0.0))
    }
}

/// Logistic sigmoid.
#[derive(Debug, Default)]
pub struct SigmoidAcc;

impl LayerAcc for SigmoidAcc {
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
        copy_dims(inputs, outputs);
        Ok(())
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()> {
        unary_elementwise(inputs, outputs, |x| 1.0 / (1.0 + (-x).exp()))
    }
}

/// Per-channel affine transform `y = x * w[c] + b[c]`.
#[derive(Debug, Default)]
pub struct ScaleAcc {
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl LayerAcc for ScaleAcc {
    fn init(
        &mut self,
        _context: &DeviceContext,
        _param: &LayerParam,
        resource: Option<&LayerResource>,
        _inputs: &[Blob],
        _outputs: &mut [Blob],
    ) -> AccResult<()> {
        let resource = resource
            .ok_or_else(|| AccError::Execution("scale layer requires a resource".into()))?;
        if resource.weights.is_empty() {
            return Err(AccError::Execution("scale layer resource has no weights".into()));
        }
        self.weights = resource.weights.clone();
        self.bias = resource.bias.clone();
        Ok(())
    }

    fn reshape(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()> {
        copy_dims(inputs, outputs);
        Ok(())
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()> {
        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            let [n, c, h, w] = rank4_dims(input)?;
            if self.weights.len() != c {
                return Err(AccError::Execution(format!(
                    "scale weights cover {} channels, blob has {c}",
                    self.weights.len()
                )));
            }
            let src = host_in(input)?;
            let dst = host_out(output)?;
            let hw = h * w;
            for ni in 0..n {
                for ci in 0..c {
                    let weight = self.weights[ci];
                    let bias = self.bias.get(ci).copied().unwrap_or(0.0);
                    let base = (ni * c + ci) * hw;
                    for s in 0..hw {
                        dst[base + s] = src[base + s] * weight + bias;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Global average pooling over the spatial extent, output `[N, C, 1, 1]`.
#[derive(Debug, Default)]
pub struct GlobalAvgPoolAcc;

impl LayerAcc for GlobalAvgPoolAcc {
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
            let [n, c, _, _] = rank4_dims(input)?;
            output.desc_mut().dims = Dims::from_slice(&[n, c, 1, 1]);
        }
        Ok(())
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> AccResult<()> {
        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            let [n, c, h, w] = rank4_dims(input)?;
            let hw = h * w;
            if hw == 0 {
                return Err(AccError::Execution(format!(
                    "blob {} has zero spatial extent",
                    input.desc().name
                )));
            }
            let src = host_in(input)?;
            let dst = host_out(output)?;
            for ni in 0..n {
                for ci in 0..c {
                    let base = (ni * c + ci) * hw;
                    let sum: f32 = src[base..base + hw].iter().sum();
                    dst[ni * c + ci] = sum / hw as f32;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_rs::blob::BlobDesc;
    use axon_rs::device::{DeviceKind, HostContext};
    use axon_rs::LayerKind;

    fn host_blob(dims: &[usize], data: &[f32]) -> Blob {
        let desc = BlobDesc::new(DeviceKind::Naive, dims, "t");
        let mut blob = Blob::allocated(desc).unwrap();
        blob.host_slice_mut().unwrap().copy_from_slice(data);
        blob
    }

    fn ctx() -> DeviceContext {
        DeviceContext::Host(HostContext::new(DeviceKind::Naive))
    }

    #[test]
    fn relu_clamps_negatives() {
        let inputs = vec![host_blob(&[1, 1, 2, 2], &[-1.0, 0.5, -0.25, 2.0])];
        let mut outputs = vec![host_blob(&[1, 1, 2, 2], &[0.0; 4])];
        let mut acc = ReluAcc;
        let param = LayerParam::new(LayerKind::Relu, "relu");
        acc.init(&ctx(), &param, None, &inputs, &mut outputs).unwrap();
        acc.reshape(&inputs, &mut outputs).unwrap();
        acc.forward(&inputs, &mut outputs).unwrap();
        assert_eq!(outputs[0].host_slice().unwrap(), &[0.0, 0.5, 0.0, 2.0]);
    }

    #[test]
    fn sigmoid_matches_closed_form() {
        let inputs = vec![host_blob(&[1, 1, 1, 2], &[0.0, 1.0])];
        let mut outputs = vec![host_blob(&[1, 1, 1, 2], &[0.0; 2])];
        let mut acc = SigmoidAcc;
        let param = LayerParam::new(LayerKind::Sigmoid, "sig");
        acc.init(&ctx(), &param, None, &inputs, &mut outputs).unwrap();
        acc.forward(&inputs, &mut outputs).unwrap();
        let out = outputs[0].host_slice().unwrap();
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] - 1.0 / (1.0 + (-1.0f32).exp())).abs() < 1e-6);
    }

    #[test]
    fn scale_applies_per_channel_affine() {
        let inputs = vec![host_blob(&[1, 2, 1, 2], &[1.0, 2.0, 3.0, 4.0])];
        let mut outputs = vec![host_blob(&[1, 2, 1, 2], &[0.0; 4])];
        let resource = LayerResource {
            weights: vec![2.0, 10.0],
            bias: vec![0.5, -1.0],
        };
        let mut acc = ScaleAcc::default();
        let param = LayerParam::new(LayerKind::Scale, "scale");
        acc.init(&ctx(), &param, Some(&resource), &inputs, &mut outputs)
            .unwrap();
        acc.forward(&inputs, &mut outputs).unwrap();
        assert_eq!(
            outputs[0].host_slice().unwrap(),
            &[2.5, 4.5, 29.0, 39.0]
        );
    }

    #[test]
    fn scale_requires_resource() {
        let inputs = vec![host_blob(&[1, 1, 1, 1], &[1.0])];
        let mut outputs = vec![host_blob(&[1, 1, 1, 1], &[0.0])];
        let mut acc = ScaleAcc::default();
        let param = LayerParam::new(LayerKind::Scale, "scale");
        let err = acc.init(&ctx(), &param, None, &inputs, &mut outputs);
        assert!(matches!(err, Err(AccError::Execution(_))));
    }

    #[test]
    fn global_avg_pool_reduces_spatial_dims() {
        let inputs = vec![host_blob(
            &[1, 2, 2, 2],
            &[1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
        )];
        let mut outputs = vec![host_blob(&[1, 2, 2, 2], &[0.0; 8])];
        let mut acc = GlobalAvgPoolAcc;
        let param = LayerParam::new(LayerKind::GlobalAvgPool, "pool");
        acc.init(&ctx(), &param, None, &inputs, &mut outputs).unwrap();
        acc.reshape(&inputs, &mut outputs).unwrap();
        assert_eq!(outputs[0].desc().dims.as_slice(), &[1, 2, 1, 1]);
        for output in outputs.iter_mut() {
            output.ensure_host_len().unwrap();
        }
        acc.forward(&inputs, &mut outputs).unwrap();
        assert_eq!(outputs[0].host_slice().unwrap(), &[2.5, 25.0]);
    }
}
