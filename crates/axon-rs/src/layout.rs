//! Tensor memory layouts and the exact permutations between them.
//!
//! The runtime operates on two concrete layouts: canonical planar NCHW and
//! the vectorized `NC4HW4` form `[N, ceil(C/4), H, W, 4]` used by packed
//! substitute kernels. Transforms are pure element permutations on `f32`
//! with zero-filled padding lanes; they never round or rescale.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Memory layout of a blob's backing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataFormat {
    /// Unresolved sentinel; the owning accelerator negotiates a concrete
    /// layout before the first forward pass.
    Auto,
    /// Canonical planar layout, dimension order N-C-H-W.
    Nchw,
    /// Packed layout `[N, ceil(C/4), H, W, 4]`, rank-4 only.
    Nc4hw4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("layout {0:?} requires rank 4, got rank {1}")]
    RankNotSupported(DataFormat, usize),
    #[error("buffer length mismatch for {format:?}: expected {expected}, found {found}")]
    LengthMismatch {
        format: DataFormat,
        expected: usize,
        found: usize,
    },
}

impl DataFormat {
    /// Number of `f32` elements a buffer of this layout holds for `dims`.
    ///
    /// The `Auto` sentinel is sized as canonical so placeholder allocations
    /// are possible before negotiation resolves the layout.
    pub fn element_count(self, dims: &[usize]) -> Result<usize, LayoutError> {
        match self {
            DataFormat::Auto | DataFormat::Nchw => Ok(dims.iter().product()),
            DataFormat::Nc4hw4 => {
                let [n, c, h, w] = rank4(self, dims)?;
                Ok(n * blocks(c) * 4 * h * w)
            }
        }
    }

    /// Whether the layout is a packed accelerator-native form.
    pub fn is_packed(self) -> bool {
        matches!(self, DataFormat::Nc4hw4)
    }
}

fn rank4(format: DataFormat, dims: &[usize]) -> Result<[usize; 4], LayoutError> {
    match *dims {
        [n, c, h, w] => Ok([n, c, h, w]),
        _ => Err(LayoutError::RankNotSupported(format, dims.len())),
    }
}

fn blocks(channels: usize) -> usize {
    (channels + 3) / 4
}

fn check_len(format: DataFormat, expected: usize, found: usize) -> Result<(), LayoutError> {
    if expected != found {
        return Err(LayoutError::LengthMismatch {
            format,
            expected,
            found,
        });
    }
    Ok(())
}

/// Packs a canonical NCHW buffer into NC4HW4 order.
///
/// Padding lanes (channels `c..blocks(c) * 4`) are zero-filled so packed
/// buffers are fully initialized regardless of the channel count.
pub fn pack_nc4hw4(src: &[f32], dst: &mut [f32], dims: &[usize]) -> Result<(), LayoutError> {
    let [n, c, h, w] = rank4(DataFormat::Nc4hw4, dims)?;
    let hw = h * w;
    check_len(DataFormat::Nchw, n * c * hw, src.len())?;
    check_len(DataFormat::Nc4hw4, n * blocks(c) * 4 * hw, dst.len())?;

    dst.fill(0.0);
    for ni in 0..n {
        for ci in 0..c {
            let lane = ci % 4;
            let src_base = (ni * c + ci) * hw;
            let dst_base = (ni * blocks(c) + ci / 4) * hw * 4;
            for s in 0..hw {
                dst[dst_base + s * 4 + lane] = src[src_base + s];
            }
        }
    }
    Ok(())
}

/// Unpacks an NC4HW4 buffer back into canonical NCHW order.
pub fn unpack_nc4hw4(src: &[f32], dst: &mut [f32], dims: &[usize]) -> Result<(), LayoutError> {
    let [n, c, h, w] = rank4(DataFormat::Nc4hw4, dims)?;
    let hw = h * w;
    check_len(DataFormat::Nc4hw4, n * blocks(c) * 4 * hw, src.len())?;
    check_len(DataFormat::Nchw, n * c * hw, dst.len())?;

    for ni in 0..n {
        for ci in 0..c {
            let lane = ci % 4;
            let src_base = (ni * blocks(c) + ci / 4) * hw * 4;
            let dst_base = (ni * c + ci) * hw;
            for s in 0..hw {
                dst[dst_base + s] = src[src_base + s * 4 + lane];
            }
        }
    }
    Ok(())
}
