//! Kernel definitions.
//!
//! Each kernel is a pure function of (input buffer, parameters) to output
//! buffer. This module fixes the parameter layout shared with the shaders,
//! the workgroup shape of every kernel, and the host implementations the CPU
//! device runs.

pub mod blur;
pub mod life;
pub mod map;

use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};

use crate::backend::workgroup::{StorageView, dispatch_flat, dispatch_team};
use crate::grid::{DispatchGrid, WorkgroupShape};
use crate::{ComputeError, ComputeResult};

/// Element-wise map: 1D groups of 256.
pub const MAP_GROUP: WorkgroupShape = WorkgroupShape::linear(256);
/// Naive blur: 1D over pixels, groups of 256.
pub const BLUR_NAIVE_GROUP: WorkgroupShape = WorkgroupShape::linear(256);
/// Game of Life: 16x16 cells per group.
pub const LIFE_GROUP: WorkgroupShape = WorkgroupShape::new(16, 16);
/// Tiled blur output tile unless configured otherwise.
pub const DEFAULT_TILE: WorkgroupShape = WorkgroupShape::new(16, 16);
/// Largest blur radius accepted. Keeps window and padded-tile extents in range.
pub const MAX_BLUR_RADIUS: u32 = 1 << 15;

/// Kernel parameter block, uploaded as a uniform buffer.
///
/// Layout matches the `Params` struct of every shader: eight `u32`, 32 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct KernelParams {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub radius: u32,
    pub tile_w: u32,
    pub tile_h: u32,
    /// Element count (`width * height * channels` for images).
    pub len: u32,
    pub _pad: u32,
}

impl KernelParams {
    /// Size of the uniform block in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Parameters for a flat element-wise kernel.
    pub fn for_elements(len: u32) -> Self {
        Self {
            width: len,
            height: 1,
            channels: 1,
            len,
            ..Self::default()
        }
    }

    /// Parameters for an image kernel.
    pub fn for_image(width: u32, height: u32, channels: u32) -> ComputeResult<Self> {
        let len = (width as u64) * (height as u64) * (channels as u64);
        let len = u32::try_from(len).map_err(|_| {
            ComputeError::InvalidParams(format!(
                "{width}x{height}x{channels} exceeds the 32-bit element index"
            ))
        })?;
        Ok(Self {
            width,
            height,
            channels,
            len,
            ..Self::default()
        })
    }

    pub fn with_radius(mut self, radius: u32) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_tile(mut self, tile: WorkgroupShape) -> Self {
        self.tile_w = tile.x;
        self.tile_h = tile.y;
        self
    }

    /// Tile shape carried by the block.
    pub fn tile(&self) -> WorkgroupShape {
        WorkgroupShape::new(self.tile_w, self.tile_h)
    }

    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }

    /// Decode from the head of a uniform buffer.
    pub fn from_bytes(bytes: &[u8]) -> ComputeResult<Self> {
        let head = bytes.get(..Self::SIZE as usize).ok_or_else(|| {
            ComputeError::InvalidParams(format!(
                "parameter block needs {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            ))
        })?;
        Ok(bytemuck::pod_read_unaligned(head))
    }
}

/// Which kernel a dispatch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// `out[i] = in[i] * 2`.
    Double,
    /// Clamp-to-edge box blur, every tap from global memory.
    BlurNaive,
    /// Same blur with the padded tile staged in shared memory.
    BlurTiled,
    /// One Game of Life generation with toroidal wrap.
    LifeStep,
}

impl KernelKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::BlurNaive => "blur_naive",
            Self::BlurTiled => "blur_tiled",
            Self::LifeStep => "life_step",
        }
    }

    /// Workgroup shape. Fixed per kernel; the tiled blur uses its tile.
    pub fn shape(&self, params: &KernelParams) -> WorkgroupShape {
        match self {
            Self::Double => MAP_GROUP,
            Self::BlurNaive => BLUR_NAIVE_GROUP,
            Self::BlurTiled => params.tile(),
            Self::LifeStep => LIFE_GROUP,
        }
    }

    /// Grid covering the kernel's domain.
    pub fn grid(&self, params: &KernelParams) -> ComputeResult<DispatchGrid> {
        let shape = self.shape(params);
        match self {
            Self::Double => DispatchGrid::linear(params.len, shape),
            Self::BlurNaive => DispatchGrid::linear(params.pixel_count(), shape),
            Self::BlurTiled | Self::LifeStep => {
                DispatchGrid::planar(params.width, params.height, shape)
            }
        }
    }

    /// Reject parameter blocks the kernel cannot run.
    pub fn validate(&self, params: &KernelParams) -> ComputeResult<()> {
        match self {
            Self::Double => {
                if params.len == 0 {
                    return Err(ComputeError::InvalidParams("map over zero elements".into()));
                }
            }
            Self::BlurNaive | Self::BlurTiled | Self::LifeStep => {
                if params.width == 0 || params.height == 0 {
                    return Err(ComputeError::InvalidDimensions(params.width, params.height));
                }
                if params.channels == 0 {
                    return Err(ComputeError::InvalidParams("zero channels".into()));
                }
                let expected =
                    params.width as u64 * params.height as u64 * params.channels as u64;
                if params.len as u64 != expected {
                    return Err(ComputeError::InvalidParams(format!(
                        "len {} does not match {}x{}x{}",
                        params.len, params.width, params.height, params.channels
                    )));
                }
            }
        }
        if matches!(self, Self::BlurNaive | Self::BlurTiled) && params.radius > MAX_BLUR_RADIUS {
            return Err(ComputeError::InvalidParams(format!(
                "blur radius {} exceeds {MAX_BLUR_RADIUS}",
                params.radius
            )));
        }
        if *self == Self::BlurTiled {
            params.tile().validate()?;
        }
        Ok(())
    }

    /// Elements read from the source and written to the destination.
    pub fn elements(&self, params: &KernelParams) -> u64 {
        params.len as u64
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the blur is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlurStrategy {
    /// Tiled when the device supports the tile and radius, naive otherwise.
    #[default]
    Auto,
    /// Always the naive kernel.
    Naive,
    /// Always the tiled kernel; unsupported configurations are an error.
    Tiled,
}

impl BlurStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Naive => "naive",
            Self::Tiled => "tiled",
        }
    }
}

impl FromStr for BlurStrategy {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "naive" => Ok(Self::Naive),
            "tiled" => Ok(Self::Tiled),
            other => Err(ComputeError::InvalidParams(format!(
                "unknown blur strategy '{other}' (expected auto, naive or tiled)"
            ))),
        }
    }
}

impl fmt::Display for BlurStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run one dispatch on host memory.
///
/// Buffer lengths are checked against the parameter block first so a bad
/// block fails the batch instead of indexing out of range.
pub(crate) fn run_host(
    kind: KernelKind,
    shape: WorkgroupShape,
    grid: DispatchGrid,
    params: &KernelParams,
    lanes: usize,
    src: StorageView<'_>,
    dst: StorageView<'_>,
) -> ComputeResult<()> {
    kind.validate(params)?;
    let needed = kind.elements(params) as usize;
    if src.len() < needed || dst.len() < needed {
        return Err(ComputeError::InvalidParams(format!(
            "{kind} needs {needed} elements, bound buffers hold {} and {}",
            src.len(),
            dst.len()
        )));
    }

    match kind {
        KernelKind::Double => dispatch_flat(&map::DoubleKernel::new(params), shape, grid, src, dst),
        KernelKind::BlurNaive => {
            dispatch_flat(&blur::NaiveBlur::new(params), shape, grid, src, dst)
        }
        KernelKind::BlurTiled => {
            if shape != params.tile() {
                return Err(ComputeError::InvalidParams(format!(
                    "tiled blur launched with {shape} groups for a {} tile",
                    params.tile()
                )));
            }
            dispatch_team(&blur::TiledBlur::new(params), shape, grid, lanes, src, dst)
        }
        KernelKind::LifeStep => {
            dispatch_flat(&life::LifeStep::new(params), shape, grid, src, dst)
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout() {
        assert_eq!(KernelParams::SIZE, 32);
        let p = KernelParams::for_image(3, 2, 4)
            .unwrap()
            .with_radius(2)
            .with_tile(WorkgroupShape::new(8, 4));
        let bytes = bytemuck::bytes_of(&p);
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &2u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &24u32.to_le_bytes());
        assert_eq!(KernelParams::from_bytes(bytes).unwrap(), p);
        assert!(KernelParams::from_bytes(&bytes[..16]).is_err());
    }

    #[test]
    fn test_kernel_grids() {
        let p = KernelParams::for_image(33, 17, 4)
            .unwrap()
            .with_tile(WorkgroupShape::new(16, 16));
        assert_eq!(KernelKind::BlurNaive.grid(&p).unwrap(), DispatchGrid::new(3, 1));
        assert_eq!(KernelKind::BlurTiled.grid(&p).unwrap(), DispatchGrid::new(3, 2));
        assert_eq!(KernelKind::LifeStep.grid(&p).unwrap(), DispatchGrid::new(3, 2));
        let flat = KernelParams::for_elements(1000);
        assert_eq!(KernelKind::Double.grid(&flat).unwrap(), DispatchGrid::new(4, 1));
    }

    #[test]
    fn test_validate() {
        let p = KernelParams::for_image(4, 4, 4).unwrap();
        assert!(KernelKind::BlurNaive.validate(&p).is_ok());
        // Tiled requires a tile shape
        assert!(KernelKind::BlurTiled.validate(&p).is_err());
        assert!(KernelKind::BlurTiled.validate(&p.with_tile(DEFAULT_TILE)).is_ok());
        assert!(KernelKind::Double.validate(&KernelParams::for_elements(0)).is_err());

        let mut bad = p;
        bad.len = 7;
        assert!(KernelKind::LifeStep.validate(&bad).is_err());

        let wide = p.with_tile(DEFAULT_TILE).with_radius(MAX_BLUR_RADIUS);
        assert!(KernelKind::BlurNaive.validate(&wide).is_ok());
        let huge = p.with_tile(DEFAULT_TILE).with_radius(u32::MAX);
        assert!(matches!(KernelKind::BlurNaive.validate(&huge), Err(ComputeError::InvalidParams(_))));
        assert!(matches!(KernelKind::BlurTiled.validate(&huge), Err(ComputeError::InvalidParams(_))));
        // Life ignores the radius
        assert!(KernelKind::LifeStep.validate(&huge).is_ok());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Tiled".parse::<BlurStrategy>().unwrap(), BlurStrategy::Tiled);
        assert_eq!("auto".parse::<BlurStrategy>().unwrap(), BlurStrategy::Auto);
        assert!("fast".parse::<BlurStrategy>().is_err());
    }
}
