//! Dispatch grid calculation.
//!
//! Maps a problem size and a fixed workgroup shape to the number of groups
//! to launch. Grids always round up, so the last row/column of groups may
//! contain invocations outside the logical domain; kernels bounds-check
//! those and leave them inert.

use std::fmt;

use crate::{ComputeError, ComputeResult};

/// Groups per dispatch axis every device supports.
pub const MAX_GROUPS_PER_AXIS: u32 = 65535;

/// Invocations per workgroup along x and y.
///
/// Fixed per kernel definition, independent of input data. The tiled
/// stencil uses the same shape as its output tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkgroupShape {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupShape {
    /// 2D shape.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// 1D shape (`y = 1`).
    pub const fn linear(x: u32) -> Self {
        Self { x, y: 1 }
    }

    /// Total invocations per group.
    pub const fn invocations(&self) -> u32 {
        self.x * self.y
    }

    /// Local (x, y) of a flattened local index.
    #[inline]
    pub fn local_of(&self, index: u32) -> [u32; 2] {
        [index % self.x, index / self.x]
    }

    /// Reject zero extents.
    pub fn validate(&self) -> ComputeResult<()> {
        if self.x == 0 || self.y == 0 {
            return Err(ComputeError::InvalidParams(format!(
                "workgroup shape {self} has a zero extent"
            )));
        }
        Ok(())
    }

    /// Parse `"16x16"` or `"256"`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let shape = match s.split_once(['x', 'X']) {
            Some((x, y)) => Self::new(x.trim().parse().ok()?, y.trim().parse().ok()?),
            None => Self::linear(s.parse().ok()?),
        };
        shape.validate().ok().map(|_| shape)
    }
}

impl fmt::Display for WorkgroupShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// Number of workgroups to launch along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchGrid {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y, z: 1 }
    }

    /// Grid for `n` work items in groups of `shape.x` (1D).
    ///
    /// More than [`MAX_GROUPS_PER_AXIS`] groups fold into rows; kernels
    /// recover the item index with [`DispatchGrid::linear_index`].
    pub fn linear(n: u32, shape: WorkgroupShape) -> ComputeResult<Self> {
        shape.validate()?;
        let groups = groups_1d(n, shape.x);
        if groups <= MAX_GROUPS_PER_AXIS {
            Ok(Self::new(groups, 1))
        } else {
            Ok(Self::new(MAX_GROUPS_PER_AXIS, groups.div_ceil(MAX_GROUPS_PER_AXIS)))
        }
    }

    /// Flat item index of a global invocation id in a (possibly folded)
    /// 1D grid.
    #[inline]
    pub fn linear_index(&self, shape: WorkgroupShape, global: [u32; 2]) -> u64 {
        global[1] as u64 * (self.x as u64 * shape.x as u64) + global[0] as u64
    }

    /// Grid covering a `width x height` domain.
    pub fn planar(width: u32, height: u32, shape: WorkgroupShape) -> ComputeResult<Self> {
        shape.validate()?;
        let (x, y) = groups_2d(width, height, shape.x, shape.y);
        Ok(Self::new(x, y))
    }

    /// Total groups.
    pub fn groups(&self) -> u32 {
        self.x * self.y * self.z
    }

    /// Origin of group `(gx, gy)` in invocation space.
    #[inline]
    pub fn group_origin(shape: WorkgroupShape, group: [u32; 2]) -> [u32; 2] {
        [group[0] * shape.x, group[1] * shape.y]
    }
}

impl fmt::Display for DispatchGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// `ceil(n / gx)`.
#[inline]
pub fn groups_1d(n: u32, gx: u32) -> u32 {
    n.div_ceil(gx)
}

/// `(ceil(w / gx), ceil(h / gy))`.
#[inline]
pub fn groups_2d(width: u32, height: u32, gx: u32, gy: u32) -> (u32, u32) {
    (width.div_ceil(gx), height.div_ceil(gy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_round_up() {
        assert_eq!(groups_1d(0, 256), 0);
        assert_eq!(groups_1d(1, 256), 1);
        assert_eq!(groups_1d(256, 256), 1);
        assert_eq!(groups_1d(257, 256), 2);
        assert_eq!(groups_2d(17, 16, 16, 16), (2, 1));
        assert_eq!(groups_2d(1, 1, 16, 16), (1, 1));
    }

    #[test]
    fn test_grid_always_covers_domain() {
        let shape = WorkgroupShape::new(16, 8);
        for w in 1..70 {
            for h in [1, 7, 8, 9, 33] {
                let grid = DispatchGrid::planar(w, h, shape).unwrap();
                assert!(grid.x * shape.x >= w && grid.y * shape.y >= h, "{w}x{h}");
                // One group fewer in either axis would leave items uncovered
                assert!((grid.x - 1) * shape.x < w);
                assert!((grid.y - 1) * shape.y < h);
            }
        }
    }

    #[test]
    fn test_linear_grid() {
        let grid = DispatchGrid::linear(1000, WorkgroupShape::linear(256)).unwrap();
        assert_eq!(grid, DispatchGrid::new(4, 1));
        assert_eq!(grid.groups(), 4);
    }

    #[test]
    fn test_linear_grid_folds() {
        let shape = WorkgroupShape::linear(256);
        let n = 2048 * 2048 * 4;
        let grid = DispatchGrid::linear(n, shape).unwrap();
        assert_eq!(grid.x, MAX_GROUPS_PER_AXIS);
        assert!(grid.x as u64 * grid.y as u64 * 256 >= n as u64);
        // First invocation of the second row continues where the first ended
        assert_eq!(grid.linear_index(shape, [0, 1]), MAX_GROUPS_PER_AXIS as u64 * 256);
        assert_eq!(grid.linear_index(shape, [5, 0]), 5);
    }

    #[test]
    fn test_zero_shape_rejected() {
        assert!(DispatchGrid::planar(4, 4, WorkgroupShape::new(0, 4)).is_err());
        assert!(DispatchGrid::linear(4, WorkgroupShape::new(4, 0)).is_err());
    }

    #[test]
    fn test_parse_shape() {
        assert_eq!(WorkgroupShape::parse("16x8"), Some(WorkgroupShape::new(16, 8)));
        assert_eq!(WorkgroupShape::parse("64"), Some(WorkgroupShape::linear(64)));
        assert_eq!(WorkgroupShape::parse("0x4"), None);
        assert_eq!(WorkgroupShape::parse("abc"), None);
    }

    #[test]
    fn test_local_of() {
        let shape = WorkgroupShape::new(4, 3);
        assert_eq!(shape.local_of(0), [0, 0]);
        assert_eq!(shape.local_of(5), [1, 1]);
        assert_eq!(shape.local_of(11), [3, 2]);
    }
}
