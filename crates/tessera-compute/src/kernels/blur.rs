//! Clamp-to-edge box blur.
//!
//! Both variants compute
//! `out[x,y,c] = sum_{dy,dx in [-R,R]} in[clamp(x+dx), clamp(y+dy), c] / (2R+1)^2`
//! with the same summation order, so on the CPU device they agree bit for
//! bit. The denominator is always the full window even where clamping
//! repeats edge samples.
//!
//! The tiled variant stages the padded `(tw+2R) x (th+2R)` neighbourhood of
//! its output tile into shared memory. Every invocation of the group walks
//! the padded region with a stride of the group shape, so any tile shape
//! covers any radius, including radii larger than the tile.

use super::KernelParams;
use crate::backend::workgroup::{Invocation, Kernel, SharedTile, StorageView, TeamKernel};
use crate::grid::WorkgroupShape;
use crate::image::ImageBuffer;

/// Clamp `v` into `[0, dim)`.
#[inline]
pub fn clamp_coord(v: i64, dim: u32) -> u32 {
    v.clamp(0, dim as i64 - 1) as u32
}

/// Mean of a `(2R+1)^2` window, `dy` outer, `dx` inner.
#[inline]
pub fn window_mean(radius: u32, mut sample: impl FnMut(i64, i64) -> f32) -> f32 {
    let r = radius as i64;
    let mut sum = 0.0f32;
    for dy in -r..=r {
        for dx in -r..=r {
            sum += sample(dx, dy);
        }
    }
    let side = (2 * radius as u64 + 1) as f32;
    sum / (side * side)
}

/// Padded staging extent for a tile and radius.
#[inline]
pub fn padded_extent(tile: WorkgroupShape, radius: u32) -> [u32; 2] {
    let halo = radius.saturating_mul(2);
    [tile.x.saturating_add(halo), tile.y.saturating_add(halo)]
}

/// Visit the staging cells owned by the invocation at `local`.
///
/// Rows step by `tile.y` and columns by `tile.x`, so over a whole group the
/// cells visited partition the padded region.
#[inline]
pub fn for_each_staging_cell(
    tile: WorkgroupShape,
    radius: u32,
    local: [u32; 2],
    mut f: impl FnMut(u32, u32),
) {
    let [pw, ph] = padded_extent(tile, radius);
    let mut sly = local[1];
    while sly < ph {
        let mut slx = local[0];
        while slx < pw {
            f(slx, sly);
            slx += tile.x;
        }
        sly += tile.y;
    }
}

#[derive(Clone, Copy)]
struct Geometry {
    width: u32,
    height: u32,
    channels: u32,
    radius: u32,
}

impl Geometry {
    fn new(params: &KernelParams) -> Self {
        Self {
            width: params.width,
            height: params.height,
            channels: params.channels,
            radius: params.radius,
        }
    }

    #[inline]
    fn index(&self, x: u32, y: u32, c: u32) -> usize {
        ((y as usize) * (self.width as usize) + x as usize) * self.channels as usize + c as usize
    }
}

/// One invocation per pixel, every tap read from global memory.
pub(crate) struct NaiveBlur {
    g: Geometry,
}

impl NaiveBlur {
    pub fn new(params: &KernelParams) -> Self {
        Self { g: Geometry::new(params) }
    }
}

impl Kernel for NaiveBlur {
    fn invoke(&self, inv: Invocation, src: StorageView<'_>, dst: StorageView<'_>) {
        let g = self.g;
        let p = inv.linear;
        if p >= g.width as u64 * g.height as u64 {
            return;
        }
        let (x, y) = ((p % g.width as u64) as i64, (p / g.width as u64) as i64);
        for c in 0..g.channels {
            let v = window_mean(g.radius, |dx, dy| {
                let sx = clamp_coord(x + dx, g.width);
                let sy = clamp_coord(y + dy, g.height);
                src.load(g.index(sx, sy, c))
            });
            dst.store(g.index(x as u32, y as u32, c), v);
        }
    }
}

/// Halo-staged blur: stage, barrier, compute from shared memory.
pub(crate) struct TiledBlur {
    g: Geometry,
    tile: WorkgroupShape,
    padded: [u32; 2],
}

impl TiledBlur {
    pub fn new(params: &KernelParams) -> Self {
        let tile = params.tile();
        Self {
            g: Geometry::new(params),
            tile,
            padded: padded_extent(tile, params.radius),
        }
    }

    #[inline]
    fn shared_index(&self, slx: u32, sly: u32, c: u32) -> usize {
        ((sly as usize) * (self.padded[0] as usize) + slx as usize) * self.g.channels as usize
            + c as usize
    }
}

impl TeamKernel for TiledBlur {
    fn shared_len(&self) -> usize {
        self.padded[0] as usize * self.padded[1] as usize * self.g.channels as usize
    }

    fn stage(&self, inv: Invocation, src: StorageView<'_>, tile: &SharedTile) {
        let g = self.g;
        let r = g.radius as i64;
        let origin = [inv.group[0] * self.tile.x, inv.group[1] * self.tile.y];
        for_each_staging_cell(self.tile, g.radius, inv.local, |slx, sly| {
            let sx = clamp_coord(origin[0] as i64 + slx as i64 - r, g.width);
            let sy = clamp_coord(origin[1] as i64 + sly as i64 - r, g.height);
            for c in 0..g.channels {
                tile.store(self.shared_index(slx, sly, c), src.load(g.index(sx, sy, c)));
            }
        });
    }

    fn compute(&self, inv: Invocation, tile: &SharedTile, dst: StorageView<'_>) {
        let g = self.g;
        let [x, y] = inv.global;
        // Out-of-image invocations staged their share but write nothing
        if x >= g.width || y >= g.height {
            return;
        }
        let r = g.radius as i64;
        let (lx, ly) = (inv.local[0] as i64, inv.local[1] as i64);
        for c in 0..g.channels {
            let v = window_mean(g.radius, |dx, dy| {
                let slx = (lx + r + dx) as u32;
                let sly = (ly + r + dy) as u32;
                tile.load(self.shared_index(slx, sly, c))
            });
            dst.store(g.index(x, y, c), v);
        }
    }
}

/// Sequential host blur with the same arithmetic as the kernels.
pub fn box_blur_reference(image: &ImageBuffer, radius: u32) -> ImageBuffer {
    let (w, h, ch) = image.dimensions();
    let mut out = ImageBuffer::new(w, h, ch);
    for y in 0..h {
        for x in 0..w {
            for c in 0..ch {
                let v = window_mean(radius, |dx, dy| {
                    let sx = clamp_coord(x as i64 + dx, w);
                    let sy = clamp_coord(y as i64 + dy, h);
                    image.get(sx, sy, c)
                });
                out.set(x, y, c, v);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_covers_padded_region_once() {
        for tile in [
            WorkgroupShape::new(16, 16),
            WorkgroupShape::new(8, 4),
            WorkgroupShape::new(3, 5),
            WorkgroupShape::linear(7),
        ] {
            for radius in [0, 1, 2, 5, 9, 20] {
                let [pw, ph] = padded_extent(tile, radius);
                let mut hits = vec![0u32; (pw * ph) as usize];
                for li in 0..tile.invocations() {
                    for_each_staging_cell(tile, radius, tile.local_of(li), |x, y| {
                        hits[(y * pw + x) as usize] += 1;
                    });
                }
                assert!(
                    hits.iter().all(|&n| n == 1),
                    "tile {tile} radius {radius} staged unevenly"
                );
            }
        }
    }

    #[test]
    fn test_window_mean_constant_denominator() {
        assert_eq!(window_mean(0, |_, _| 0.5), 0.5);
        let ones = window_mean(3, |_, _| 1.0);
        assert!((ones - 1.0).abs() < 1e-6);
        // Only the centre tap is non-zero
        let centre = window_mean(1, |dx, dy| if dx == 0 && dy == 0 { 9.0 } else { 0.0 });
        assert_eq!(centre, 1.0);
    }

    #[test]
    fn test_extents_do_not_overflow() {
        let tile = WorkgroupShape::new(16, 8);
        assert_eq!(padded_extent(tile, 2), [20, 12]);
        assert_eq!(padded_extent(tile, u32::MAX), [u32::MAX, u32::MAX]);
    }

    #[test]
    fn test_reference_corner_impulse() {
        let mut img = ImageBuffer::new(9, 9, 1);
        img.set(0, 0, 0, 1.0);
        for radius in 1..4u32 {
            let out = box_blur_reference(&img, radius);
            let expected = ((radius + 1) * (radius + 1)) as f32
                / ((2 * radius + 1) * (2 * radius + 1)) as f32;
            assert!((out.get(0, 0, 0) - expected).abs() < 1e-6, "radius {radius}");
        }
    }

    #[test]
    fn test_clamp_coord() {
        assert_eq!(clamp_coord(-3, 10), 0);
        assert_eq!(clamp_coord(4, 10), 4);
        assert_eq!(clamp_coord(12, 10), 9);
        assert_eq!(clamp_coord(5, 1), 0);
    }
}
