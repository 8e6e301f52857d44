//! Conway's Game of Life on a torus.
//!
//! A cell is alive when channel 0 is at least 0.5. Output cells are
//! `(1, 1, 1, 1)` when alive and `(0, 0, 0, 1)` when dead: channel 3 is
//! always 1, every other channel carries the state.

use super::KernelParams;
use crate::backend::workgroup::{Invocation, Kernel, StorageView};
use crate::image::ImageBuffer;

/// Channel 0 threshold for a live cell.
pub const ALIVE_THRESHOLD: f32 = 0.5;

#[inline]
pub fn is_alive(v: f32) -> bool {
    v >= ALIVE_THRESHOLD
}

/// B3/S23.
#[inline]
pub fn next_state(alive: bool, neighbours: u32) -> bool {
    matches!((alive, neighbours), (true, 2) | (true, 3) | (false, 3))
}

/// `(v + d) mod dim`.
#[inline]
pub fn wrap(v: u32, d: i32, dim: u32) -> u32 {
    (v as i64 + d as i64).rem_euclid(dim as i64) as u32
}

/// Output value of channel `c` for a cell.
#[inline]
pub fn cell_value(alive: bool, c: u32) -> f32 {
    if c == 3 || alive { 1.0 } else { 0.0 }
}

pub(crate) struct LifeStep {
    width: u32,
    height: u32,
    channels: u32,
}

impl LifeStep {
    pub fn new(params: &KernelParams) -> Self {
        Self {
            width: params.width,
            height: params.height,
            channels: params.channels,
        }
    }

    #[inline]
    fn base(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + x as usize) * self.channels as usize
    }
}

impl Kernel for LifeStep {
    fn invoke(&self, inv: Invocation, src: StorageView<'_>, dst: StorageView<'_>) {
        let [x, y] = inv.global;
        if x >= self.width || y >= self.height {
            return;
        }
        let mut n = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = wrap(x, dx, self.width);
                let ny = wrap(y, dy, self.height);
                n += is_alive(src.load(self.base(nx, ny))) as u32;
            }
        }
        let alive = next_state(is_alive(src.load(self.base(x, y))), n);
        let base = self.base(x, y);
        for c in 0..self.channels {
            dst.store(base + c as usize, cell_value(alive, c));
        }
    }
}

/// Sequential host generation with the same rule.
pub fn life_step_reference(image: &ImageBuffer) -> ImageBuffer {
    let (w, h, ch) = image.dimensions();
    let mut out = ImageBuffer::new(w, h, ch);
    for y in 0..h {
        for x in 0..w {
            let mut n = 0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if (dx, dy) != (0, 0) {
                        n += is_alive(image.get(wrap(x, dx, w), wrap(y, dy, h), 0)) as u32;
                    }
                }
            }
            let alive = next_state(is_alive(image.get(x, y, 0)), n);
            for c in 0..ch {
                out.set(x, y, c, cell_value(alive, c));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_table() {
        for n in 0..=8 {
            assert_eq!(next_state(true, n), n == 2 || n == 3, "live with {n}");
            assert_eq!(next_state(false, n), n == 3, "dead with {n}");
        }
    }

    #[test]
    fn test_threshold() {
        assert!(is_alive(0.5));
        assert!(is_alive(1.0));
        assert!(!is_alive(0.4999));
        assert!(!is_alive(0.0));
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap(0, -1, 8), 7);
        assert_eq!(wrap(7, 1, 8), 0);
        assert_eq!(wrap(3, 1, 8), 4);
        assert_eq!(wrap(0, -1, 1), 0);
    }

    #[test]
    fn test_cell_value() {
        let alive: Vec<f32> = (0..4).map(|c| cell_value(true, c)).collect();
        let dead: Vec<f32> = (0..4).map(|c| cell_value(false, c)).collect();
        assert_eq!(alive, vec![1.0, 1.0, 1.0, 1.0]);
        assert_eq!(dead, vec![0.0, 0.0, 0.0, 1.0]);
    }
}
