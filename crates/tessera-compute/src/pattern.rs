//! Input patterns for demos, tests and benches.
//!
//! Every pattern is RGBA with alpha fixed at 1. Cell boards encode a live
//! cell as 1.0 in the colour channels and a dead one as 0.0.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::image::ImageBuffer;

const RGBA: u32 = 4;

fn fill_cells(width: u32, height: u32, mut alive: impl FnMut(u32, u32) -> bool) -> ImageBuffer {
    let mut img = ImageBuffer::new(width, height, RGBA);
    for y in 0..height {
        for x in 0..width {
            let v = if alive(x, y) { 1.0 } else { 0.0 };
            for c in 0..3 {
                img.set(x, y, c, v);
            }
            img.set(x, y, 3, 1.0);
        }
    }
    img
}

/// Black and white squares of `cell` pixels, white at the origin.
pub fn checkerboard(width: u32, height: u32, cell: u32) -> ImageBuffer {
    let cell = cell.max(1);
    fill_cells(width, height, |x, y| ((x / cell) + (y / cell)) % 2 == 0)
}

/// Black image with one white pixel.
pub fn impulse(width: u32, height: u32, x: u32, y: u32) -> ImageBuffer {
    fill_cells(width, height, |px, py| px == x && py == y)
}

/// Smooth gradient with a different ramp per channel.
pub fn gradient(width: u32, height: u32) -> ImageBuffer {
    let mut img = ImageBuffer::new(width, height, RGBA);
    let fx = (width.max(2) - 1) as f32;
    let fy = (height.max(2) - 1) as f32;
    for y in 0..height {
        for x in 0..width {
            let u = x as f32 / fx;
            let v = y as f32 / fy;
            img.set(x, y, 0, u);
            img.set(x, y, 1, v);
            img.set(x, y, 2, 0.5 * (u + v));
            img.set(x, y, 3, 1.0);
        }
    }
    img
}

/// Random board with roughly `density` of cells alive.
///
/// Deterministic in `seed`; cells are drawn in row-major order.
pub fn random_cells(width: u32, height: u32, density: f64, seed: u64) -> ImageBuffer {
    let p = if density.is_nan() { 0.0 } else { density.clamp(0.0, 1.0) };
    let mut rng = StdRng::seed_from_u64(seed);
    fill_cells(width, height, |_, _| rng.gen_bool(p))
}

/// Random noise in every colour channel.
pub fn noise(width: u32, height: u32, seed: u64) -> ImageBuffer {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = ImageBuffer::new(width, height, RGBA);
    for y in 0..height {
        for x in 0..width {
            for c in 0..3 {
                img.set(x, y, c, rng.gen_range(0.0f32..1.0));
            }
            img.set(x, y, 3, 1.0);
        }
    }
    img
}

/// Stamp live cells at `(x + dx, y + dy)`, wrapping at the edges.
pub fn stamp(img: &mut ImageBuffer, x: u32, y: u32, cells: &[(u32, u32)]) {
    let (w, h, ch) = img.dimensions();
    for &(dx, dy) in cells {
        let px = (x + dx) % w;
        let py = (y + dy) % h;
        for c in 0..ch.min(3) {
            img.set(px, py, c, 1.0);
        }
    }
}

/// Period-2 oscillator, horizontal phase.
pub const BLINKER: [(u32, u32); 3] = [(0, 1), (1, 1), (2, 1)];

/// Glider heading south-east, period 4.
pub const GLIDER: [(u32, u32); 5] = [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)];

/// 2x2 still life.
pub const BLOCK: [(u32, u32); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

/// Empty board with one pattern stamped at `(x, y)`.
pub fn seeded(width: u32, height: u32, x: u32, y: u32, cells: &[(u32, u32)]) -> ImageBuffer {
    let mut img = fill_cells(width, height, |_, _| false);
    stamp(&mut img, x, y, cells);
    img
}

/// Live cells of a board, row-major.
pub fn live_cells(img: &ImageBuffer) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    for y in 0..img.height {
        for x in 0..img.width {
            if crate::kernels::life::is_alive(img.get(x, y, 0)) {
                out.push((x, y));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkerboard() {
        let img = checkerboard(8, 8, 2);
        assert_eq!(img.get(0, 0, 0), 1.0);
        assert_eq!(img.get(2, 0, 0), 0.0);
        assert_eq!(img.get(2, 2, 1), 1.0);
        assert!((0..64).all(|i| img.data()[i * 4 + 3] == 1.0));
    }

    #[test]
    fn test_random_cells_deterministic() {
        let a = random_cells(32, 32, 0.3, 7);
        let b = random_cells(32, 32, 0.3, 7);
        let c = random_cells(32, 32, 0.3, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let alive = live_cells(&a).len() as f64 / 1024.0;
        assert!((0.2..0.4).contains(&alive), "density {alive}");
    }

    #[test]
    fn test_seeded_wraps() {
        let img = seeded(4, 4, 3, 3, &BLOCK);
        assert_eq!(live_cells(&img), vec![(0, 0), (3, 0), (0, 3), (3, 3)]);
    }

    #[test]
    fn test_noise_in_unit_range() {
        let img = noise(16, 16, 1);
        assert!(img.data().iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(img, noise(16, 16, 1));
        assert_ne!(img, noise(16, 16, 2));
    }

    #[test]
    fn test_random_cells_density_extremes() {
        assert!(live_cells(&random_cells(8, 8, 0.0, 3)).is_empty());
        assert_eq!(live_cells(&random_cells(8, 8, 1.0, 3)).len(), 64);
        // Out-of-range densities are clamped rather than rejected
        assert_eq!(live_cells(&random_cells(8, 8, 2.5, 3)).len(), 64);
        assert!(live_cells(&random_cells(8, 8, f64::NAN, 3)).is_empty());
    }
}
