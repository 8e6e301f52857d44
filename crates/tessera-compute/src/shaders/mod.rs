//! WGSL shader sources for the compute pipelines.
//!
//! Every kernel binds the same three resources: source storage (read),
//! destination storage (read-write) and the `Params` uniform whose layout is
//! [`crate::kernels::KernelParams`]. 1D kernels recover their item index
//! from a possibly folded grid as `gid.x + gid.y * num_workgroups.x * 256`.

#![cfg_attr(not(feature = "wgpu"), allow(dead_code))]

use crate::grid::WorkgroupShape;
use crate::kernels::blur::padded_extent;

/// Element-wise `dst[i] = src[i] * 2`.
pub const DOUBLE: &str = r#"
struct Params {
    width: u32, height: u32, channels: u32, radius: u32,
    tile_w: u32, tile_h: u32, len: u32, _pad: u32,
}

@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = gid.x + gid.y * nwg.x * 256u;
    if i >= params.len { return; }
    dst[i] = src[i] * 2.0;
}
"#;

/// Clamp-to-edge box blur, every tap from global memory.
pub const BLUR_NAIVE: &str = r#"
struct Params {
    width: u32, height: u32, channels: u32, radius: u32,
    tile_w: u32, tile_h: u32, len: u32, _pad: u32,
}

@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let p = gid.x + gid.y * nwg.x * 256u;
    let w = params.width;
    let h = params.height;
    let c = params.channels;
    if p >= w * h { return; }

    let x = i32(p % w);
    let y = i32(p / w);
    let r = i32(params.radius);
    let side = f32(2 * r + 1);
    let denom = side * side;

    for (var ch = 0u; ch < c; ch = ch + 1u) {
        var sum = 0.0;
        for (var dy = -r; dy <= r; dy = dy + 1) {
            let sy = u32(clamp(y + dy, 0, i32(h) - 1));
            for (var dx = -r; dx <= r; dx = dx + 1) {
                let sx = u32(clamp(x + dx, 0, i32(w) - 1));
                sum += src[(sy * w + sx) * c + ch];
            }
        }
        dst[p * c + ch] = sum / denom;
    }
}
"#;

/// Halo-staged box blur. Tile shape, radius and channel count are baked in
/// by [`tiled_blur_source`].
const BLUR_TILED_TEMPLATE: &str = r#"
struct Params {
    width: u32, height: u32, channels: u32, radius: u32,
    tile_w: u32, tile_h: u32, len: u32, _pad: u32,
}

@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

const TW: u32 = {{TILE_W}}u;
const TH: u32 = {{TILE_H}}u;
const R: u32 = {{RADIUS}}u;
const C: u32 = {{CHANNELS}}u;
const PW: u32 = TW + 2u * R;
const PH: u32 = TH + 2u * R;

var<workgroup> tile: array<f32, {{SHARED_LEN}}>;

@compute @workgroup_size({{TILE_W}}, {{TILE_H}})
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let w = params.width;
    let h = params.height;
    let ox = i32(wid.x * TW);
    let oy = i32(wid.y * TH);
    let ri = i32(R);

    // Stage the padded tile; the stride loop covers it for any radius
    for (var sly = lid.y; sly < PH; sly = sly + TH) {
        let sy = u32(clamp(oy + i32(sly) - ri, 0, i32(h) - 1));
        for (var slx = lid.x; slx < PW; slx = slx + TW) {
            let sx = u32(clamp(ox + i32(slx) - ri, 0, i32(w) - 1));
            for (var ch = 0u; ch < C; ch = ch + 1u) {
                tile[(sly * PW + slx) * C + ch] = src[(sy * w + sx) * C + ch];
            }
        }
    }

    workgroupBarrier();

    let x = wid.x * TW + lid.x;
    let y = wid.y * TH + lid.y;
    if x >= w || y >= h { return; }

    let side = f32(2u * R + 1u);
    let denom = side * side;
    for (var ch = 0u; ch < C; ch = ch + 1u) {
        var sum = 0.0;
        for (var dy = 0u; dy <= 2u * R; dy = dy + 1u) {
            for (var dx = 0u; dx <= 2u * R; dx = dx + 1u) {
                sum += tile[((lid.y + dy) * PW + (lid.x + dx)) * C + ch];
            }
        }
        dst[(y * w + x) * C + ch] = sum / denom;
    }
}
"#;

/// One Game of Life generation on a torus.
pub const LIFE_STEP: &str = r#"
struct Params {
    width: u32, height: u32, channels: u32, radius: u32,
    tile_w: u32, tile_h: u32, len: u32, _pad: u32,
}

@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let w = params.width;
    let h = params.height;
    let c = params.channels;
    if gid.x >= w || gid.y >= h { return; }

    var n = 0u;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            if dx == 0 && dy == 0 { continue; }
            let nx = u32((i32(gid.x) + dx + i32(w)) % i32(w));
            let ny = u32((i32(gid.y) + dy + i32(h)) % i32(h));
            if src[(ny * w + nx) * c] >= 0.5 { n = n + 1u; }
        }
    }

    let base = (gid.y * w + gid.x) * c;
    let alive = src[base] >= 0.5;
    let next = (alive && (n == 2u || n == 3u)) || (!alive && n == 3u);
    let v = select(0.0, 1.0, next);
    for (var ch = 0u; ch < c; ch = ch + 1u) {
        dst[base + ch] = select(v, 1.0, ch == 3u);
    }
}
"#;

/// Tiled blur source for one tile shape, radius and channel count.
pub fn tiled_blur_source(tile: WorkgroupShape, radius: u32, channels: u32) -> String {
    let [pw, ph] = padded_extent(tile, radius);
    let shared_len = pw as u64 * ph as u64 * channels as u64;
    BLUR_TILED_TEMPLATE
        .replace("{{TILE_W}}", &tile.x.to_string())
        .replace("{{TILE_H}}", &tile.y.to_string())
        .replace("{{RADIUS}}", &radius.to_string())
        .replace("{{CHANNELS}}", &channels.to_string())
        .replace("{{SHARED_LEN}}", &shared_len.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiled_source_substitution() {
        let src = tiled_blur_source(WorkgroupShape::new(16, 8), 3, 4);
        assert!(!src.contains("{{"));
        assert!(src.contains("@workgroup_size(16, 8)"));
        assert!(src.contains("const R: u32 = 3u;"));
        // (16 + 6) * (8 + 6) * 4
        assert!(src.contains("array<f32, 1232>"));
    }

    #[test]
    fn test_shaders_share_params_layout() {
        for src in [DOUBLE, BLUR_NAIVE, LIFE_STEP] {
            assert!(src.contains("var<uniform> params: Params;"));
            assert!(src.contains("tile_w: u32, tile_h: u32, len: u32, _pad: u32,"));
        }
    }
}
