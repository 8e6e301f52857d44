//! Host memory probing and environment overrides.
//!
//! # Environment Variables
//!
//! - `TESSERA_MEM_MB` - Device memory budget in megabytes
//! - `TESSERA_BACKEND` - Force a backend (`cpu`, `wgpu`)
//! - `TESSERA_TILE` - Tiled blur group shape (`16x16`, `32x8`)
//! - `TESSERA_LANES` - Worker lanes per simulated CPU workgroup
//! - `TESSERA_DISABLE_TILING` - Report no shared-memory tiling ("1" or "true")

use std::env;
use std::sync::OnceLock;

use crate::grid::WorkgroupShape;

/// Use at most 80% of system memory by default.
pub const SAFE_MEMORY_FRACTION: f64 = 0.80;

/// Lanes per simulated workgroup when not overridden.
pub const DEFAULT_LANES: usize = 4;

static SYSTEM_MEMORY: OnceLock<u64> = OnceLock::new();

/// Detect total system RAM in bytes.
pub fn system_memory() -> u64 {
    *SYSTEM_MEMORY.get_or_init(|| {
        sys_info::mem_info()
            .map(|m| m.total * 1024) // KB to bytes
            .unwrap_or(8 * 1024 * 1024 * 1024) // 8 GB fallback
    })
}

/// Memory the CPU device may hand out.
///
/// `TESSERA_MEM_MB` wins; otherwise 80% of system RAM.
pub fn available_memory() -> u64 {
    if let Some(mb) = env_parse::<u64>("TESSERA_MEM_MB") {
        return mb * 1024 * 1024;
    }
    (system_memory() as f64 * SAFE_MEMORY_FRACTION) as u64
}

/// Explicit budget override, if any.
pub fn budget_override() -> Option<u64> {
    env_parse::<u64>("TESSERA_MEM_MB").map(|mb| mb * 1024 * 1024)
}

/// Backend forced via environment.
pub fn backend_override() -> Option<String> {
    env::var("TESSERA_BACKEND").ok().filter(|v| !v.trim().is_empty())
}

/// Tiled blur group shape override.
pub fn tile_override() -> Option<WorkgroupShape> {
    env::var("TESSERA_TILE")
        .ok()
        .and_then(|v| WorkgroupShape::parse(&v))
}

/// Lanes per simulated workgroup override.
pub fn lanes_override() -> Option<usize> {
    env_parse::<usize>("TESSERA_LANES").filter(|&n| (1..=1024).contains(&n))
}

/// Check if shared-memory tiling is disabled via environment.
pub fn tiling_disabled() -> bool {
    env::var("TESSERA_DISABLE_TILING")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
