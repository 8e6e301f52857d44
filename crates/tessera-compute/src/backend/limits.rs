//! Device resource limits.
//!
//! Detected from the adapter when a GPU backend is in use, otherwise
//! conservative defaults sized for the host. Dispatch sizing checks these
//! before anything is recorded.

use crate::grid::{DispatchGrid, WorkgroupShape};
use crate::{ComputeError, ComputeResult};

/// Use at most 60% of device memory.
const MEMORY_SAFETY_MARGIN: f64 = 0.4;

const DEFAULT_DEVICE_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const DEFAULT_MAX_BUFFER_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_MAX_INVOCATIONS: u32 = 256;
const DEFAULT_MAX_WORKGROUP_STORAGE: u32 = 16 * 1024;
const DEFAULT_MAX_WORKGROUPS_PER_DIM: u32 = 65535;

/// Device resource limits.
#[derive(Debug, Clone)]
pub struct GpuLimits {
    /// Largest single buffer in bytes.
    pub max_buffer_bytes: u64,
    /// Total device memory in bytes (detected or estimated).
    pub total_memory: u64,
    /// Device memory usable after the safety margin.
    pub available_memory: u64,
    /// Invocations per workgroup.
    pub max_invocations_per_workgroup: u32,
    /// Workgroup extent along x and y.
    pub max_workgroup_size: [u32; 2],
    /// Shared scratch bytes per workgroup.
    pub max_workgroup_storage_bytes: u32,
    /// Groups per dispatch axis.
    pub max_workgroups_per_dimension: u32,
    /// Whether values were detected vs defaults.
    pub detected: bool,
}

impl Default for GpuLimits {
    fn default() -> Self {
        Self {
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            total_memory: DEFAULT_DEVICE_BYTES,
            available_memory: usable(DEFAULT_DEVICE_BYTES),
            max_invocations_per_workgroup: DEFAULT_MAX_INVOCATIONS,
            max_workgroup_size: [DEFAULT_MAX_INVOCATIONS, DEFAULT_MAX_INVOCATIONS],
            max_workgroup_storage_bytes: DEFAULT_MAX_WORKGROUP_STORAGE,
            max_workgroups_per_dimension: DEFAULT_MAX_WORKGROUPS_PER_DIM,
            detected: false,
        }
    }
}

fn usable(total: u64) -> u64 {
    (total as f64 * (1.0 - MEMORY_SAFETY_MARGIN)) as u64
}

impl GpuLimits {
    /// Limits for the host device: RAM-sized memory, generous workgroups.
    pub fn host(total_memory: u64) -> Self {
        Self {
            max_buffer_bytes: total_memory / 4,
            total_memory,
            available_memory: usable(total_memory),
            max_invocations_per_workgroup: 1024,
            max_workgroup_size: [1024, 1024],
            max_workgroup_storage_bytes: 64 * 1024,
            max_workgroups_per_dimension: u32::MAX,
            detected: true,
        }
    }

    /// Limits from a wgpu device.
    #[cfg(feature = "wgpu")]
    pub fn from_wgpu_limits(limits: &wgpu::Limits, total_memory: Option<u64>) -> Self {
        let total = total_memory.unwrap_or(DEFAULT_DEVICE_BYTES);
        Self {
            max_buffer_bytes: limits
                .max_buffer_size
                .min(limits.max_storage_buffer_binding_size as u64),
            total_memory: total,
            available_memory: usable(total),
            max_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
            max_workgroup_size: [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
            ],
            max_workgroup_storage_bytes: limits.max_compute_workgroup_storage_size,
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
            detected: true,
        }
    }

    /// Reject a workgroup shape the device cannot launch.
    pub fn check_shape(&self, shape: WorkgroupShape) -> ComputeResult<()> {
        shape.validate()?;
        if shape.invocations() > self.max_invocations_per_workgroup
            || shape.x > self.max_workgroup_size[0]
            || shape.y > self.max_workgroup_size[1]
        {
            return Err(ComputeError::Unsupported(format!(
                "workgroup {shape} exceeds device limit of {} invocations ({}x{} max)",
                self.max_invocations_per_workgroup,
                self.max_workgroup_size[0],
                self.max_workgroup_size[1]
            )));
        }
        Ok(())
    }

    /// Reject a grid with more groups per axis than the device allows.
    pub fn check_grid(&self, grid: DispatchGrid) -> ComputeResult<()> {
        let max = self.max_workgroups_per_dimension;
        if grid.x > max || grid.y > max || grid.z > max {
            return Err(ComputeError::Unsupported(format!(
                "dispatch grid {grid} exceeds {max} groups per dimension"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = GpuLimits::default();
        assert!(!limits.detected);
        assert!(limits.available_memory < limits.total_memory);
    }

    #[test]
    fn test_check_shape() {
        let limits = GpuLimits::default();
        assert!(limits.check_shape(WorkgroupShape::new(16, 16)).is_ok());
        assert!(limits.check_shape(WorkgroupShape::linear(256)).is_ok());
        assert!(limits.check_shape(WorkgroupShape::new(32, 16)).is_err());
        assert!(limits.check_shape(WorkgroupShape::new(0, 16)).is_err());
    }

    #[test]
    fn test_check_grid() {
        let limits = GpuLimits::default();
        assert!(limits.check_grid(DispatchGrid::new(65535, 1)).is_ok());
        assert!(limits.check_grid(DispatchGrid::new(65536, 1)).is_err());
    }
}
