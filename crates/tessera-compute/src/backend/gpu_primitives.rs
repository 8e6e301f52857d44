//! Device primitives abstraction shared by every backend.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use tracing::warn;

use super::GpuLimits;
use super::commands::CommandBatch;
use crate::grid::WorkgroupShape;
use crate::ComputeResult;

/// Opaque handle to a device buffer.
///
/// Ids are never reused by a device, so a stale handle is always detected
/// as use-after-free rather than silently aliasing a newer allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Capability set of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferUsage(u32);

impl BufferUsage {
    /// Bound read-only to a kernel.
    pub const STORAGE_READ: Self = Self(1 << 0);
    /// Bound read-write to a kernel.
    pub const STORAGE_READ_WRITE: Self = Self(1 << 1);
    /// Kernel parameter block.
    pub const UNIFORM: Self = Self(1 << 2);
    /// Source of a buffer-to-buffer copy.
    pub const COPY_SRC: Self = Self(1 << 3);
    /// Destination of a copy or host write.
    pub const COPY_DST: Self = Self(1 << 4);
    /// Host-readable after the batch completes.
    pub const MAP_READ: Self = Self(1 << 5);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::STORAGE_READ, "STORAGE_READ"),
        (Self::STORAGE_READ_WRITE, "STORAGE_READ_WRITE"),
        (Self::UNIFORM, "UNIFORM"),
        (Self::COPY_SRC, "COPY_SRC"),
        (Self::COPY_DST, "COPY_DST"),
        (Self::MAP_READ, "MAP_READ"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// All flags of `other` are set.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any flag of `other` is set.
    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Write-once kernel input.
    pub const fn input() -> Self {
        Self::STORAGE_READ.union(Self::COPY_DST)
    }

    /// Kernel output that can be copied out.
    pub const fn output() -> Self {
        Self::STORAGE_READ_WRITE.union(Self::COPY_SRC)
    }

    /// Ping-pong state: read in one step, written in the next.
    pub const fn ping_pong() -> Self {
        Self::STORAGE_READ
            .union(Self::STORAGE_READ_WRITE)
            .union(Self::COPY_SRC)
            .union(Self::COPY_DST)
    }

    /// Kernel parameter block.
    pub const fn uniform() -> Self {
        Self::UNIFORM.union(Self::COPY_DST)
    }

    /// Host readback staging.
    pub const fn readback() -> Self {
        Self::MAP_READ.union(Self::COPY_DST)
    }
}

impl BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for BufferUsage {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for BufferUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Length and capabilities of a live buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub id: BufferId,
    pub byte_len: u64,
    pub usage: BufferUsage,
}

/// What the device can do beyond plain dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Workgroup-shared scratch memory with a group barrier is available.
    pub shared_memory_tiling: bool,
    /// Bytes of shared scratch memory per workgroup.
    pub max_workgroup_storage_bytes: u32,
    /// Invocations per workgroup.
    pub max_invocations_per_workgroup: u32,
}

impl Capabilities {
    /// Whether a tiled stencil with this tile shape and radius fits.
    pub fn supports_tiled(&self, tile: WorkgroupShape, radius: u32, channels: u32) -> bool {
        if !self.shared_memory_tiling {
            return false;
        }
        let pw = tile.x as u64 + 2 * radius as u64;
        let ph = tile.y as u64 + 2 * radius as u64;
        let bytes = pw
            .checked_mul(ph)
            .and_then(|cells| cells.checked_mul(channels as u64 * 4));
        bytes.is_some_and(|b| b <= self.max_workgroup_storage_bytes as u64)
            && tile.invocations() <= self.max_invocations_per_workgroup
    }
}

/// Live resource accounting for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStats {
    /// Buffers allocated and not yet destroyed.
    pub live_buffers: usize,
    /// Bytes held by live buffers.
    pub bytes_in_use: u64,
    /// High-water mark of `bytes_in_use`.
    pub peak_bytes: u64,
    /// Buffers ever allocated.
    pub total_allocations: u64,
}

/// Core device operations.
///
/// Buffers are created, written and destroyed directly; kernel work and
/// device-side copies go through a [`CommandBatch`] which executes in
/// recording order once submitted. `submit` is asynchronous, `wait` is the
/// single coarse synchronization point per batch, and `map_read` is only
/// legal once the batch touching that buffer has completed.
pub trait GpuPrimitives: Send + Sync {
    /// Allocate a zero-initialized buffer.
    fn allocate(&self, byte_len: u64, usage: BufferUsage) -> ComputeResult<BufferId>;

    /// Allocate a buffer pre-filled with `contents`.
    fn allocate_init(&self, contents: &[u8], usage: BufferUsage) -> ComputeResult<BufferId> {
        let id = self.allocate(contents.len() as u64, usage | BufferUsage::COPY_DST)?;
        if let Err(e) = self.write(id, 0, contents) {
            if let Err(release) = self.destroy(id) {
                warn!(%id, error = %release, "failed to release buffer after write error");
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Write host data at `offset`. Requires `COPY_DST`.
    fn write(&self, id: BufferId, offset: u64, data: &[u8]) -> ComputeResult<()>;

    /// Release the buffer. The handle is invalid afterwards.
    fn destroy(&self, id: BufferId) -> ComputeResult<()>;

    /// Length and usage of a live buffer.
    fn describe(&self, id: BufferId) -> ComputeResult<BufferDesc>;

    /// Validate and enqueue a batch. Validation failures enqueue nothing.
    fn submit(&self, batch: CommandBatch) -> ComputeResult<()>;

    /// Block until all submitted work is done.
    ///
    /// A mid-batch failure surfaces here as `DeviceLost`; results written
    /// by that batch are undefined.
    fn wait(&self) -> ComputeResult<()>;

    /// Read back a `MAP_READ` buffer.
    fn map_read(&self, id: BufferId) -> ComputeResult<Vec<u8>>;

    /// Resource accounting.
    fn stats(&self) -> DeviceStats;

    /// Device capabilities.
    fn capabilities(&self) -> &Capabilities;

    /// Device limits.
    fn limits(&self) -> &GpuLimits;

    /// Backend name.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags() {
        let u = BufferUsage::STORAGE_READ | BufferUsage::COPY_DST;
        assert!(u.contains(BufferUsage::STORAGE_READ));
        assert!(!u.contains(BufferUsage::STORAGE_READ | BufferUsage::COPY_SRC));
        assert!(u.intersects(BufferUsage::COPY_DST | BufferUsage::MAP_READ));
        assert_eq!(u, BufferUsage::input());
        assert_eq!(u.to_string(), "STORAGE_READ | COPY_DST");
        assert_eq!(BufferUsage::empty().to_string(), "(none)");
    }

    #[test]
    fn test_tiled_capability_fits_shared_memory() {
        let caps = Capabilities {
            shared_memory_tiling: true,
            max_workgroup_storage_bytes: 16384,
            max_invocations_per_workgroup: 256,
        };
        let tile = WorkgroupShape::new(16, 16);
        // (16 + 16)^2 * 4 ch * 4 B = 16384
        assert!(caps.supports_tiled(tile, 8, 4));
        assert!(!caps.supports_tiled(tile, 9, 4));
        assert!(!caps.supports_tiled(WorkgroupShape::new(32, 32), 1, 4));
        assert!(!caps.supports_tiled(tile, u32::MAX, 4));

        let no_shared = Capabilities { shared_memory_tiling: false, ..caps };
        assert!(!no_shared.supports_tiled(tile, 1, 4));
    }

    /// CPU device whose host writes always fail.
    struct RejectWrites(crate::backend::CpuPrimitives);

    impl GpuPrimitives for RejectWrites {
        fn allocate(&self, byte_len: u64, usage: BufferUsage) -> ComputeResult<BufferId> {
            self.0.allocate(byte_len, usage)
        }
        fn write(&self, _id: BufferId, _offset: u64, _data: &[u8]) -> ComputeResult<()> {
            Err(crate::ComputeError::OperationFailed("write rejected".into()))
        }
        fn destroy(&self, id: BufferId) -> ComputeResult<()> {
            self.0.destroy(id)
        }
        fn describe(&self, id: BufferId) -> ComputeResult<BufferDesc> {
            self.0.describe(id)
        }
        fn submit(&self, batch: CommandBatch) -> ComputeResult<()> {
            self.0.submit(batch)
        }
        fn wait(&self) -> ComputeResult<()> {
            self.0.wait()
        }
        fn map_read(&self, id: BufferId) -> ComputeResult<Vec<u8>> {
            self.0.map_read(id)
        }
        fn stats(&self) -> DeviceStats {
            self.0.stats()
        }
        fn capabilities(&self) -> &Capabilities {
            self.0.capabilities()
        }
        fn limits(&self) -> &GpuLimits {
            self.0.limits()
        }
        fn name(&self) -> &'static str {
            "reject-writes"
        }
    }

    #[test]
    fn test_allocate_init_releases_on_write_error() {
        let gpu = RejectWrites(crate::backend::CpuPrimitives::with_settings(Some(1 << 16), Some(1)));
        let err = gpu.allocate_init(&[0u8; 64], BufferUsage::input()).unwrap_err();
        assert!(matches!(err, crate::ComputeError::OperationFailed(_)));
        let stats = gpu.stats();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.bytes_in_use, 0);
        assert_eq!(stats.total_allocations, 1);
    }
}
