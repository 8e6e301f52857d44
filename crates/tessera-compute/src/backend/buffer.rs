//! Buffer resource management.
//!
//! [`BufferRegistry`] is the bookkeeping every backend shares: id issue,
//! budget accounting, use-after-free detection and host-write checks. The
//! backend supplies the resource type `T` (host words for the CPU device,
//! `wgpu::Buffer` for wgpu).
//!
//! [`ScopedBuffer`] is the owning guard that releases a buffer exactly once
//! on every exit path.

use std::collections::{HashMap, HashSet};

use tracing::{trace, warn};

use super::gpu_primitives::{BufferDesc, BufferId, BufferUsage, DeviceStats, GpuPrimitives};
use crate::{ComputeError, ComputeResult};

/// Copy and binding granularity in bytes.
pub const BUFFER_ALIGNMENT: u64 = 4;

pub(crate) struct BufferEntry<T> {
    pub desc: BufferDesc,
    pub resource: T,
}

/// Live buffers of one device.
pub(crate) struct BufferRegistry<T> {
    next_id: u64,
    entries: HashMap<u64, BufferEntry<T>>,
    budget: Option<u64>,
    bytes_in_use: u64,
    peak_bytes: u64,
}

impl<T> BufferRegistry<T> {
    pub fn new(budget: Option<u64>) -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
            budget,
            bytes_in_use: 0,
            peak_bytes: 0,
        }
    }

    /// Check an allocation request before the backend creates the resource.
    pub fn check_allocation(&self, byte_len: u64, usage: BufferUsage) -> ComputeResult<()> {
        validate_allocation(byte_len, usage)?;
        if let Some(budget) = self.budget {
            if self.bytes_in_use.saturating_add(byte_len) > budget {
                return Err(ComputeError::OutOfMemory {
                    requested: byte_len,
                    in_use: self.bytes_in_use,
                    budget,
                });
            }
        }
        Ok(())
    }

    /// Register a created resource. Call `check_allocation` first.
    pub fn insert(&mut self, byte_len: u64, usage: BufferUsage, resource: T) -> BufferId {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id.0,
            BufferEntry {
                desc: BufferDesc { id, byte_len, usage },
                resource,
            },
        );
        self.bytes_in_use += byte_len;
        self.peak_bytes = self.peak_bytes.max(self.bytes_in_use);
        trace!(%id, byte_len, %usage, "allocate");
        id
    }

    pub fn get(&self, id: BufferId) -> ComputeResult<&BufferEntry<T>> {
        self.entries.get(&id.0).ok_or_else(|| self.missing(id))
    }

    pub fn describe(&self, id: BufferId) -> ComputeResult<BufferDesc> {
        self.get(id).map(|e| e.desc)
    }

    pub fn remove(&mut self, id: BufferId) -> ComputeResult<BufferEntry<T>> {
        let entry = self.entries.remove(&id.0).ok_or_else(|| self.missing(id))?;
        self.bytes_in_use -= entry.desc.byte_len;
        trace!(%id, byte_len = entry.desc.byte_len, "destroy");
        Ok(entry)
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            live_buffers: self.entries.len(),
            bytes_in_use: self.bytes_in_use,
            peak_bytes: self.peak_bytes,
            total_allocations: self.next_id - 1,
        }
    }

    fn missing(&self, id: BufferId) -> ComputeError {
        if id.0 > 0 && id.0 < self.next_id {
            ComputeError::UseAfterFree(id)
        } else {
            ComputeError::UnknownBuffer(id)
        }
    }
}

/// Reject zero-length, misaligned or contradictory allocations.
pub fn validate_allocation(byte_len: u64, usage: BufferUsage) -> ComputeResult<()> {
    if byte_len == 0 {
        return Err(ComputeError::InvalidParams("buffer length must be non-zero".into()));
    }
    if byte_len % BUFFER_ALIGNMENT != 0 {
        return Err(ComputeError::InvalidParams(format!(
            "buffer length {byte_len} is not a multiple of {BUFFER_ALIGNMENT}"
        )));
    }
    if usage.is_empty() {
        return Err(ComputeError::InvalidParams("buffer usage is empty".into()));
    }
    if usage.contains(BufferUsage::MAP_READ) && !BufferUsage::readback().contains(usage) {
        return Err(ComputeError::InvalidParams(format!(
            "MAP_READ may only be combined with COPY_DST, got {usage}"
        )));
    }
    Ok(())
}

/// Require every flag of `required` on `desc`.
pub fn require_usage(desc: &BufferDesc, required: BufferUsage) -> ComputeResult<()> {
    if desc.usage.contains(required) {
        Ok(())
    } else {
        Err(ComputeError::MissingUsage {
            id: desc.id,
            required: required.to_string(),
            actual: desc.usage.to_string(),
        })
    }
}

/// Bounds and alignment check for a byte range of `desc`.
pub fn check_range(desc: &BufferDesc, offset: u64, len: u64) -> ComputeResult<()> {
    if offset % BUFFER_ALIGNMENT != 0 || len % BUFFER_ALIGNMENT != 0 {
        return Err(ComputeError::InvalidParams(format!(
            "range {offset}+{len} on {} is not {BUFFER_ALIGNMENT}-byte aligned",
            desc.id
        )));
    }
    match offset.checked_add(len) {
        Some(end) if end <= desc.byte_len => Ok(()),
        _ => Err(ComputeError::OutOfBounds {
            id: desc.id,
            offset,
            len,
            byte_len: desc.byte_len,
        }),
    }
}

/// Host write precondition: `COPY_DST` and in-bounds.
pub fn check_write(desc: &BufferDesc, offset: u64, len: u64) -> ComputeResult<()> {
    require_usage(desc, BufferUsage::COPY_DST)?;
    check_range(desc, offset, len)
}

/// Decode little-endian `f32` words.
pub fn floats_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Buffers referenced by the batch currently executing.
#[derive(Debug, Default)]
pub(crate) struct InFlightSet {
    buffers: HashSet<BufferId>,
}

impl InFlightSet {
    pub fn replace(&mut self, buffers: HashSet<BufferId>) {
        self.buffers = buffers;
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn ensure_idle(&self, id: BufferId) -> ComputeResult<()> {
        if self.buffers.contains(&id) {
            Err(ComputeError::BufferBusy(id))
        } else {
            Ok(())
        }
    }
}

/// Owning buffer guard: destroys the buffer when dropped.
///
/// Release failures on drop are logged, never panicked on. Use
/// [`ScopedBuffer::release`] to observe them.
pub struct ScopedBuffer<'g, G: GpuPrimitives + ?Sized> {
    gpu: &'g G,
    id: Option<BufferId>,
}

impl<'g, G: GpuPrimitives + ?Sized> ScopedBuffer<'g, G> {
    /// Allocate a zeroed buffer under guard.
    pub fn allocate(gpu: &'g G, byte_len: u64, usage: BufferUsage) -> ComputeResult<Self> {
        let id = gpu.allocate(byte_len, usage)?;
        Ok(Self { gpu, id: Some(id) })
    }

    /// Allocate a pre-filled buffer under guard.
    pub fn allocate_init(gpu: &'g G, contents: &[u8], usage: BufferUsage) -> ComputeResult<Self> {
        let id = gpu.allocate_init(contents, usage)?;
        Ok(Self { gpu, id: Some(id) })
    }

    /// Guarded id.
    pub fn id(&self) -> BufferId {
        // Only `release` clears the id, and it consumes self.
        self.id.unwrap_or(BufferId(0))
    }

    /// Destroy now and report failure.
    pub fn release(mut self) -> ComputeResult<()> {
        match self.id.take() {
            Some(id) => self.gpu.destroy(id),
            None => Ok(()),
        }
    }
}

impl<G: GpuPrimitives + ?Sized> Drop for ScopedBuffer<'_, G> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if let Err(e) = self.gpu.destroy(id) {
                warn!(%id, error = %e, "failed to release buffer");
            }
        }
    }
}

impl<G: GpuPrimitives + ?Sized> std::fmt::Debug for ScopedBuffer<'_, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedBuffer").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(byte_len: u64, usage: BufferUsage) -> BufferDesc {
        BufferDesc { id: BufferId(7), byte_len, usage }
    }

    #[test]
    fn test_registry_use_after_free() {
        let mut reg: BufferRegistry<()> = BufferRegistry::new(None);
        reg.check_allocation(16, BufferUsage::input()).unwrap();
        let id = reg.insert(16, BufferUsage::input(), ());
        assert_eq!(reg.describe(id).unwrap().byte_len, 16);

        reg.remove(id).unwrap();
        assert!(matches!(reg.describe(id), Err(ComputeError::UseAfterFree(x)) if x == id));
        assert!(matches!(reg.remove(id), Err(ComputeError::UseAfterFree(_))));
        assert!(matches!(reg.describe(BufferId(99)), Err(ComputeError::UnknownBuffer(_))));
    }

    #[test]
    fn test_registry_budget() {
        let mut reg: BufferRegistry<()> = BufferRegistry::new(Some(64));
        reg.check_allocation(48, BufferUsage::output()).unwrap();
        let a = reg.insert(48, BufferUsage::output(), ());
        let err = reg.check_allocation(32, BufferUsage::output()).unwrap_err();
        assert!(matches!(err, ComputeError::OutOfMemory { requested: 32, in_use: 48, budget: 64 }));

        reg.remove(a).unwrap();
        reg.check_allocation(32, BufferUsage::output()).unwrap();
        let stats = reg.stats();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.peak_bytes, 48);
        assert_eq!(stats.total_allocations, 1);
    }

    #[test]
    fn test_validate_allocation() {
        assert!(validate_allocation(0, BufferUsage::input()).is_err());
        assert!(validate_allocation(6, BufferUsage::input()).is_err());
        assert!(validate_allocation(8, BufferUsage::empty()).is_err());
        assert!(validate_allocation(8, BufferUsage::readback()).is_ok());
        assert!(validate_allocation(8, BufferUsage::MAP_READ | BufferUsage::STORAGE_READ).is_err());
    }

    #[test]
    fn test_check_write() {
        let d = desc(16, BufferUsage::input());
        assert!(check_write(&d, 0, 16).is_ok());
        assert!(check_write(&d, 8, 8).is_ok());
        assert!(matches!(
            check_write(&d, 8, 12),
            Err(ComputeError::OutOfBounds { offset: 8, len: 12, byte_len: 16, .. })
        ));
        assert!(matches!(check_write(&d, 2, 4), Err(ComputeError::InvalidParams(_))));

        let ro = desc(16, BufferUsage::STORAGE_READ);
        assert!(matches!(check_write(&ro, 0, 4), Err(ComputeError::MissingUsage { .. })));
    }

    #[test]
    fn test_in_flight_set() {
        let mut set = InFlightSet::default();
        set.replace([BufferId(1), BufferId(2)].into_iter().collect());
        assert!(matches!(set.ensure_idle(BufferId(1)), Err(ComputeError::BufferBusy(_))));
        assert!(set.ensure_idle(BufferId(3)).is_ok());
        set.clear();
        assert!(set.ensure_idle(BufferId(1)).is_ok());
    }
}
