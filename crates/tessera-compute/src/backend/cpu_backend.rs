//! CPU device: rayon workgroups with simulated shared memory.
//!
//! Buffers live in host RAM as atomic words. A submitted batch is resolved
//! to concrete storage under the device lock and then executed on a
//! dedicated queue thread, so `submit` returns immediately and `wait` is the
//! only point where the host blocks. Failures inside the batch are reported
//! by `wait` as [`ComputeError::DeviceLost`].

use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use super::buffer::{BufferRegistry, InFlightSet, check_write, require_usage};
use super::commands::{Command, CommandBatch, Dispatch};
use super::gpu_primitives::{BufferDesc, BufferId, BufferUsage, Capabilities, DeviceStats, GpuPrimitives};
use super::memory;
use super::workgroup::{DeviceWords, StorageView, zeroed_words};
use super::GpuLimits;
use crate::kernels::{self, KernelParams};
use crate::{ComputeError, ComputeResult};

/// Command with its buffers resolved to storage.
enum Resolved {
    Write {
        dst: DeviceWords,
        word_offset: usize,
        data: Vec<u8>,
    },
    Dispatch {
        dispatch: Dispatch,
        src: DeviceWords,
        dst: DeviceWords,
        params: DeviceWords,
    },
    Copy {
        src: DeviceWords,
        src_word: usize,
        dst: DeviceWords,
        dst_word: usize,
        words: usize,
    },
}

struct CpuState {
    buffers: BufferRegistry<DeviceWords>,
    queue: Option<JoinHandle<ComputeResult<()>>>,
    in_flight: InFlightSet,
    /// Failure of a batch that was joined by a later submit.
    pending_error: Option<ComputeError>,
}

/// CPU primitives implementation.
pub struct CpuPrimitives {
    state: Mutex<CpuState>,
    limits: GpuLimits,
    capabilities: Capabilities,
    lanes: usize,
}

impl CpuPrimitives {
    /// Device with budget, lanes and tiling taken from the environment.
    pub fn new() -> Self {
        Self::with_settings(memory::budget_override(), memory::lanes_override())
    }

    /// Device with an explicit memory budget and lane count.
    ///
    /// `None` budget means 80% of system RAM; `None` lanes means the
    /// default team size.
    pub fn with_settings(budget: Option<u64>, lanes: Option<usize>) -> Self {
        let limits = GpuLimits::host(memory::system_memory());
        let budget = budget.unwrap_or_else(memory::available_memory);
        let capabilities = Capabilities {
            shared_memory_tiling: !memory::tiling_disabled(),
            max_workgroup_storage_bytes: limits.max_workgroup_storage_bytes,
            max_invocations_per_workgroup: limits.max_invocations_per_workgroup,
        };
        let lanes = lanes.unwrap_or(memory::DEFAULT_LANES).max(1);
        debug!(
            budget = %memory::format_bytes(budget),
            lanes,
            tiling = capabilities.shared_memory_tiling,
            "cpu device"
        );
        Self {
            state: Mutex::new(CpuState {
                buffers: BufferRegistry::new(Some(budget)),
                queue: None,
                in_flight: InFlightSet::default(),
                pending_error: None,
            }),
            limits,
            capabilities,
            lanes,
        }
    }

    /// Lanes per simulated workgroup.
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    fn lock(&self) -> ComputeResult<std::sync::MutexGuard<'_, CpuState>> {
        self.state
            .lock()
            .map_err(|_| ComputeError::DeviceLost("cpu device state poisoned".into()))
    }

    fn resolve(state: &CpuState, batch: CommandBatch) -> ComputeResult<Vec<Resolved>> {
        let words = |id: BufferId| -> ComputeResult<DeviceWords> {
            Ok(state.buffers.get(id)?.resource.clone())
        };
        batch
            .into_commands()
            .into_iter()
            .map(|cmd| {
                Ok(match cmd {
                    Command::WriteBuffer { dst, offset, data } => Resolved::Write {
                        dst: words(dst)?,
                        word_offset: (offset / 4) as usize,
                        data,
                    },
                    Command::Dispatch(d) => Resolved::Dispatch {
                        src: words(d.src)?,
                        dst: words(d.dst)?,
                        params: words(d.params)?,
                        dispatch: d,
                    },
                    Command::CopyBufferToBuffer {
                        src,
                        src_offset,
                        dst,
                        dst_offset,
                        size,
                    } => Resolved::Copy {
                        src: words(src)?,
                        src_word: (src_offset / 4) as usize,
                        dst: words(dst)?,
                        dst_word: (dst_offset / 4) as usize,
                        words: (size / 4) as usize,
                    },
                })
            })
            .collect()
    }
}

impl Default for CpuPrimitives {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpuPrimitives {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(queue) = state.queue.take() {
                let _ = queue.join();
            }
        }
    }
}

fn store_bytes(dst: &DeviceWords, word_offset: usize, data: &[u8]) {
    for (i, chunk) in data.chunks_exact(4).enumerate() {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        dst[word_offset + i].store(word, Ordering::Relaxed);
    }
}

fn load_bytes(src: &DeviceWords) -> Vec<u8> {
    src.iter()
        .flat_map(|w| w.load(Ordering::Relaxed).to_le_bytes())
        .collect()
}

/// Queue thread body: run every command in order.
fn execute(commands: Vec<Resolved>, lanes: usize) -> ComputeResult<()> {
    for cmd in commands {
        match cmd {
            Resolved::Write { dst, word_offset, data } => store_bytes(&dst, word_offset, &data),
            Resolved::Dispatch { dispatch, src, dst, params } => {
                let params = KernelParams::from_bytes(&load_bytes(&params))?;
                trace!(
                    kernel = %dispatch.kernel,
                    grid = %dispatch.grid,
                    shape = %dispatch.shape,
                    "cpu dispatch"
                );
                kernels::run_host(
                    dispatch.kernel,
                    dispatch.shape,
                    dispatch.grid,
                    &params,
                    lanes,
                    StorageView::new(&src),
                    StorageView::new(&dst),
                )?;
            }
            Resolved::Copy { src, src_word, dst, dst_word, words } => {
                for i in 0..words {
                    let v = src[src_word + i].load(Ordering::Relaxed);
                    dst[dst_word + i].store(v, Ordering::Relaxed);
                }
            }
        }
    }
    Ok(())
}

fn join_queue(queue: JoinHandle<ComputeResult<()>>) -> ComputeResult<()> {
    match queue.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ComputeError::DeviceLost(format!("batch failed: {e}"))),
        Err(_) => Err(ComputeError::DeviceLost("cpu queue thread panicked".into())),
    }
}

impl GpuPrimitives for CpuPrimitives {
    fn allocate(&self, byte_len: u64, usage: BufferUsage) -> ComputeResult<BufferId> {
        if byte_len > self.limits.max_buffer_bytes {
            return Err(ComputeError::InvalidParams(format!(
                "buffer of {} exceeds device maximum of {}",
                memory::format_bytes(byte_len),
                memory::format_bytes(self.limits.max_buffer_bytes)
            )));
        }
        let mut state = self.lock()?;
        state.buffers.check_allocation(byte_len, usage)?;
        let words = zeroed_words((byte_len / 4) as usize);
        Ok(state.buffers.insert(byte_len, usage, words))
    }

    fn write(&self, id: BufferId, offset: u64, data: &[u8]) -> ComputeResult<()> {
        let state = self.lock()?;
        let entry = state.buffers.get(id)?;
        check_write(&entry.desc, offset, data.len() as u64)?;
        state.in_flight.ensure_idle(id)?;
        store_bytes(&entry.resource, (offset / 4) as usize, data);
        Ok(())
    }

    fn destroy(&self, id: BufferId) -> ComputeResult<()> {
        let mut state = self.lock()?;
        state.buffers.describe(id)?;
        state.in_flight.ensure_idle(id)?;
        state.buffers.remove(id).map(|_| ())
    }

    fn describe(&self, id: BufferId) -> ComputeResult<BufferDesc> {
        self.lock()?.buffers.describe(id)
    }

    fn submit(&self, batch: CommandBatch) -> ComputeResult<()> {
        let mut state = self.lock()?;

        // One batch executes at a time; an earlier one finishes first
        if let Some(queue) = state.queue.take() {
            if let Err(e) = join_queue(queue) {
                state.pending_error.get_or_insert(e);
            }
        }

        batch.validate(|id| state.buffers.describe(id))?;
        for &dispatch in batch.commands().iter().filter_map(|c| match c {
            Command::Dispatch(d) => Some(d),
            _ => None,
        }) {
            self.limits.check_shape(dispatch.shape)?;
            self.limits.check_grid(dispatch.grid)?;
        }

        let referenced = batch.referenced_buffers();
        let label = batch.label().unwrap_or("batch").to_string();
        let dispatches = batch.dispatch_count();
        let commands = Self::resolve(&state, batch)?;
        let lanes = self.lanes;

        debug!(batch = %label, commands = commands.len(), dispatches, "cpu submit");
        let queue = thread::Builder::new()
            .name("tessera-cpu-queue".into())
            .spawn(move || execute(commands, lanes))
            .map_err(|e| ComputeError::OperationFailed(format!("failed to start queue thread: {e}")))?;

        state.in_flight.replace(referenced);
        state.queue = Some(queue);
        Ok(())
    }

    fn wait(&self) -> ComputeResult<()> {
        // Join without holding the lock so the queue thread never contends
        let queue = self.lock()?.queue.take();
        let result = queue.map(join_queue).unwrap_or(Ok(()));

        let mut state = self.lock()?;
        state.in_flight.clear();
        match state.pending_error.take() {
            Some(e) => Err(e),
            None => result,
        }
    }

    fn map_read(&self, id: BufferId) -> ComputeResult<Vec<u8>> {
        let state = self.lock()?;
        let entry = state.buffers.get(id)?;
        require_usage(&entry.desc, BufferUsage::MAP_READ)?;
        state.in_flight.ensure_idle(id)?;
        Ok(load_bytes(&entry.resource))
    }

    fn stats(&self) -> DeviceStats {
        self.lock().map(|s| s.buffers.stats()).unwrap_or_default()
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn limits(&self) -> &GpuLimits {
        &self.limits
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffer::floats_from_bytes;
    use crate::grid::WorkgroupShape;
    use crate::kernels::KernelKind;

    fn device() -> CpuPrimitives {
        CpuPrimitives::with_settings(Some(1 << 20), Some(2))
    }

    fn f32_bytes(v: &[f32]) -> Vec<u8> {
        bytemuck::cast_slice(v).to_vec()
    }

    #[test]
    fn test_double_batch() {
        let gpu = device();
        let input: Vec<f32> = (0..300).map(|i| i as f32 * 0.5).collect();
        let src = gpu.allocate_init(&f32_bytes(&input), BufferUsage::input()).unwrap();
        let dst = gpu.allocate(1200, BufferUsage::output()).unwrap();
        let params = gpu.allocate(KernelParams::SIZE, BufferUsage::uniform()).unwrap();
        let readback = gpu.allocate(1200, BufferUsage::readback()).unwrap();

        let p = KernelParams::for_elements(300);
        let mut batch = CommandBatch::with_label("double");
        batch
            .write_pod(params, 0, &p)
            .dispatch(Dispatch {
                kernel: KernelKind::Double,
                shape: KernelKind::Double.shape(&p),
                grid: KernelKind::Double.grid(&p).unwrap(),
                src,
                dst,
                params,
            })
            .copy_buffer_to_buffer(dst, 0, readback, 0, 1200);
        gpu.submit(batch).unwrap();
        gpu.wait().unwrap();

        let out = floats_from_bytes(&gpu.map_read(readback).unwrap());
        for (o, i) in out.iter().zip(&input) {
            assert_eq!(*o, i * 2.0);
        }

        for id in [src, dst, params, readback] {
            gpu.destroy(id).unwrap();
        }
        assert_eq!(gpu.stats().live_buffers, 0);
        assert_eq!(gpu.stats().bytes_in_use, 0);
    }

    #[test]
    fn test_busy_until_wait() {
        let gpu = device();
        let a = gpu.allocate(16, BufferUsage::output()).unwrap();
        let b = gpu.allocate(16, BufferUsage::readback()).unwrap();
        let mut batch = CommandBatch::new();
        batch.copy_buffer_to_buffer(a, 0, b, 0, 16);
        gpu.submit(batch).unwrap();

        assert!(matches!(gpu.destroy(a), Err(ComputeError::BufferBusy(_))));
        assert!(matches!(gpu.map_read(b), Err(ComputeError::BufferBusy(_))));
        gpu.wait().unwrap();
        assert_eq!(gpu.map_read(b).unwrap(), vec![0u8; 16]);
        gpu.destroy(a).unwrap();
        gpu.destroy(b).unwrap();
    }

    #[test]
    fn test_mid_batch_failure_is_device_lost() {
        let gpu = device();
        let src = gpu.allocate(64, BufferUsage::input()).unwrap();
        let dst = gpu.allocate(64, BufferUsage::output()).unwrap();
        let params = gpu.allocate(KernelParams::SIZE, BufferUsage::uniform()).unwrap();

        // Parameters describe a larger image than the bound buffers hold
        let p = KernelParams::for_image(64, 64, 4).unwrap();
        let mut batch = CommandBatch::new();
        batch.write_pod(params, 0, &p).dispatch(Dispatch {
            kernel: KernelKind::BlurNaive,
            shape: KernelKind::BlurNaive.shape(&p),
            grid: KernelKind::BlurNaive.grid(&p).unwrap(),
            src,
            dst,
            params,
        });
        gpu.submit(batch).unwrap();
        assert!(matches!(gpu.wait(), Err(ComputeError::DeviceLost(_))));
        // The device stays usable afterwards
        gpu.wait().unwrap();
    }

    #[test]
    fn test_validation_failure_enqueues_nothing() {
        let gpu = device();
        let a = gpu.allocate(16, BufferUsage::output()).unwrap();
        let params = gpu.allocate(KernelParams::SIZE, BufferUsage::uniform()).unwrap();
        let mut batch = CommandBatch::new();
        batch.dispatch(Dispatch {
            kernel: KernelKind::Double,
            shape: WorkgroupShape::linear(4),
            grid: crate::grid::DispatchGrid::new(1, 1),
            src: a,
            dst: a,
            params,
        });
        assert!(matches!(gpu.submit(batch), Err(ComputeError::AliasedBinding(_))));
        // Nothing in flight: buffer can be destroyed immediately
        gpu.destroy(a).unwrap();
    }

    #[test]
    fn test_budget_and_use_after_free() {
        let gpu = CpuPrimitives::with_settings(Some(64), Some(1));
        let a = gpu.allocate(48, BufferUsage::input()).unwrap();
        assert!(matches!(
            gpu.allocate(32, BufferUsage::input()),
            Err(ComputeError::OutOfMemory { .. })
        ));
        gpu.destroy(a).unwrap();
        assert!(matches!(gpu.write(a, 0, &[0; 4]), Err(ComputeError::UseAfterFree(_))));
        assert!(matches!(gpu.destroy(a), Err(ComputeError::UseAfterFree(_))));
    }
}
