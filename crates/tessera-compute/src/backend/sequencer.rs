//! Upload -> dispatch -> wait -> readback, in one schedulable unit.
//!
//! [`Sequencer`] owns every buffer it creates through [`ScopedBuffer`]
//! guards, records dispatches and copies into a single [`CommandBatch`],
//! and measures wall time around the three host-visible phases. Whatever
//! path a run takes out of the sequencer, its buffers are released once.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use super::buffer::{ScopedBuffer, floats_from_bytes};
use super::commands::{CommandBatch, Dispatch};
use super::gpu_primitives::{BufferId, BufferUsage, GpuPrimitives};
use crate::kernels::{KernelKind, KernelParams};
use crate::ComputeResult;

/// Wall time of each phase of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Allocation and host-to-device transfer.
    pub upload: Duration,
    /// Submit and wait for the batch.
    pub dispatch: Duration,
    /// Device-to-host transfer.
    pub readback: Duration,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        self.upload + self.dispatch + self.readback
    }
}

impl fmt::Display for PhaseTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "upload {:.2?}, dispatch {:.2?}, readback {:.2?}",
            self.upload, self.dispatch, self.readback
        )
    }
}

/// Records one batch and owns its buffers.
pub struct Sequencer<'g, G: GpuPrimitives + ?Sized> {
    gpu: &'g G,
    owned: Vec<ScopedBuffer<'g, G>>,
    batch: CommandBatch,
    timings: PhaseTimings,
    dispatches: usize,
}

impl<'g, G: GpuPrimitives + ?Sized> Sequencer<'g, G> {
    pub fn new(gpu: &'g G, label: &str) -> Self {
        Self {
            gpu,
            owned: Vec::new(),
            batch: CommandBatch::with_label(label),
            timings: PhaseTimings::default(),
            dispatches: 0,
        }
    }

    fn keep(&mut self, buffer: ScopedBuffer<'g, G>) -> BufferId {
        let id = buffer.id();
        self.owned.push(buffer);
        id
    }

    /// Allocate a zeroed buffer owned by the sequencer.
    pub fn create_buffer(&mut self, byte_len: u64, usage: BufferUsage) -> ComputeResult<BufferId> {
        let buffer = ScopedBuffer::allocate(self.gpu, byte_len, usage)?;
        Ok(self.keep(buffer))
    }

    /// Allocate and fill a buffer from host floats. Counted as upload.
    pub fn upload_f32(&mut self, data: &[f32], usage: BufferUsage) -> ComputeResult<BufferId> {
        let start = Instant::now();
        let buffer = ScopedBuffer::allocate_init(self.gpu, bytemuck::cast_slice(data), usage)?;
        self.timings.upload += start.elapsed();
        Ok(self.keep(buffer))
    }

    /// Allocate the uniform block and record its write at the head of the
    /// batch.
    pub fn upload_params(&mut self, params: &KernelParams) -> ComputeResult<BufferId> {
        let id = self.create_buffer(KernelParams::SIZE, BufferUsage::uniform())?;
        self.batch.write_pod(id, 0, params);
        Ok(id)
    }

    /// Record a launch of `kind` sized from `params`.
    pub fn dispatch(
        &mut self,
        kind: KernelKind,
        params: &KernelParams,
        src: BufferId,
        dst: BufferId,
        params_buffer: BufferId,
    ) -> ComputeResult<Dispatch> {
        kind.validate(params)?;
        let shape = kind.shape(params);
        let grid = kind.grid(params)?;
        let limits = self.gpu.limits();
        limits.check_shape(shape)?;
        limits.check_grid(grid)?;

        let dispatch = Dispatch {
            kernel: kind,
            shape,
            grid,
            src,
            dst,
            params: params_buffer,
        };
        self.batch.dispatch(dispatch);
        self.dispatches += 1;
        Ok(dispatch)
    }

    /// Record a copy of `src` into a fresh host-readable buffer.
    pub fn copy_to_readback(&mut self, src: BufferId, byte_len: u64) -> ComputeResult<BufferId> {
        let readback = self.create_buffer(byte_len, BufferUsage::readback())?;
        self.batch.copy_buffer_to_buffer(src, 0, readback, 0, byte_len);
        Ok(readback)
    }

    /// Submit the recorded batch and block until it completes.
    pub fn submit_and_wait(&mut self) -> ComputeResult<()> {
        let label = self.batch.label().unwrap_or("batch").to_string();
        let batch = std::mem::replace(&mut self.batch, CommandBatch::with_label(label.as_str()));
        let commands = batch.len();

        let start = Instant::now();
        self.gpu.submit(batch)?;
        // Always wait once submitted so no buffer is released while in flight
        self.gpu.wait()?;
        self.timings.dispatch += start.elapsed();

        debug!(
            batch = %label,
            commands,
            dispatches = self.dispatches,
            elapsed = ?self.timings.dispatch,
            "batch complete"
        );
        Ok(())
    }

    /// Read a host-readable buffer as floats. Counted as readback.
    pub fn read_f32(&mut self, id: BufferId) -> ComputeResult<Vec<f32>> {
        let start = Instant::now();
        let bytes = self.gpu.map_read(id)?;
        let data = floats_from_bytes(&bytes);
        self.timings.readback += start.elapsed();
        Ok(data)
    }

    /// Dispatches recorded so far.
    pub fn dispatch_count(&self) -> usize {
        self.dispatches
    }

    pub fn timings(&self) -> PhaseTimings {
        self.timings
    }

    /// Release every owned buffer, reporting the first failure.
    pub fn finish(self) -> ComputeResult<PhaseTimings> {
        let timings = self.timings;
        let mut first_err = None;
        for buffer in self.owned {
            if let Err(e) = buffer.release() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(timings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuPrimitives;
    use crate::ComputeError;

    #[test]
    fn test_sequencer_releases_on_error() {
        let gpu = CpuPrimitives::with_settings(Some(1 << 20), Some(1));
        {
            let mut seq = Sequencer::new(&gpu, "failing");
            let src = seq.upload_f32(&[1.0; 16], BufferUsage::input()).unwrap();
            let params = seq.upload_params(&KernelParams::for_elements(16)).unwrap();
            // Recording succeeds; the aliased binding is caught at submit
            seq.dispatch(KernelKind::Double, &KernelParams::for_elements(16), src, src, params)
                .unwrap();
            let err = seq.submit_and_wait().unwrap_err();
            assert!(matches!(err, ComputeError::AliasedBinding(_)));
            assert_eq!(gpu.stats().live_buffers, 2);
        }
        assert_eq!(gpu.stats().live_buffers, 0);
    }

    #[test]
    fn test_sequencer_round_trip() {
        let gpu = CpuPrimitives::with_settings(Some(1 << 20), Some(1));
        let mut seq = Sequencer::new(&gpu, "map");
        let p = KernelParams::for_elements(8);
        let src = seq.upload_f32(&[1.5; 8], BufferUsage::input()).unwrap();
        let dst = seq.create_buffer(32, BufferUsage::output()).unwrap();
        let pb = seq.upload_params(&p).unwrap();
        seq.dispatch(KernelKind::Double, &p, src, dst, pb).unwrap();
        let rb = seq.copy_to_readback(dst, 32).unwrap();
        seq.submit_and_wait().unwrap();
        assert_eq!(seq.read_f32(rb).unwrap(), vec![3.0; 8]);
        assert_eq!(seq.dispatch_count(), 1);
        seq.finish().unwrap();
        assert_eq!(gpu.stats().live_buffers, 0);
    }
}
