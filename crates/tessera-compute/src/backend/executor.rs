//! Kernel pipelines over any device.
//!
//! # Architecture
//!
//! ```text
//! Executor<G: GpuPrimitives>
//!     │
//!     ├── execute_map()  ──┐
//!     ├── execute_blur() ──┼── Sequencer: upload, record, submit+wait, readback
//!     └── execute_life() ──┘        └── PingPong for the iterated automaton
//! ```
//!
//! Every run is a single batch. The blur picks its kernel through
//! [`Executor::resolve_blur_strategy`], which consults the device's
//! shared-memory capability for the configured tile and the requested
//! radius.

use std::fmt;

use tracing::{debug, trace};

use super::gpu_primitives::{BufferUsage, Capabilities, DeviceStats, GpuPrimitives};
use super::memory;
use super::pingpong::PingPong;
use super::sequencer::{PhaseTimings, Sequencer};
use super::GpuLimits;
use crate::grid::{DispatchGrid, WorkgroupShape};
use crate::image::ImageBuffer;
use crate::kernels::{BlurStrategy, DEFAULT_TILE, KernelKind, KernelParams};
use crate::{ComputeError, ComputeResult};

// =============================================================================
// Configuration
// =============================================================================

/// Executor configuration.
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Output tile (and workgroup shape) of the tiled blur.
    pub tile: WorkgroupShape,
    /// Worker lanes per simulated CPU workgroup (None = default).
    pub lanes: Option<usize>,
    /// Device memory budget in bytes (None = device default).
    pub memory_budget: Option<u64>,
    /// Blur kernel selection when the caller does not choose one.
    pub blur_strategy: BlurStrategy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tile: memory::tile_override().unwrap_or(DEFAULT_TILE),
            lanes: memory::lanes_override(),
            memory_budget: memory::budget_override(),
            blur_strategy: BlurStrategy::Auto,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// What a run did and how long each phase took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Device name.
    pub backend: &'static str,
    /// Kernel dispatched.
    pub kernel: KernelKind,
    /// Workgroup shape of each dispatch.
    pub shape: WorkgroupShape,
    /// Groups per dispatch.
    pub grid: DispatchGrid,
    /// Dispatches in the batch.
    pub dispatches: usize,
    /// Phase wall times.
    pub timings: PhaseTimings,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} dispatch{} of {} groups x {} | {} | total {:.2?}",
            self.backend,
            self.kernel,
            self.dispatches,
            if self.dispatches == 1 { "" } else { "es" },
            self.grid,
            self.shape,
            self.timings,
            self.timings.total()
        )
    }
}

/// Result image plus its run report.
#[derive(Debug, Clone)]
pub struct Output {
    pub image: ImageBuffer,
    pub report: RunReport,
}

// =============================================================================
// Executor
// =============================================================================

/// Runs the kernel pipelines on one device.
pub struct Executor<G: GpuPrimitives> {
    gpu: G,
    config: ExecutorConfig,
}

impl<G: GpuPrimitives> Executor<G> {
    pub fn new(gpu: G) -> Self {
        Self::with_config(gpu, ExecutorConfig::default())
    }

    pub fn with_config(gpu: G, config: ExecutorConfig) -> Self {
        Self { gpu, config }
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn name(&self) -> &'static str {
        self.gpu.name()
    }

    pub fn limits(&self) -> &GpuLimits {
        self.gpu.limits()
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.gpu.capabilities()
    }

    pub fn stats(&self) -> DeviceStats {
        self.gpu.stats()
    }

    /// Pick the blur kernel for a strategy.
    ///
    /// `Auto` falls back to the naive kernel when the padded tile does not
    /// fit shared memory or the device has none; `Tiled` reports that as
    /// [`ComputeError::Unsupported`].
    pub fn resolve_blur_strategy(
        &self,
        strategy: BlurStrategy,
        radius: u32,
        channels: u32,
    ) -> ComputeResult<KernelKind> {
        let tile = self.config.tile;
        let fits = self.gpu.capabilities().supports_tiled(tile, radius, channels)
            && self.gpu.limits().check_shape(tile).is_ok();
        let kind = match strategy {
            BlurStrategy::Naive => KernelKind::BlurNaive,
            BlurStrategy::Tiled if fits => KernelKind::BlurTiled,
            BlurStrategy::Tiled => {
                return Err(ComputeError::Unsupported(format!(
                    "tiled blur with tile {tile}, radius {radius} and {channels} channels \
                     does not fit {} shared memory",
                    self.gpu.name()
                )));
            }
            BlurStrategy::Auto if fits => KernelKind::BlurTiled,
            BlurStrategy::Auto => KernelKind::BlurNaive,
        };
        debug!(%strategy, %tile, radius, kernel = %kind, "blur strategy");
        Ok(kind)
    }

    /// `out[i] = in[i] * 2` over every element.
    pub fn execute_map(&self, image: &ImageBuffer) -> ComputeResult<Output> {
        let len = u32::try_from(image.data().len()).map_err(|_| {
            ComputeError::InvalidParams("image exceeds the 32-bit element index".into())
        })?;
        self.run_single(KernelKind::Double, image, KernelParams::for_elements(len))
    }

    /// Clamp-to-edge box blur with the configured strategy.
    pub fn execute_blur(&self, image: &ImageBuffer, radius: u32) -> ComputeResult<Output> {
        self.execute_blur_with(image, radius, self.config.blur_strategy)
    }

    /// Clamp-to-edge box blur with an explicit strategy.
    pub fn execute_blur_with(
        &self,
        image: &ImageBuffer,
        radius: u32,
        strategy: BlurStrategy,
    ) -> ComputeResult<Output> {
        let kind = self.resolve_blur_strategy(strategy, radius, image.channels)?;
        let params = KernelParams::for_image(image.width, image.height, image.channels)?
            .with_radius(radius)
            .with_tile(self.config.tile);
        self.run_single(kind, image, params)
    }

    fn run_single(
        &self,
        kind: KernelKind,
        image: &ImageBuffer,
        params: KernelParams,
    ) -> ComputeResult<Output> {
        trace!(
            kernel = %kind,
            width = image.width,
            height = image.height,
            channels = image.channels,
            radius = params.radius,
            "run"
        );
        let bytes = image.size_bytes() as u64;
        let mut seq = Sequencer::new(&self.gpu, kind.name());
        let src = seq.upload_f32(image.data(), BufferUsage::input())?;
        let dst = seq.create_buffer(bytes, BufferUsage::output())?;
        let params_buffer = seq.upload_params(&params)?;
        let dispatch = seq.dispatch(kind, &params, src, dst, params_buffer)?;
        let readback = seq.copy_to_readback(dst, bytes)?;
        seq.submit_and_wait()?;
        let data = seq.read_f32(readback)?;
        let dispatches = seq.dispatch_count();
        let timings = seq.finish()?;

        Ok(Output {
            image: ImageBuffer::from_f32(data, image.width, image.height, image.channels)?,
            report: RunReport {
                backend: self.gpu.name(),
                kernel: kind,
                shape: dispatch.shape,
                grid: dispatch.grid,
                dispatches,
                timings,
            },
        })
    }

    /// Run exactly `steps` Game of Life generations.
    ///
    /// All steps are recorded into one batch over a ping-pong pair; only
    /// the final state is read back. Zero steps returns the input.
    pub fn execute_life(&self, image: &ImageBuffer, steps: u32) -> ComputeResult<Output> {
        let kind = KernelKind::LifeStep;
        let params = KernelParams::for_image(image.width, image.height, image.channels)?;
        kind.validate(&params)?;
        trace!(width = image.width, height = image.height, steps, "life");

        let bytes = image.size_bytes() as u64;
        let mut seq = Sequencer::new(&self.gpu, kind.name());
        let initial = seq.upload_f32(image.data(), BufferUsage::ping_pong())?;
        let scratch = seq.create_buffer(bytes, BufferUsage::ping_pong())?;
        let params_buffer = seq.upload_params(&params)?;

        let mut state = PingPong::new(initial, scratch);
        for _ in 0..steps {
            seq.dispatch(kind, &params, state.current(), state.next(), params_buffer)?;
            state.swap();
        }
        let readback = seq.copy_to_readback(state.current(), bytes)?;
        seq.submit_and_wait()?;
        let data = seq.read_f32(readback)?;
        let dispatches = seq.dispatch_count();
        let timings = seq.finish()?;

        Ok(Output {
            image: ImageBuffer::from_f32(data, image.width, image.height, image.channels)?,
            report: RunReport {
                backend: self.gpu.name(),
                kernel: kind,
                shape: kind.shape(&params),
                grid: kind.grid(&params)?,
                dispatches,
                timings,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuPrimitives;

    fn executor(tile: WorkgroupShape) -> Executor<CpuPrimitives> {
        let config = ExecutorConfig {
            tile,
            lanes: Some(2),
            memory_budget: Some(64 << 20),
            blur_strategy: BlurStrategy::Auto,
        };
        Executor::with_config(CpuPrimitives::with_settings(config.memory_budget, config.lanes), config)
    }

    #[test]
    fn test_strategy_resolution() {
        let exec = executor(WorkgroupShape::new(16, 16));
        if !exec.capabilities().shared_memory_tiling {
            return;
        }
        assert_eq!(
            exec.resolve_blur_strategy(BlurStrategy::Auto, 2, 4).unwrap(),
            KernelKind::BlurTiled
        );
        assert_eq!(
            exec.resolve_blur_strategy(BlurStrategy::Naive, 2, 4).unwrap(),
            KernelKind::BlurNaive
        );
        // (16 + 200)^2 * 16 B is far beyond 64 KiB of shared memory
        assert_eq!(
            exec.resolve_blur_strategy(BlurStrategy::Auto, 100, 4).unwrap(),
            KernelKind::BlurNaive
        );
        assert!(matches!(
            exec.resolve_blur_strategy(BlurStrategy::Tiled, 100, 4),
            Err(ComputeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_map_report() {
        let exec = executor(DEFAULT_TILE);
        let img = ImageBuffer::from_f32(vec![0.25; 40], 5, 2, 4).unwrap();
        let out = exec.execute_map(&img).unwrap();
        assert!(out.image.data().iter().all(|&v| v == 0.5));
        assert_eq!(out.report.kernel, KernelKind::Double);
        assert_eq!(out.report.dispatches, 1);
        assert_eq!(out.report.grid, DispatchGrid::new(1, 1));
        assert!(out.report.to_string().contains("1 dispatch of"));
        assert_eq!(exec.stats().live_buffers, 0);
    }

    #[test]
    fn test_life_zero_steps_is_identity() {
        let exec = executor(DEFAULT_TILE);
        let data: Vec<f32> = (0..64).map(|i| (i % 5) as f32 * 0.2).collect();
        let img = ImageBuffer::from_f32(data, 4, 4, 4).unwrap();
        let out = exec.execute_life(&img, 0).unwrap();
        assert_eq!(out.image, img);
        assert_eq!(out.report.dispatches, 0);
    }
}
