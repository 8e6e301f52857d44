//! Unified compute processor over any backend.
//!
//! # Configuration
//!
//! Use [`ProcessorBuilder`] for fine-grained control:
//!
//! ```ignore
//! use tessera_compute::{Backend, BlurStrategy, ProcessorBuilder, WorkgroupShape};
//!
//! let proc = ProcessorBuilder::new()
//!     .backend(Backend::Cpu)
//!     .tile(WorkgroupShape::new(16, 8))
//!     .lanes(8)
//!     .memory_budget_mb(512)
//!     .blur_strategy(BlurStrategy::Tiled)
//!     .build()?;
//! ```

use crate::backend::{
    AnyExecutor, Backend, Capabilities, DeviceStats, ExecutorConfig, GpuLimits, Output,
    create_executor_with_config,
};
use crate::grid::WorkgroupShape;
use crate::image::ImageBuffer;
use crate::kernels::{BlurStrategy, KernelKind};
use crate::ComputeResult;

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Processor`] with configuration options.
#[derive(Debug, Clone)]
pub struct ProcessorBuilder {
    backend: Backend,
    config: ExecutorConfig,
}

impl Default for ProcessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorBuilder {
    /// Create new builder with defaults (environment overrides applied).
    pub fn new() -> Self {
        Self {
            backend: Backend::Auto,
            config: ExecutorConfig::default(),
        }
    }

    /// Set compute backend.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the tiled blur's output tile.
    pub fn tile(mut self, tile: WorkgroupShape) -> Self {
        self.config.tile = tile;
        self
    }

    /// Set lanes per simulated CPU workgroup.
    pub fn lanes(mut self, lanes: usize) -> Self {
        self.config.lanes = Some(lanes.max(1));
        self
    }

    /// Set device memory budget in bytes.
    pub fn memory_budget(mut self, bytes: u64) -> Self {
        self.config.memory_budget = Some(bytes);
        self
    }

    /// Set device memory budget in megabytes.
    pub fn memory_budget_mb(mut self, mb: u64) -> Self {
        self.config.memory_budget = Some(mb.saturating_mul(1024 * 1024));
        self
    }

    /// Set the default blur strategy.
    pub fn blur_strategy(mut self, strategy: BlurStrategy) -> Self {
        self.config.blur_strategy = strategy;
        self
    }

    /// Build the Processor.
    pub fn build(self) -> ComputeResult<Processor> {
        Ok(Processor {
            executor: create_executor_with_config(self.backend, self.config)?,
        })
    }
}

// ============================================================================
// Processor
// ============================================================================

/// Runs the map, blur and life workloads with automatic backend selection
/// (GPU when available, CPU fallback).
///
/// # Example
/// ```ignore
/// use tessera_compute::{Processor, ImageBuffer};
///
/// let proc = Processor::auto()?;
/// let img = ImageBuffer::from_f32(data, 256, 256, 4)?;
/// let out = proc.blur(&img, 2)?;
/// println!("{}", out.report);
/// ```
pub struct Processor {
    executor: AnyExecutor,
}

impl Processor {
    /// Create with specified backend and default config.
    pub fn new(backend: Backend) -> ComputeResult<Self> {
        ProcessorBuilder::new().backend(backend).build()
    }

    /// Create builder for fine-grained configuration.
    pub fn builder() -> ProcessorBuilder {
        ProcessorBuilder::new()
    }

    /// Create with auto-selected backend (GPU if available, else CPU).
    pub fn auto() -> ComputeResult<Self> {
        Self::new(Backend::Auto)
    }

    /// Create with CPU backend.
    pub fn cpu() -> ComputeResult<Self> {
        Self::new(Backend::Cpu)
    }

    /// Create with GPU backend (requires wgpu feature).
    #[cfg(feature = "wgpu")]
    pub fn gpu() -> ComputeResult<Self> {
        Self::new(Backend::Wgpu)
    }

    // =========================================================================
    // Info
    // =========================================================================

    /// Get backend name.
    pub fn backend_name(&self) -> &'static str {
        self.executor.name()
    }

    /// Get device limits.
    pub fn limits(&self) -> &GpuLimits {
        self.executor.limits()
    }

    /// Get device capabilities.
    pub fn capabilities(&self) -> &Capabilities {
        self.executor.capabilities()
    }

    /// Live buffer accounting.
    pub fn stats(&self) -> DeviceStats {
        self.executor.stats()
    }

    /// Active configuration.
    pub fn config(&self) -> &ExecutorConfig {
        self.executor.config()
    }

    /// Underlying executor.
    pub fn executor(&self) -> &AnyExecutor {
        &self.executor
    }

    /// Kernel `blur_with` would run.
    pub fn blur_kernel(
        &self,
        strategy: BlurStrategy,
        radius: u32,
        channels: u32,
    ) -> ComputeResult<KernelKind> {
        self.executor.resolve_blur_strategy(strategy, radius, channels)
    }

    // =========================================================================
    // Workloads
    // =========================================================================

    /// Multiply every element by two.
    pub fn double(&self, image: &ImageBuffer) -> ComputeResult<Output> {
        self.executor.execute_map(image)
    }

    /// Box blur with the configured strategy.
    pub fn blur(&self, image: &ImageBuffer, radius: u32) -> ComputeResult<Output> {
        self.blur_with(image, radius, self.config().blur_strategy)
    }

    /// Box blur with an explicit strategy.
    pub fn blur_with(
        &self,
        image: &ImageBuffer,
        radius: u32,
        strategy: BlurStrategy,
    ) -> ComputeResult<Output> {
        self.executor.execute_blur(image, radius, strategy)
    }

    /// Advance a Game of Life board by `steps` generations.
    pub fn life(&self, image: &ImageBuffer, steps: u32) -> ComputeResult<Output> {
        self.executor.execute_life(image, steps)
    }
}
