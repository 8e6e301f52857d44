//! Tiled compute dispatch and buffer lifecycle for GPU-style kernels.
//!
//! Runs three escalating workloads on a compute device: an element-wise
//! map, a box-blur stencil (naive and halo-staged shared-memory variants),
//! and Conway's Game of Life with ping-pong buffers.
//!
//! # Architecture
//!
//! ```text
//! Processor (unified API)
//!     └── Executor<G: GpuPrimitives>
//!             ├── Sequencer   (upload -> dispatch -> wait -> readback)
//!             ├── PingPong    (current/next rotation)
//!             └── GpuPrimitives trait
//!                     ├── CpuPrimitives  (rayon + simulated workgroups)
//!                     └── WgpuPrimitives (WGSL compute shaders)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tessera_compute::{Processor, ImageBuffer, BlurStrategy};
//!
//! let proc = Processor::auto()?;
//! let img = ImageBuffer::from_f32(data, 512, 512, 4)?;
//!
//! let doubled = proc.double(&img)?;
//! let blurred = proc.blur_with(&img, 3, BlurStrategy::Tiled)?;
//! let evolved = proc.life(&img, 100)?;
//! println!("{}", blurred.report);
//! ```

pub mod backend;
pub mod grid;
pub mod image;
pub mod kernels;
pub mod pattern;
pub mod processor;
mod shaders;

pub use backend::{
    AnyExecutor, Backend, BufferId, BufferUsage, Capabilities, CommandBatch, CpuPrimitives,
    DeviceStats, Dispatch, ExecutorConfig, GpuLimits, GpuPrimitives, Output, PhaseTimings,
    PingPong, RunReport, ScopedBuffer, Sequencer, create_executor, create_executor_with_config,
    describe_backends, detect_backends, select_best_backend,
};
pub use grid::{DispatchGrid, WorkgroupShape};
pub use image::ImageBuffer;
pub use kernels::{BlurStrategy, KernelKind, KernelParams};
pub use processor::{Processor, ProcessorBuilder};

use thiserror::Error;

/// Compute device and dispatch errors.
///
/// Every variant is terminal for the batch it occurs in; nothing here is
/// retried.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("No compute device available: {0}")]
    ResourceUnavailable(String),

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Device lost: {0}")]
    DeviceLost(String),

    #[error("Out of device memory: requested {requested} bytes, {in_use} of {budget} in use")]
    OutOfMemory { requested: u64, in_use: u64, budget: u64 },

    #[error("Out of bounds access on {id}: offset {offset} + {len} bytes exceeds length {byte_len}")]
    OutOfBounds { id: BufferId, offset: u64, len: u64, byte_len: u64 },

    #[error("Use after free: {0} was destroyed")]
    UseAfterFree(BufferId),

    #[error("Unknown buffer {0}: not allocated by this device")]
    UnknownBuffer(BufferId),

    #[error("{id} lacks usage {required} (has {actual})")]
    MissingUsage { id: BufferId, required: String, actual: String },

    #[error("{0} bound as both source and destination of one command")]
    AliasedBinding(BufferId),

    #[error("{0} is referenced by an in-flight batch")]
    BufferBusy(BufferId),

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Unsupported on this device: {0}")]
    Unsupported(String),

    #[error("Compute operation failed: {0}")]
    OperationFailed(String),
}

pub type ComputeResult<T> = Result<T, ComputeError>;
