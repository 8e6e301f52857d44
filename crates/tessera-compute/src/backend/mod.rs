//! Compute devices and the dispatch layer above them.
//!
//! Provides a CPU device (rayon with simulated shared-memory workgroups)
//! and a wgpu device, with automatic selection.
//!
//! # Architecture
//!
//! ```text
//! Executor<G: GpuPrimitives>
//!     +-- CpuPrimitives  (rayon groups, lane teams + Barrier)
//!     +-- WgpuPrimitives (Vulkan/Metal/DX12 compute shaders)
//! ```
//!
//! Both devices share buffer bookkeeping ([`buffer`]) and batch validation
//! ([`commands`]), so resource errors are identical across backends.

mod buffer;
mod commands;
mod cpu_backend;
mod detect;
mod executor;
mod gpu_primitives;
mod limits;
pub mod memory;
mod pingpong;
mod sequencer;
pub(crate) mod workgroup;

#[cfg(feature = "wgpu")]
mod wgpu_backend;

// Core types
pub use buffer::{BUFFER_ALIGNMENT, ScopedBuffer, floats_from_bytes};
pub use commands::{Command, CommandBatch, Dispatch};
pub use gpu_primitives::{
    BufferDesc, BufferId, BufferUsage, Capabilities, DeviceStats, GpuPrimitives,
};
pub use limits::GpuLimits;
pub use detect::{BackendInfo, describe_backends, detect_backends, select_best_backend};

// Dispatch layer
pub use executor::{Executor, ExecutorConfig, Output, RunReport};
pub use pingpong::PingPong;
pub use sequencer::{PhaseTimings, Sequencer};

// Devices
pub use cpu_backend::CpuPrimitives;

#[cfg(feature = "wgpu")]
pub use wgpu_backend::WgpuPrimitives;

use std::fmt;
use std::str::FromStr;

use crate::image::ImageBuffer;
use crate::kernels::{BlurStrategy, KernelKind};
use crate::{ComputeError, ComputeResult};

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Auto-select best available (wgpu > CPU).
    #[default]
    Auto,
    /// CPU device with rayon parallelization.
    Cpu,
    /// wgpu device (Vulkan/Metal/DX12).
    Wgpu,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto => true,
            Self::Cpu => true,
            #[cfg(feature = "wgpu")]
            Self::Wgpu => WgpuPrimitives::is_available(),
            #[cfg(not(feature = "wgpu"))]
            Self::Wgpu => false,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Wgpu => "wgpu",
        }
    }
}

impl FromStr for Backend {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "wgpu" | "gpu" => Ok(Self::Wgpu),
            other => Err(ComputeError::BackendNotAvailable(format!(
                "unknown backend '{other}' (expected auto, cpu or wgpu)"
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Executor type enum for dynamic dispatch.
pub enum AnyExecutor {
    Cpu(Executor<CpuPrimitives>),
    #[cfg(feature = "wgpu")]
    Wgpu(Executor<WgpuPrimitives>),
}

impl AnyExecutor {
    /// Get backend name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu(e) => e.name(),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(e) => e.name(),
        }
    }

    /// Get device limits.
    pub fn limits(&self) -> &GpuLimits {
        match self {
            Self::Cpu(e) => e.limits(),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(e) => e.limits(),
        }
    }

    /// Get device capabilities.
    pub fn capabilities(&self) -> &Capabilities {
        match self {
            Self::Cpu(e) => e.capabilities(),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(e) => e.capabilities(),
        }
    }

    /// Live buffer accounting.
    pub fn stats(&self) -> DeviceStats {
        match self {
            Self::Cpu(e) => e.stats(),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(e) => e.stats(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        match self {
            Self::Cpu(e) => e.config(),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(e) => e.config(),
        }
    }

    /// Kernel the blur would use for this strategy and radius.
    pub fn resolve_blur_strategy(
        &self,
        strategy: BlurStrategy,
        radius: u32,
        channels: u32,
    ) -> ComputeResult<KernelKind> {
        match self {
            Self::Cpu(e) => e.resolve_blur_strategy(strategy, radius, channels),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(e) => e.resolve_blur_strategy(strategy, radius, channels),
        }
    }

    /// Execute the element-wise map.
    pub fn execute_map(&self, image: &ImageBuffer) -> ComputeResult<Output> {
        match self {
            Self::Cpu(e) => e.execute_map(image),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(e) => e.execute_map(image),
        }
    }

    /// Execute the blur with an explicit strategy.
    pub fn execute_blur(
        &self,
        image: &ImageBuffer,
        radius: u32,
        strategy: BlurStrategy,
    ) -> ComputeResult<Output> {
        match self {
            Self::Cpu(e) => e.execute_blur_with(image, radius, strategy),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(e) => e.execute_blur_with(image, radius, strategy),
        }
    }

    /// Execute `steps` Game of Life generations.
    pub fn execute_life(&self, image: &ImageBuffer, steps: u32) -> ComputeResult<Output> {
        match self {
            Self::Cpu(e) => e.execute_life(image, steps),
            #[cfg(feature = "wgpu")]
            Self::Wgpu(e) => e.execute_life(image, steps),
        }
    }
}

/// Create an executor for the specified backend.
pub fn create_executor(backend: Backend) -> ComputeResult<AnyExecutor> {
    create_executor_with_config(backend, ExecutorConfig::default())
}

/// Create an executor with custom config.
pub fn create_executor_with_config(
    backend: Backend,
    config: ExecutorConfig,
) -> ComputeResult<AnyExecutor> {
    match backend {
        Backend::Auto => {
            let best = select_best_backend();
            create_executor_with_config(best, config)
        }
        Backend::Cpu => {
            let gpu = CpuPrimitives::with_settings(config.memory_budget, config.lanes);
            Ok(AnyExecutor::Cpu(Executor::with_config(gpu, config)))
        }
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                let gpu = WgpuPrimitives::with_budget(config.memory_budget)?;
                Ok(AnyExecutor::Wgpu(Executor::with_config(gpu, config)))
            }
            #[cfg(not(feature = "wgpu"))]
            {
                Err(ComputeError::ResourceUnavailable(
                    "wgpu feature not enabled".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("CPU".parse::<Backend>().unwrap(), Backend::Cpu);
        assert_eq!("wgpu".parse::<Backend>().unwrap(), Backend::Wgpu);
        assert!("cuda".parse::<Backend>().is_err());
        assert_eq!(Backend::default().to_string(), "auto");
    }

    #[test]
    fn test_cpu_always_available() {
        assert!(Backend::Cpu.is_available());
        let exec = create_executor(Backend::Cpu).unwrap();
        assert_eq!(exec.name(), "cpu");
    }

    #[test]
    fn test_unknown_backend_name() {
        assert!(matches!(
            "cuda".parse::<Backend>(),
            Err(ComputeError::BackendNotAvailable(_))
        ));
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn test_wgpu_without_feature_is_unavailable() {
        assert!(!Backend::Wgpu.is_available());
        let err = create_executor(Backend::Wgpu).err();
        assert!(matches!(err, Some(ComputeError::ResourceUnavailable(_))), "{err:?}");
    }
}
