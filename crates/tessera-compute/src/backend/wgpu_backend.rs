//! wgpu backend implementation.
//!
//! GPU compute via wgpu (Vulkan/Metal/DX12). Buffers map one-to-one onto
//! `wgpu::Buffer`s; a batch is encoded into command buffers and handed to
//! the queue, and `wait` polls the device until the queue drains.
//!
//! The tiled blur bakes its tile shape, radius and channel count into the
//! shader, so its pipelines are built on demand and cached per combination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};
use wgpu::util::DeviceExt;

use super::buffer::{BufferRegistry, InFlightSet, check_write, require_usage};
use super::commands::{Command, CommandBatch, Dispatch};
use super::gpu_primitives::{
    BufferDesc, BufferId, BufferUsage, Capabilities, DeviceStats, GpuPrimitives,
};
use super::{GpuLimits, memory};
use crate::kernels::{KernelKind, KernelParams};
use crate::shaders;
use crate::{ComputeError, ComputeResult};

// =============================================================================
// Pipelines
// =============================================================================

struct Pipelines {
    double: Arc<wgpu::ComputePipeline>,
    blur_naive: Arc<wgpu::ComputePipeline>,
    life: Arc<wgpu::ComputePipeline>,
}

/// Tile width, tile height, radius, channels.
type TiledKey = (u32, u32, u32, u32);

fn create_pipeline(
    device: &wgpu::Device,
    source: &str,
    label: &str,
) -> ComputeResult<wgpu::ComputePipeline> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: None, // Auto layout
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(e) => Err(ComputeError::OperationFailed(format!(
            "pipeline '{label}' failed to build: {e}"
        ))),
        None => Ok(pipeline),
    }
}

// =============================================================================
// WgpuPrimitives
// =============================================================================

struct WgpuState {
    buffers: BufferRegistry<wgpu::Buffer>,
    in_flight: InFlightSet,
}

/// wgpu GPU primitives implementation.
pub struct WgpuPrimitives {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipelines: Pipelines,
    tiled: Mutex<HashMap<TiledKey, Arc<wgpu::ComputePipeline>>>,
    state: Mutex<WgpuState>,
    /// First error raised asynchronously by the device.
    device_error: Arc<Mutex<Option<String>>>,
    limits: GpuLimits,
    capabilities: Capabilities,
    adapter_name: String,
}

impl WgpuPrimitives {
    /// Check if wgpu is available.
    pub fn is_available() -> bool {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .is_some()
        })
    }

    /// Create new wgpu primitives with the budget taken from the environment.
    pub fn new() -> ComputeResult<Self> {
        Self::with_budget(memory::budget_override())
    }

    /// Create new wgpu primitives with an explicit memory budget.
    ///
    /// `None` budgets the estimated usable VRAM.
    pub fn with_budget(budget: Option<u64>) -> ComputeResult<Self> {
        pollster::block_on(Self::new_async(budget))
    }

    /// Create new wgpu primitives asynchronously.
    pub async fn new_async(budget: Option<u64>) -> ComputeResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| ComputeError::ResourceUnavailable("no GPU adapter found".into()))?;

        let adapter_limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("tessera_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter_limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| ComputeError::ResourceUnavailable(format!("device request failed: {e}")))?;

        let device_error = Arc::new(Mutex::new(None::<String>));
        {
            let slot = Arc::clone(&device_error);
            device.on_uncaptured_error(Box::new(move |e| {
                warn!(error = %e, "wgpu device error");
                if let Ok(mut slot) = slot.lock() {
                    slot.get_or_insert_with(|| e.to_string());
                }
            }));
        }

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let adapter_info = adapter.get_info();
        let vram = estimate_vram(&adapter_info, adapter_limits.max_buffer_size);
        let limits = GpuLimits::from_wgpu_limits(&adapter_limits, Some(vram));
        let capabilities = Capabilities {
            shared_memory_tiling: !memory::tiling_disabled(),
            max_workgroup_storage_bytes: limits.max_workgroup_storage_bytes,
            max_invocations_per_workgroup: limits.max_invocations_per_workgroup,
        };
        let budget = budget.unwrap_or(limits.available_memory);

        debug!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            budget = %memory::format_bytes(budget),
            "wgpu device"
        );

        let pipelines = Pipelines {
            double: Arc::new(create_pipeline(&device, shaders::DOUBLE, "double_pipeline")?),
            blur_naive: Arc::new(create_pipeline(
                &device,
                shaders::BLUR_NAIVE,
                "blur_naive_pipeline",
            )?),
            life: Arc::new(create_pipeline(&device, shaders::LIFE_STEP, "life_pipeline")?),
        };

        Ok(Self {
            device,
            queue,
            pipelines,
            tiled: Mutex::new(HashMap::new()),
            state: Mutex::new(WgpuState {
                buffers: BufferRegistry::new(Some(budget)),
                in_flight: InFlightSet::default(),
            }),
            device_error,
            limits,
            capabilities,
            adapter_name: adapter_info.name,
        })
    }

    /// Adapter name reported by the driver.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn lock(&self) -> ComputeResult<MutexGuard<'_, WgpuState>> {
        self.state
            .lock()
            .map_err(|_| ComputeError::DeviceLost("wgpu device state poisoned".into()))
    }

    /// Tiled blur pipeline for one parameter set, built on first use.
    fn tiled_pipeline(&self, params: &KernelParams) -> ComputeResult<Arc<wgpu::ComputePipeline>> {
        let tile = params.tile();
        if !self.capabilities.supports_tiled(tile, params.radius, params.channels) {
            return Err(ComputeError::Unsupported(format!(
                "tile {tile} with radius {} does not fit workgroup storage",
                params.radius
            )));
        }
        let key = (tile.x, tile.y, params.radius, params.channels);
        let mut cache = self
            .tiled
            .lock()
            .map_err(|_| ComputeError::DeviceLost("pipeline cache poisoned".into()))?;
        if let Some(p) = cache.get(&key) {
            return Ok(Arc::clone(p));
        }
        let source = shaders::tiled_blur_source(tile, params.radius, params.channels);
        let label = format!("blur_tiled_{}x{}_r{}_c{}", key.0, key.1, key.2, key.3);
        trace!(pipeline = %label, "building tiled pipeline");
        let pipeline = Arc::new(create_pipeline(&self.device, &source, &label)?);
        cache.insert(key, Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// Pipeline for every dispatch of the batch, in command order.
    ///
    /// The tiled blur is specialized on its parameters, so they are taken
    /// from the last full parameter write recorded before the dispatch.
    fn resolve_pipelines(
        &self,
        batch: &CommandBatch,
    ) -> ComputeResult<Vec<Arc<wgpu::ComputePipeline>>> {
        let mut written: HashMap<BufferId, KernelParams> = HashMap::new();
        let mut out = Vec::new();
        for cmd in batch.commands() {
            match cmd {
                Command::WriteBuffer { dst, offset, data } => {
                    if *offset == 0 && data.len() as u64 >= KernelParams::SIZE {
                        written.insert(*dst, KernelParams::from_bytes(data)?);
                    } else {
                        written.remove(dst);
                    }
                }
                Command::CopyBufferToBuffer { dst, .. } => {
                    written.remove(dst);
                }
                Command::Dispatch(d) => {
                    let pipeline = match d.kernel {
                        KernelKind::Double => Arc::clone(&self.pipelines.double),
                        KernelKind::BlurNaive => Arc::clone(&self.pipelines.blur_naive),
                        KernelKind::LifeStep => Arc::clone(&self.pipelines.life),
                        KernelKind::BlurTiled => {
                            let params = written.get(&d.params).ok_or_else(|| {
                                ComputeError::Unsupported(format!(
                                    "tiled blur on wgpu needs its parameters written to {} in the same batch",
                                    d.params
                                ))
                            })?;
                            if params.tile() != d.shape {
                                return Err(ComputeError::InvalidParams(format!(
                                    "dispatch shape {} does not match tile {}",
                                    d.shape,
                                    params.tile()
                                )));
                            }
                            self.tiled_pipeline(params)?
                        }
                    };
                    out.push(pipeline);
                }
            }
        }
        Ok(out)
    }

    fn encode_dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        state: &WgpuState,
        dispatch: &Dispatch,
        pipeline: &wgpu::ComputePipeline,
    ) -> ComputeResult<()> {
        let src = &state.buffers.get(dispatch.src)?.resource;
        let dst = &state.buffers.get(dispatch.dst)?.resource;
        let params = &state.buffers.get(dispatch.params)?.resource;

        let layout = pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(dispatch.kernel.name()),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: src.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: dst.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: params,
                        offset: 0,
                        size: wgpu::BufferSize::new(KernelParams::SIZE),
                    }),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(dispatch.kernel.name()),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(dispatch.grid.x, dispatch.grid.y, dispatch.grid.z);
        Ok(())
    }

    fn new_encoder(&self) -> wgpu::CommandEncoder {
        self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tessera_batch"),
        })
    }
}

/// Translate buffer capabilities to wgpu usages.
fn wgpu_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.intersects(BufferUsage::STORAGE_READ | BufferUsage::STORAGE_READ_WRITE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    if usage.contains(BufferUsage::MAP_READ) {
        out |= wgpu::BufferUsages::MAP_READ;
    }
    out
}

impl GpuPrimitives for WgpuPrimitives {
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
        // wgpu zero-initializes new buffers
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: byte_len,
            usage: wgpu_usage(usage),
            mapped_at_creation: false,
        });
        Ok(state.buffers.insert(byte_len, usage, buffer))
    }

    fn allocate_init(&self, contents: &[u8], usage: BufferUsage) -> ComputeResult<BufferId> {
        let usage = usage | BufferUsage::COPY_DST;
        let byte_len = contents.len() as u64;
        if byte_len > self.limits.max_buffer_bytes {
            return Err(ComputeError::InvalidParams(format!(
                "buffer of {} exceeds device maximum of {}",
                memory::format_bytes(byte_len),
                memory::format_bytes(self.limits.max_buffer_bytes)
            )));
        }
        let mut state = self.lock()?;
        state.buffers.check_allocation(byte_len, usage)?;
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: None,
            contents,
            usage: wgpu_usage(usage),
        });
        Ok(state.buffers.insert(byte_len, usage, buffer))
    }

    fn write(&self, id: BufferId, offset: u64, data: &[u8]) -> ComputeResult<()> {
        let state = self.lock()?;
        let entry = state.buffers.get(id)?;
        check_write(&entry.desc, offset, data.len() as u64)?;
        state.in_flight.ensure_idle(id)?;
        self.queue.write_buffer(&entry.resource, offset, data);
        Ok(())
    }

    fn destroy(&self, id: BufferId) -> ComputeResult<()> {
        let mut state = self.lock()?;
        state.buffers.describe(id)?;
        state.in_flight.ensure_idle(id)?;
        let entry = state.buffers.remove(id)?;
        entry.resource.destroy();
        Ok(())
    }

    fn describe(&self, id: BufferId) -> ComputeResult<BufferDesc> {
        self.lock()?.buffers.describe(id)
    }

    fn submit(&self, batch: CommandBatch) -> ComputeResult<()> {
        let mut state = self.lock()?;

        batch.validate(|id| state.buffers.describe(id))?;
        for cmd in batch.commands() {
            if let Command::Dispatch(d) = cmd {
                self.limits.check_shape(d.shape)?;
                self.limits.check_grid(d.grid)?;
            }
        }
        let pipelines = self.resolve_pipelines(&batch)?;

        let label = batch.label().unwrap_or("batch").to_string();
        debug!(batch = %label, commands = batch.len(), dispatches = pipelines.len(), "wgpu submit");

        // Host writes are staged until the next queue submit, so encoded
        // work is flushed before any write that follows it.
        let mut encoder = self.new_encoder();
        let mut encoded = false;
        let mut pipelines = pipelines.into_iter();
        for cmd in batch.commands() {
            match cmd {
                Command::WriteBuffer { dst, offset, data } => {
                    if encoded {
                        let done = std::mem::replace(&mut encoder, self.new_encoder());
                        self.queue.submit(std::iter::once(done.finish()));
                        encoded = false;
                    }
                    let buffer = &state.buffers.get(*dst)?.resource;
                    self.queue.write_buffer(buffer, *offset, data);
                }
                Command::Dispatch(d) => {
                    let pipeline = pipelines.next().ok_or_else(|| {
                        ComputeError::OperationFailed("dispatch without a pipeline".into())
                    })?;
                    self.encode_dispatch(&mut encoder, &state, d, &pipeline)?;
                    encoded = true;
                }
                Command::CopyBufferToBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let s = &state.buffers.get(*src)?.resource;
                    let d = &state.buffers.get(*dst)?.resource;
                    encoder.copy_buffer_to_buffer(s, *src_offset, d, *dst_offset, *size);
                    encoded = true;
                }
            }
        }
        // Always submit so pending writes are flushed
        self.queue.submit(std::iter::once(encoder.finish()));

        let referenced = batch.referenced_buffers();
        state.in_flight.replace(referenced);
        Ok(())
    }

    fn wait(&self) -> ComputeResult<()> {
        let _ = self.device.poll(wgpu::Maintain::Wait);
        self.lock()?.in_flight.clear();

        let error = self
            .device_error
            .lock()
            .map_err(|_| ComputeError::DeviceLost("device error slot poisoned".into()))?
            .take();
        match error {
            Some(e) => Err(ComputeError::DeviceLost(e)),
            None => Ok(()),
        }
    }

    fn map_read(&self, id: BufferId) -> ComputeResult<Vec<u8>> {
        let state = self.lock()?;
        let entry = state.buffers.get(id)?;
        require_usage(&entry.desc, BufferUsage::MAP_READ)?;
        state.in_flight.ensure_idle(id)?;

        let slice = entry.resource.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| ComputeError::OperationFailed("Map channel closed".into()))?
            .map_err(|e| ComputeError::OperationFailed(format!("Map failed: {e}")))?;

        let data = slice.get_mapped_range();
        let result = data.to_vec();
        drop(data);
        entry.resource.unmap();

        Ok(result)
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
        "wgpu"
    }
}

/// Estimate VRAM based on device type and max buffer size.
///
/// wgpu does not expose VRAM directly, so this is a heuristic.
fn estimate_vram(info: &wgpu::AdapterInfo, max_buffer_bytes: u64) -> u64 {
    let from_buffer = max_buffer_bytes.saturating_mul(2);

    match info.device_type {
        wgpu::DeviceType::DiscreteGpu => from_buffer.clamp(2u64 << 30, 24u64 << 30),
        wgpu::DeviceType::IntegratedGpu => from_buffer.clamp(512u64 << 20, 4u64 << 30),
        wgpu::DeviceType::VirtualGpu => from_buffer.clamp(1u64 << 30, 8u64 << 30),
        _ => from_buffer.clamp(256u64 << 20, 2u64 << 30),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffer::floats_from_bytes;
    use crate::grid::WorkgroupShape;

    fn device() -> Option<WgpuPrimitives> {
        if !WgpuPrimitives::is_available() {
            eprintln!("no GPU adapter, skipping");
            return None;
        }
        WgpuPrimitives::with_budget(Some(64 << 20)).ok()
    }

    #[test]
    fn test_usage_mapping() {
        let u = wgpu_usage(BufferUsage::ping_pong());
        assert!(u.contains(wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST));
        assert!(!u.contains(wgpu::BufferUsages::MAP_READ));
        assert_eq!(
            wgpu_usage(BufferUsage::readback()),
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST
        );
    }

    #[test]
    fn test_tiled_blur_matches_naive() {
        let Some(gpu) = device() else { return };
        let (w, h, c) = (37u32, 29u32, 2u32);
        let input: Vec<f32> = (0..w * h * c).map(|i| ((i * 7919) % 97) as f32 / 97.0).collect();
        let bytes = (input.len() * 4) as u64;

        let mut results = Vec::new();
        for kind in [KernelKind::BlurNaive, KernelKind::BlurTiled] {
            let p = KernelParams::for_image(w, h, c)
                .unwrap()
                .with_radius(3)
                .with_tile(WorkgroupShape::new(8, 8));
            let src = gpu.allocate_init(bytemuck::cast_slice(&input), BufferUsage::input()).unwrap();
            let dst = gpu.allocate(bytes, BufferUsage::output()).unwrap();
            let params = gpu.allocate(KernelParams::SIZE, BufferUsage::uniform()).unwrap();
            let rb = gpu.allocate(bytes, BufferUsage::readback()).unwrap();

            let mut batch = CommandBatch::new();
            batch
                .write_pod(params, 0, &p)
                .dispatch(Dispatch {
                    kernel: kind,
                    shape: kind.shape(&p),
                    grid: kind.grid(&p).unwrap(),
                    src,
                    dst,
                    params,
                })
                .copy_buffer_to_buffer(dst, 0, rb, 0, bytes);
            gpu.submit(batch).unwrap();
            gpu.wait().unwrap();
            results.push(floats_from_bytes(&gpu.map_read(rb).unwrap()));
            for id in [src, dst, params, rb] {
                gpu.destroy(id).unwrap();
            }
        }
        for (a, b) in results[0].iter().zip(&results[1]) {
            assert!((a - b).abs() < 1e-5);
        }
        assert_eq!(gpu.stats().live_buffers, 0);
    }

    #[test]
    fn test_tiled_without_params_write_is_unsupported() {
        let Some(gpu) = device() else { return };
        let p = KernelParams::for_image(16, 16, 1)
            .unwrap()
            .with_radius(1)
            .with_tile(WorkgroupShape::new(8, 8));
        let src = gpu.allocate(1024, BufferUsage::input()).unwrap();
        let dst = gpu.allocate(1024, BufferUsage::output()).unwrap();
        let params = gpu.allocate_init(bytemuck::bytes_of(&p), BufferUsage::uniform()).unwrap();

        let mut batch = CommandBatch::new();
        batch.dispatch(Dispatch {
            kernel: KernelKind::BlurTiled,
            shape: KernelKind::BlurTiled.shape(&p),
            grid: KernelKind::BlurTiled.grid(&p).unwrap(),
            src,
            dst,
            params,
        });
        assert!(matches!(gpu.submit(batch), Err(ComputeError::Unsupported(_))));
        for id in [src, dst, params] {
            gpu.destroy(id).unwrap();
        }
    }
}
