//! Command recording.
//!
//! A [`CommandBatch`] is one schedulable unit: host writes, kernel
//! dispatches and buffer copies, executed by the device strictly in
//! recording order. Every command is checked against the device's live
//! buffers before anything runs, so configuration bugs (wrong sizes,
//! missing usages, destroyed handles, aliased bindings) fail at submit
//! instead of mid-batch.

use std::collections::HashSet;

use bytemuck::Pod;

use super::buffer::{check_range, check_write, require_usage};
use super::gpu_primitives::{BufferDesc, BufferId, BufferUsage};
use crate::grid::{DispatchGrid, WorkgroupShape};
use crate::kernels::{KernelKind, KernelParams};
use crate::{ComputeError, ComputeResult};

/// One kernel launch.
///
/// `src` is bound read-only, `dst` read-write and `params` as the uniform
/// block. The same buffer may never fill two roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub kernel: KernelKind,
    pub shape: WorkgroupShape,
    pub grid: DispatchGrid,
    pub src: BufferId,
    pub dst: BufferId,
    pub params: BufferId,
}

/// A recorded device command.
#[derive(Debug, Clone)]
pub enum Command {
    /// Host data written into a buffer at this point of the batch.
    WriteBuffer { dst: BufferId, offset: u64, data: Vec<u8> },
    /// Kernel launch.
    Dispatch(Dispatch),
    /// Device-side copy.
    CopyBufferToBuffer {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
}

/// Ordered list of commands submitted together.
#[derive(Debug, Clone, Default)]
pub struct CommandBatch {
    label: Option<String>,
    commands: Vec<Command>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            commands: Vec::new(),
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Record a host write.
    pub fn write_buffer(&mut self, dst: BufferId, offset: u64, data: &[u8]) -> &mut Self {
        self.commands.push(Command::WriteBuffer {
            dst,
            offset,
            data: data.to_vec(),
        });
        self
    }

    /// Record a host write of a plain-data value.
    pub fn write_pod<T: Pod>(&mut self, dst: BufferId, offset: u64, value: &T) -> &mut Self {
        self.write_buffer(dst, offset, bytemuck::bytes_of(value))
    }

    /// Record a kernel launch.
    pub fn dispatch(&mut self, dispatch: Dispatch) -> &mut Self {
        self.commands.push(Command::Dispatch(dispatch));
        self
    }

    /// Record a device-side copy.
    pub fn copy_buffer_to_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> &mut Self {
        self.commands.push(Command::CopyBufferToBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of kernel launches.
    pub fn dispatch_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Dispatch(_)))
            .count()
    }

    /// Every buffer any command touches.
    pub fn referenced_buffers(&self) -> HashSet<BufferId> {
        let mut set = HashSet::new();
        for cmd in &self.commands {
            match cmd {
                Command::WriteBuffer { dst, .. } => {
                    set.insert(*dst);
                }
                Command::Dispatch(d) => {
                    set.extend([d.src, d.dst, d.params]);
                }
                Command::CopyBufferToBuffer { src, dst, .. } => {
                    set.extend([*src, *dst]);
                }
            }
        }
        set
    }

    /// Check every command against live buffer descriptions.
    pub fn validate<F>(&self, describe: F) -> ComputeResult<()>
    where
        F: Fn(BufferId) -> ComputeResult<BufferDesc>,
    {
        for cmd in &self.commands {
            match cmd {
                Command::WriteBuffer { dst, offset, data } => {
                    check_write(&describe(*dst)?, *offset, data.len() as u64)?;
                }
                Command::Dispatch(d) => validate_dispatch(d, &describe)?,
                Command::CopyBufferToBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    if src == dst {
                        return Err(ComputeError::AliasedBinding(*src));
                    }
                    let s = describe(*src)?;
                    let d = describe(*dst)?;
                    require_usage(&s, BufferUsage::COPY_SRC)?;
                    require_usage(&d, BufferUsage::COPY_DST)?;
                    check_range(&s, *src_offset, *size)?;
                    check_range(&d, *dst_offset, *size)?;
                }
            }
        }
        Ok(())
    }
}

fn validate_dispatch<F>(d: &Dispatch, describe: &F) -> ComputeResult<()>
where
    F: Fn(BufferId) -> ComputeResult<BufferDesc>,
{
    if d.src == d.dst {
        return Err(ComputeError::AliasedBinding(d.src));
    }
    if d.params == d.src || d.params == d.dst {
        return Err(ComputeError::AliasedBinding(d.params));
    }
    d.shape.validate()?;
    if d.grid.groups() == 0 {
        return Err(ComputeError::InvalidParams(format!(
            "{} dispatched with an empty grid",
            d.kernel.name()
        )));
    }

    let src = describe(d.src)?;
    let dst = describe(d.dst)?;
    let params = describe(d.params)?;
    require_usage(&src, BufferUsage::STORAGE_READ)?;
    require_usage(&dst, BufferUsage::STORAGE_READ_WRITE)?;
    require_usage(&params, BufferUsage::UNIFORM)?;
    if params.byte_len < KernelParams::SIZE {
        return Err(ComputeError::OutOfBounds {
            id: params.id,
            offset: 0,
            len: KernelParams::SIZE,
            byte_len: params.byte_len,
        });
    }
    Ok(())
}
