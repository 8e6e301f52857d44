//! Element-wise map.

use super::KernelParams;
use crate::backend::workgroup::{Invocation, Kernel, StorageView};

/// The map applied to every element.
#[inline]
pub fn double(v: f32) -> f32 {
    v * 2.0
}

pub(crate) struct DoubleKernel {
    len: u32,
}

impl DoubleKernel {
    pub fn new(params: &KernelParams) -> Self {
        Self { len: params.len }
    }
}

impl Kernel for DoubleKernel {
    #[inline]
    fn invoke(&self, inv: Invocation, src: StorageView<'_>, dst: StorageView<'_>) {
        if inv.linear >= self.len as u64 {
            return;
        }
        let i = inv.linear as usize;
        dst.store(i, double(src.load(i)));
    }
}
