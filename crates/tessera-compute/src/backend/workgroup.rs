//! Simulated SIMT execution for the CPU device.
//!
//! Device memory is a slice of atomic `f32` bit patterns so that any
//! invocation may load or store any element from safe code while groups run
//! concurrently on the rayon pool. Kernels that need workgroup-shared
//! scratch run as a team: `lanes` threads cover the group's invocations in
//! strided order, rendezvous at a [`Barrier`] between staging and compute,
//! and share one [`SharedTile`] that no other group observes while in use.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use rayon::prelude::*;

use crate::grid::{DispatchGrid, WorkgroupShape};

/// Backing store of a CPU device buffer, one word per `f32`.
pub(crate) type DeviceWords = Arc<[AtomicU32]>;

pub(crate) fn zeroed_words(len: usize) -> DeviceWords {
    (0..len).map(|_| AtomicU32::new(0)).collect()
}

/// Element view of device memory.
///
/// Relaxed ordering is enough: every cross-invocation dependency is
/// separated by a barrier wait or by the end of a dispatch.
#[derive(Clone, Copy)]
pub(crate) struct StorageView<'a> {
    words: &'a [AtomicU32],
}

impl<'a> StorageView<'a> {
    pub fn new(words: &'a [AtomicU32]) -> Self {
        Self { words }
    }

    #[inline]
    pub fn load(&self, index: usize) -> f32 {
        f32::from_bits(self.words[index].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, index: usize, value: f32) {
        self.words[index].store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }
}

/// Per-group shared scratch memory.
pub(crate) struct SharedTile {
    cells: Box<[AtomicU32]>,
}

impl SharedTile {
    pub fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    #[inline]
    pub fn load(&self, index: usize) -> f32 {
        f32::from_bits(self.cells[index].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, index: usize, value: f32) {
        self.cells[index].store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }
}

/// Ids of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Invocation {
    pub group: [u32; 2],
    pub local: [u32; 2],
    pub global: [u32; 2],
    /// Row-major index of `global` across the whole grid.
    pub linear: u64,
}

impl Invocation {
    fn new(shape: WorkgroupShape, grid: DispatchGrid, group: [u32; 2], local_index: u32) -> Self {
        let local = shape.local_of(local_index);
        let origin = DispatchGrid::group_origin(shape, group);
        let global = [origin[0] + local[0], origin[1] + local[1]];
        Self {
            group,
            local,
            global,
            linear: grid.linear_index(shape, global),
        }
    }
}

/// Kernel with no intra-group communication.
pub(crate) trait Kernel: Sync {
    fn invoke(&self, inv: Invocation, src: StorageView<'_>, dst: StorageView<'_>);
}

/// Kernel with a staging phase into shared memory and a compute phase,
/// separated by a full-group barrier.
pub(crate) trait TeamKernel: Sync {
    /// Shared scratch elements per group.
    fn shared_len(&self) -> usize;

    /// Phase 1: cooperative fill of `tile`. Contents left by an earlier
    /// group are undefined, so staging must write every cell it reads later.
    fn stage(&self, inv: Invocation, src: StorageView<'_>, tile: &SharedTile);

    /// Phase 2: runs only after every invocation of the group has staged.
    fn compute(&self, inv: Invocation, tile: &SharedTile, dst: StorageView<'_>);
}

fn group_of(grid: DispatchGrid, flat: u32) -> [u32; 2] {
    [flat % grid.x, flat / grid.x]
}

/// Run `kernel` over every invocation of the grid, groups in parallel.
pub(crate) fn dispatch_flat<K: Kernel>(
    kernel: &K,
    shape: WorkgroupShape,
    grid: DispatchGrid,
    src: StorageView<'_>,
    dst: StorageView<'_>,
) {
    let per_group = shape.invocations();
    (0..grid.x * grid.y).into_par_iter().for_each(|flat| {
        let group = group_of(grid, flat);
        for li in 0..per_group {
            kernel.invoke(Invocation::new(shape, grid, group, li), src, dst);
        }
    });
}

/// Run a team kernel, groups in parallel, `lanes` threads per group.
///
/// A single lane runs groups straight on the rayon pool. Wider teams are
/// spawned once per dispatch, as many as fit the pool, and each team pulls
/// groups from a shared counter until the grid is drained.
pub(crate) fn dispatch_team<K: TeamKernel>(
    kernel: &K,
    shape: WorkgroupShape,
    grid: DispatchGrid,
    lanes: usize,
    src: StorageView<'_>,
    dst: StorageView<'_>,
) {
    let lanes = lanes.clamp(1, shape.invocations() as usize);
    let groups = grid.x * grid.y;
    if lanes == 1 {
        (0..groups).into_par_iter().for_each(|flat| {
            run_group_single(kernel, shape, grid, group_of(grid, flat), src, dst);
        });
        return;
    }

    let teams = (rayon::current_num_threads() / lanes).clamp(1, groups.max(1) as usize);
    let next = AtomicU32::new(0);
    let states: Vec<TeamState> = (0..teams)
        .map(|_| TeamState {
            tile: SharedTile::new(kernel.shared_len()),
            barrier: Barrier::new(lanes),
            current: AtomicU32::new(0),
        })
        .collect();

    thread::scope(|s| {
        for team in &states {
            for lane in 0..lanes {
                let next = &next;
                s.spawn(move || run_lane(kernel, shape, grid, lanes, lane, team, next, src, dst));
            }
        }
    });
}

/// Run a whole group on the calling thread.
///
/// Every stage finishes before any compute, which is exactly what the
/// barrier guarantees.
fn run_group_single<K: TeamKernel>(
    kernel: &K,
    shape: WorkgroupShape,
    grid: DispatchGrid,
    group: [u32; 2],
    src: StorageView<'_>,
    dst: StorageView<'_>,
) {
    let tile = SharedTile::new(kernel.shared_len());
    let per_group = shape.invocations();
    for li in 0..per_group {
        kernel.stage(Invocation::new(shape, grid, group, li), src, &tile);
    }
    for li in 0..per_group {
        kernel.compute(Invocation::new(shape, grid, group, li), &tile, dst);
    }
}

/// State shared by the lanes of one team, reused from group to group.
struct TeamState {
    tile: SharedTile,
    barrier: Barrier,
    /// Group the team is working on, published by lane 0.
    current: AtomicU32,
}

/// One lane of a team working through groups one at a time.
///
/// Lane 0 claims the next group and every lane reads the same value after
/// the barrier, so the whole team leaves the loop together. The trailing
/// barrier keeps the next group's staging off the tile until every lane has
/// finished computing from it.
#[allow(clippy::too_many_arguments)]
fn run_lane<K: TeamKernel>(
    kernel: &K,
    shape: WorkgroupShape,
    grid: DispatchGrid,
    lanes: usize,
    lane: usize,
    team: &TeamState,
    next: &AtomicU32,
    src: StorageView<'_>,
    dst: StorageView<'_>,
) {
    let groups = grid.x * grid.y;
    let locals = (lane as u32..shape.invocations()).step_by(lanes);
    loop {
        if lane == 0 {
            team.current.store(next.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        }
        team.barrier.wait();
        let flat = team.current.load(Ordering::Relaxed);
        if flat >= groups {
            break;
        }
        let group = group_of(grid, flat);
        for li in locals.clone() {
            kernel.stage(Invocation::new(shape, grid, group, li), src, &team.tile);
        }
        team.barrier.wait();
        for li in locals.clone() {
            kernel.compute(Invocation::new(shape, grid, group, li), &team.tile, dst);
        }
        team.barrier.wait();
    }
}
