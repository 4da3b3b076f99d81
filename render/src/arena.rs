//! Growable storage for the per frame instance list.
//!
//! The arena owns both sort parities and the sort plan built over them. Growing
//! replaces all of them and bumps [`InstanceArena::generation`], which tells the
//! owner that bind groups referencing the old buffers are stale. Growth is only
//! legal at a safe point: no submitted work may still reference the arena.

use sort::{RadixSort, SortBuffers, SortPlan};

/// Smallest multiple of the splat count that holds `required` instances, at
/// least one sort block and at most `max`.
pub fn capacity_for(required: u32, num_splats: u32, max: u32) -> u32 {
    let per_multiple = num_splats.max(1) as u64;
    let multiplier = (required as u64).div_ceil(per_multiple).max(1);
    (multiplier * per_multiple)
        .max(sort::BLOCK_SIZE as u64)
        .min(max as u64) as u32
}

pub struct InstanceArena {
    buffers: SortBuffers,
    plan: SortPlan,
    sort_bits: u32,
    generation: u64,
}

impl InstanceArena {
    pub fn new(device: &wgpu::Device, sorter: &RadixSort, capacity: u32, sort_bits: u32) -> Self {
        let buffers = SortBuffers::new(device, capacity);
        let plan = sorter.plan(device, &buffers, sort_bits);
        Self {
            buffers,
            plan,
            sort_bits,
            generation: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.buffers.capacity()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn buffers(&self) -> &SortBuffers {
        &self.buffers
    }

    pub fn plan(&self) -> &SortPlan {
        &self.plan
    }

    /// Reallocates with room for `capacity` instances. Contents are discarded.
    pub fn grow(&mut self, device: &wgpu::Device, sorter: &RadixSort, capacity: u32) {
        tracing::info!(
            from = self.capacity(),
            to = capacity,
            generation = self.generation + 1,
            "Growing instance arena"
        );
        self.buffers = SortBuffers::new(device, capacity);
        self.plan = sorter.plan(device, &self.buffers, self.sort_bits);
        self.generation += 1;
    }
}
