//! Stable LSD radix sort of 64-bit keys with `u32` payloads.
//!
//! Keys live as two `u32` planes (`hi`, `lo`) so the kernels never need 64-bit
//! integers. Every pass handles one 4-bit digit: count digits per block, scan
//! the bin-major histogram, then scatter each element to its bin offset plus its
//! rank among equal digits earlier in the block. Buffers ping-pong between the
//! [`Parity::Even`] and [`Parity::Odd`] sets.

use bytemuck::{Pod, Zeroable};
use kernel::{
    ComputeKernel, ShaderImports, WORKGROUP_SIZE, calc_workgroups, create_storage_buffer,
    create_storage_buffer_init, create_uniform_buffer, kernel_source_gen, read_buffer,
};
use prefix_sum::{PrefixSum, ScanPlan};

pub mod cpu;

mod shaders {
    use super::BIN_COUNT;
    use kernel::ShaderImports;

    /// `sort::common`: digit extraction and the pass uniforms.
    pub const SORT: &str = include_str!("shaders/sort.wgsl");
    pub const SORT_COUNT: &str = include_str!("shaders/sort_count.wgsl");
    pub const SORT_SCATTER: &str = include_str!("shaders/sort_scatter.wgsl");

    pub const IMPORTS: ShaderImports = ShaderImports {
        modules: &[SORT],
        defs: &[("BIN_COUNT", BIN_COUNT)],
    };
}

/// Elements handled by one workgroup in a pass.
pub const BLOCK_SIZE: u32 = WORKGROUP_SIZE;
pub const RADIX_BITS: u32 = 4;
pub const BIN_COUNT: u32 = 1 << RADIX_BITS;

/// Largest key width the sort can handle.
pub const MAX_SORT_BITS: u32 = 64;

kernel_source_gen!(
    SortCount,
    "sort_count",
    shaders::SORT_COUNT,
    shaders::IMPORTS,
    [Uniform, ReadOnly, ReadOnly, ReadWrite]
);
kernel_source_gen!(
    SortScatter,
    "sort_scatter",
    shaders::SORT_SCATTER,
    shaders::IMPORTS,
    [Uniform, ReadOnly, ReadOnly, ReadOnly, ReadOnly, ReadWrite, ReadWrite, ReadWrite]
);

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct SortUniforms {
    num_elements: u32,
    shift: u32,
    num_blocks: u32,
    _pad: u32,
}

/// Number of passes needed for keys of `sort_bits` significant bits.
pub fn passes_for_bits(sort_bits: u32) -> u32 {
    sort_bits.div_ceil(RADIX_BITS)
}

pub fn split_key(key: u64) -> (u32, u32) {
    ((key >> 32) as u32, key as u32)
}

pub fn join_key(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

/// Which of the two buffer sets holds the current data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn flip(self) -> Self {
        match self {
            Parity::Even => Parity::Odd,
            Parity::Odd => Parity::Even,
        }
    }

    /// Set holding the result after `passes` passes that started from `Even`.
    pub fn after(passes: u32) -> Self {
        if passes % 2 == 0 { Parity::Even } else { Parity::Odd }
    }
}

pub struct KeyValueBuffers {
    pub keys_hi: wgpu::Buffer,
    pub keys_lo: wgpu::Buffer,
    pub values: wgpu::Buffer,
}

impl KeyValueBuffers {
    fn new(device: &wgpu::Device, label: &str, capacity: u32) -> Self {
        let size = capacity as u64 * 4;
        Self {
            keys_hi: create_storage_buffer(device, &format!("{label} keys hi"), size),
            keys_lo: create_storage_buffer(device, &format!("{label} keys lo"), size),
            values: create_storage_buffer(device, &format!("{label} values"), size),
        }
    }
}

/// Ping-pong key/value storage. Input is always written to the even set.
pub struct SortBuffers {
    capacity: u32,
    pub even: KeyValueBuffers,
    pub odd: KeyValueBuffers,
}

impl SortBuffers {
    pub fn new(device: &wgpu::Device, capacity: u32) -> Self {
        Self {
            capacity,
            even: KeyValueBuffers::new(device, "Sort even", capacity),
            odd: KeyValueBuffers::new(device, "Sort odd", capacity),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn get(&self, parity: Parity) -> &KeyValueBuffers {
        match parity {
            Parity::Even => &self.even,
            Parity::Odd => &self.odd,
        }
    }
}

struct SortPass {
    uniforms: wgpu::Buffer,
    count: wgpu::BindGroup,
    scatter: wgpu::BindGroup,
}

/// Bind groups for sorting one [`SortBuffers`] allocation. Rebuilt whenever the
/// buffers are reallocated.
pub struct SortPlan {
    capacity: u32,
    scan: ScanPlan,
    passes: Vec<SortPass>,
    _histogram: wgpu::Buffer,
}

impl SortPlan {
    pub fn num_passes(&self) -> u32 {
        self.passes.len() as u32
    }

    /// Buffer set holding the sorted output.
    pub fn result_parity(&self) -> Parity {
        Parity::after(self.num_passes())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

pub struct RadixSort {
    count: ComputeKernel,
    scatter: ComputeKernel,
    scan: PrefixSum,
}

impl RadixSort {
    pub fn new(device: &wgpu::Device) -> kernel::Result<Self> {
        Ok(Self {
            count: SortCount::create(device)?,
            scatter: SortScatter::create(device)?,
            scan: PrefixSum::new(device)?,
        })
    }

    pub fn plan(&self, device: &wgpu::Device, buffers: &SortBuffers, sort_bits: u32) -> SortPlan {
        assert!(
            sort_bits <= MAX_SORT_BITS,
            "Can only sort up to {MAX_SORT_BITS} bits"
        );

        let capacity = buffers.capacity();
        let max_blocks = capacity.div_ceil(BLOCK_SIZE);
        // One leading zero, then bin-major block counts.
        let hist_len = BIN_COUNT * max_blocks + 1;
        let histogram = create_storage_buffer(device, "Sort histogram", hist_len as u64 * 4);
        let scan = self.scan.plan(device, &histogram, hist_len);

        let mut passes = Vec::new();
        let mut parity = Parity::Even;
        for _ in 0..passes_for_bits(sort_bits) {
            let src = buffers.get(parity);
            let dst = buffers.get(parity.flip());
            let uniforms = create_uniform_buffer(device, "Sort uniforms", &SortUniforms::zeroed());

            let count = self
                .count
                .bind(device, &[&uniforms, &src.keys_hi, &src.keys_lo, &histogram]);
            let scatter = self.scatter.bind(
                device,
                &[
                    &uniforms,
                    &src.keys_hi,
                    &src.keys_lo,
                    &src.values,
                    &histogram,
                    &dst.keys_hi,
                    &dst.keys_lo,
                    &dst.values,
                ],
            );
            passes.push(SortPass {
                uniforms,
                count,
                scatter,
            });
            parity = parity.flip();
        }

        SortPlan {
            capacity,
            scan,
            passes,
            _histogram: histogram,
        }
    }

    /// Records a sort of the first `num_elements` entries of the even set.
    /// Returns the set holding the result.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        plan: &SortPlan,
        num_elements: u32,
    ) -> Parity {
        assert!(
            num_elements <= plan.capacity,
            "Sorting {num_elements} elements with capacity {}",
            plan.capacity
        );
        let result = plan.result_parity();
        if num_elements == 0 {
            return result;
        }

        let _span = tracing::trace_span!("RadixSort", num_elements).entered();

        let num_blocks = num_elements.div_ceil(BLOCK_SIZE);
        let workgroups = calc_workgroups(num_elements, BLOCK_SIZE);

        for (pass, resources) in plan.passes.iter().enumerate() {
            queue.write_buffer(
                &resources.uniforms,
                0,
                bytemuck::bytes_of(&SortUniforms {
                    num_elements,
                    shift: pass as u32 * RADIX_BITS,
                    num_blocks,
                    _pad: 0,
                }),
            );
            self.count.dispatch(encoder, &resources.count, workgroups);
            self.scan.encode(encoder, &plan.scan);
            self.scatter.dispatch(encoder, &resources.scatter, workgroups);
        }
        result
    }
}

/// Sorts `keys` and carries `values` along. Uploads, sorts and reads back in
/// one blocking call.
pub fn radix_argsort(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    sorter: &RadixSort,
    keys: &[u64],
    values: &[u32],
    sort_bits: u32,
) -> kernel::Result<(Vec<u64>, Vec<u32>)> {
    assert_eq!(
        keys.len(),
        values.len(),
        "Input keys and values must have the same number of elements"
    );
    let len = keys.len();
    let buffers = SortBuffers::new(device, len as u32);

    let (hi, lo): (Vec<u32>, Vec<u32>) = keys.iter().map(|&k| split_key(k)).unzip();
    let upload = |data: &[u32], target: &wgpu::Buffer, encoder: &mut wgpu::CommandEncoder| {
        let staging = create_storage_buffer_init(device, "Sort upload", data);
        encoder.copy_buffer_to_buffer(&staging, 0, target, 0, (data.len() * 4) as u64);
    };

    let plan = sorter.plan(device, &buffers, sort_bits);
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Radix argsort"),
    });
    if len > 0 {
        upload(&hi, &buffers.even.keys_hi, &mut encoder);
        upload(&lo, &buffers.even.keys_lo, &mut encoder);
        upload(values, &buffers.even.values, &mut encoder);
    }
    let parity = sorter.encode(&mut encoder, queue, &plan, len as u32);
    queue.submit(Some(encoder.finish()));

    let out = buffers.get(parity);
    let hi: Vec<u32> = read_buffer(device, queue, &out.keys_hi, len)?;
    let lo: Vec<u32> = read_buffer(device, queue, &out.keys_lo, len)?;
    let values = read_buffer(device, queue, &out.values, len)?;
    let keys = hi.into_iter().zip(lo).map(|(h, l)| join_key(h, l)).collect();
    Ok((keys, values))
}
