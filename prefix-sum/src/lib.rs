//! In-place inclusive prefix sum over a `u32` device buffer.
//!
//! A single workgroup can only scan `WORKGROUP_SIZE` values, so the scan runs as a
//! hierarchy: every level scans its blocks and writes the block totals into the
//! next level's buffer, until one block remains. The down-sweep then adds the
//! scanned totals of the preceding blocks back into each level.
//!
//! Sums saturate at `u32::MAX` instead of wrapping; see [`SATURATED`].

use bytemuck::{Pod, Zeroable};
use kernel::{
    ComputeKernel, ShaderImports, WORKGROUP_SIZE, calc_workgroups, create_storage_buffer,
    create_storage_buffer_init, create_uniform_buffer, kernel_source_gen, read_buffer,
};

pub mod cpu;

/// Value of a saturated sum. A scan whose last element equals this overflowed.
pub const SATURATED: u32 = u32::MAX;

mod shaders {
    pub const PREFIX_SUM: &str = include_str!("shaders/prefix_sum.wgsl");
}

kernel_source_gen!(
    ScanBlocks,
    "scan_blocks",
    shaders::PREFIX_SUM,
    ShaderImports::NONE,
    [Uniform, ReadWrite, ReadWrite]
);
kernel_source_gen!(
    AddBlockOffsets,
    "add_block_offsets",
    shaders::PREFIX_SUM,
    ShaderImports::NONE,
    [Uniform, ReadWrite, ReadWrite]
);

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct ScanUniforms {
    len: u32,
    num_blocks: u32,
    _pad: [u32; 2],
}

struct ScanLevel {
    len: u32,
    num_blocks: u32,
    _uniforms: wgpu::Buffer,
    _block_sums: wgpu::Buffer,
    scan: wgpu::BindGroup,
    add: wgpu::BindGroup,
}

/// Buffers and bind groups for scanning one buffer of a fixed length.
pub struct ScanPlan {
    levels: Vec<ScanLevel>,
}

impl ScanPlan {
    /// Number of hierarchy levels, 0 for an empty scan.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

pub struct PrefixSum {
    scan_blocks: ComputeKernel,
    add_block_offsets: ComputeKernel,
}

impl PrefixSum {
    pub fn new(device: &wgpu::Device) -> kernel::Result<Self> {
        Ok(Self {
            scan_blocks: ScanBlocks::create(device)?,
            add_block_offsets: AddBlockOffsets::create(device)?,
        })
    }

    /// Plans an in-place scan of the first `len` elements of `data`.
    pub fn plan(&self, device: &wgpu::Device, data: &wgpu::Buffer, len: u32) -> ScanPlan {
        let mut levels = Vec::new();
        let mut level_data = data.clone();
        let mut level_len = len;

        while level_len > 0 {
            let num_blocks = level_len.div_ceil(WORKGROUP_SIZE);
            let uniforms = create_uniform_buffer(
                device,
                "Scan uniforms",
                &ScanUniforms {
                    len: level_len,
                    num_blocks,
                    _pad: [0; 2],
                },
            );
            let block_sums =
                create_storage_buffer(device, "Scan block sums", num_blocks as u64 * 4);

            let buffers = [&uniforms, &level_data, &block_sums];
            let scan = self.scan_blocks.bind(device, &buffers);
            let add = self.add_block_offsets.bind(device, &buffers);

            levels.push(ScanLevel {
                len: level_len,
                num_blocks,
                _uniforms: uniforms,
                _block_sums: block_sums.clone(),
                scan,
                add,
            });

            if num_blocks == 1 {
                break;
            }
            level_data = block_sums;
            level_len = num_blocks;
        }

        ScanPlan { levels }
    }

    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, plan: &ScanPlan) {
        for level in &plan.levels {
            self.scan_blocks.dispatch(
                encoder,
                &level.scan,
                calc_workgroups(level.len, WORKGROUP_SIZE),
            );
        }

        // The top level is a single block and already complete.
        for level in plan.levels.iter().rev().skip(1) {
            debug_assert!(level.num_blocks > 1);
            self.add_block_offsets.dispatch(
                encoder,
                &level.add,
                calc_workgroups(level.len, WORKGROUP_SIZE),
            );
        }
    }
}

/// Uploads `values`, scans them on the device and reads the result back.
pub fn prefix_sum(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    kernels: &PrefixSum,
    values: &[u32],
) -> kernel::Result<Vec<u32>> {
    let _span = tracing::trace_span!("PrefixSum", len = values.len()).entered();

    let data = create_storage_buffer_init(device, "Scan data", values);
    let plan = kernels.plan(device, &data, values.len() as u32);

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Prefix sum"),
    });
    kernels.encode(&mut encoder, &plan);
    queue.submit(Some(encoder.finish()));

    read_buffer(device, queue, &data, values.len())
}
