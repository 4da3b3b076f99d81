//! Thin layer over wgpu compute shared by the scan, sort and render crates.
//!
//! Every kernel is one WGSL entry point, composed by naga_oil with
//! [`shaders::HELPERS`] and whatever [`ShaderImports`] it names. Bindings are
//! always group 0, numbered in the order given to [`kernel_source_gen`].
//! Each dispatch is recorded in its own compute pass, which is where wgpu places
//! the storage barriers between a writer and the next reader.

use std::borrow::Cow;

use bytemuck::Pod;
use wgpu::util::DeviceExt;

mod compose;
mod error;

pub use compose::{ShaderImports, StructLayout, compose_module, struct_layout};
pub use error::{KernelError, Result};
pub use wgpu;

pub mod shaders {
    /// `kernel::helpers`, imported by every kernel.
    pub const HELPERS: &str = include_str!("shaders/helpers.wgsl");
}

/// Lanes per workgroup for all 1D kernels, the `WORKGROUP_SIZE` shader def.
pub const WORKGROUP_SIZE: u32 = 256;

/// Per-dimension workgroup limit guaranteed by WebGPU.
pub const MAX_WORKGROUPS_PER_DIM: u32 = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Uniform,
    ReadOnly,
    ReadWrite,
}

impl Binding {
    fn buffer_binding_type(self) -> wgpu::BufferBindingType {
        match self {
            Binding::Uniform => wgpu::BufferBindingType::Uniform,
            Binding::ReadOnly => wgpu::BufferBindingType::Storage { read_only: true },
            Binding::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
        }
    }
}

/// Declares a kernel type for one WGSL entry point.
///
/// ```ignore
/// kernel_source_gen!(
///     SortCount,
///     "sort_count",
///     shaders::SORT_COUNT,
///     shaders::IMPORTS,
///     [Uniform, ReadOnly, ReadOnly, ReadWrite]
/// );
/// ```
#[macro_export]
macro_rules! kernel_source_gen {
    ($name:ident, $entry:literal, $source:expr, $imports:expr, [$($binding:ident),* $(,)?]) => {
        pub(crate) struct $name;

        impl $name {
            pub(crate) const ENTRY: &'static str = $entry;
            pub(crate) const BINDINGS: &'static [$crate::Binding] =
                &[$($crate::Binding::$binding),*];

            pub(crate) fn create(
                device: &$crate::wgpu::Device,
            ) -> $crate::Result<$crate::ComputeKernel> {
                $crate::ComputeKernel::new(
                    device,
                    stringify!($name),
                    $source,
                    &$imports,
                    Self::ENTRY,
                    Self::BINDINGS,
                )
            }
        }
    };
}

#[derive(Debug)]
pub struct ComputeKernel {
    label: &'static str,
    bindings: &'static [Binding],
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl ComputeKernel {
    pub fn new(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        imports: &ShaderImports,
        entry_point: &str,
        bindings: &'static [Binding],
    ) -> Result<Self> {
        let naga_module = compose_module(label, source, imports)?;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Naga(Cow::Owned(naga_module)),
        });

        let entries: Vec<_> = bindings
            .iter()
            .enumerate()
            .map(|(i, binding)| wgpu::BindGroupLayoutEntry {
                binding: i as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: binding.buffer_binding_type(),
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });

        Ok(Self {
            label,
            bindings,
            layout,
            pipeline,
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn bind(&self, device: &wgpu::Device, buffers: &[&wgpu::Buffer]) -> wgpu::BindGroup {
        assert_eq!(
            buffers.len(),
            self.bindings.len(),
            "{} expects {} bindings",
            self.label,
            self.bindings.len()
        );

        let entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: &self.layout,
            entries: &entries,
        })
    }

    /// Records one dispatch in its own compute pass. Empty dispatches are dropped.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        bind_group: &wgpu::BindGroup,
        workgroups: [u32; 3],
    ) {
        if workgroups.contains(&0) {
            return;
        }
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
    }
}

/// Workgroup grid covering `threads` lanes. Grids wider than the per-dimension
/// limit spill into y; kernels flatten with `flat_global_id`.
pub fn calc_workgroups(threads: u32, workgroup_size: u32) -> [u32; 3] {
    let groups = threads.div_ceil(workgroup_size);
    if groups <= MAX_WORKGROUPS_PER_DIM {
        [groups, 1, 1]
    } else {
        [
            MAX_WORKGROUPS_PER_DIM,
            groups.div_ceil(MAX_WORKGROUPS_PER_DIM),
            1,
        ]
    }
}

// Zero sized bindings are invalid, so every buffer holds at least one element.
fn padded_size(size: u64) -> u64 {
    size.max(16).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

pub fn create_storage_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: padded_size(size),
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

pub fn create_storage_buffer_init<T: Pod>(
    device: &wgpu::Device,
    label: &str,
    data: &[T],
) -> wgpu::Buffer {
    if data.is_empty() {
        return create_storage_buffer(device, label, 0);
    }
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(data),
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
    })
}

pub fn create_uniform_buffer<T: Pod>(
    device: &wgpu::Device,
    label: &str,
    value: &T,
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

pub fn create_readback_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: padded_size(size),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Blocks until `submission` (or all submitted work when `None`) has finished.
pub fn wait_for(device: &wgpu::Device, submission: Option<wgpu::SubmissionIndex>) -> Result<()> {
    device.poll(wgpu::PollType::Wait {
        submission_index: submission,
        timeout: None,
    })?;
    Ok(())
}

/// Maps the first `len` elements of a `MAP_READ` buffer once `submission` completes.
pub fn map_read<T: Pod>(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    len: usize,
    submission: Option<wgpu::SubmissionIndex>,
) -> Result<Vec<T>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let size = (len * size_of::<T>()) as u64;
    let slice = staging.slice(..size);

    let (sender, receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    wait_for(device, submission)?;
    pollster::block_on(receiver).map_err(|_| KernelError::MapCancelled)??;

    let mut out = vec![T::zeroed(); len];
    {
        let view = slice.get_mapped_range();
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&view[..size as usize]);
    }
    staging.unmap();
    Ok(out)
}

/// Copies `len` elements out of a device buffer. Blocking, meant for readback
/// of finished frames and tests.
pub fn read_buffer<T: Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    len: usize,
) -> Result<Vec<T>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let size = (len * size_of::<T>()) as u64;
    let staging = create_readback_buffer(device, "Readback", size);
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    let submission = queue.submit(Some(encoder.finish()));
    map_read(device, &staging, len, Some(submission))
}

/// Requests a device able to run every kernel in the workspace.
pub async fn request_device(label: &str) -> Result<(wgpu::Device, wgpu::Queue)> {
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
        .await?;

    let limits = adapter.limits();
    let downlevel = adapter.get_downlevel_capabilities();
    if !downlevel
        .flags
        .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
    {
        return Err(KernelError::Unsupported("no compute shaders".into()));
    }
    if limits.max_storage_buffers_per_shader_stage < 8
        || limits.max_compute_invocations_per_workgroup < WORKGROUP_SIZE
        || limits.max_compute_workgroup_size_x < WORKGROUP_SIZE
    {
        return Err(KernelError::Unsupported(format!(
            "limits too low: {} storage buffers, {} invocations",
            limits.max_storage_buffers_per_shader_stage,
            limits.max_compute_invocations_per_workgroup
        )));
    }

    tracing::info!("Using adapter {:?}", adapter.get_info().name);

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_limits: limits,
            ..Default::default()
        })
        .await?;

    Ok((device, queue))
}

/// Device for tests, or `None` when the machine has no usable adapter.
pub fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    match pollster::block_on(request_device("test device")) {
        Ok(device) => Some(device),
        Err(err) => {
            tracing::warn!("No device available, skipping device test: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroups_fold_into_y() {
        assert_eq!(calc_workgroups(0, 256), [0, 1, 1]);
        assert_eq!(calc_workgroups(1, 256), [1, 1, 1]);
        assert_eq!(calc_workgroups(256, 256), [1, 1, 1]);
        assert_eq!(calc_workgroups(257, 256), [2, 1, 1]);

        let wide = (MAX_WORKGROUPS_PER_DIM + 10) * 256;
        let [x, y, z] = calc_workgroups(wide, 256);
        assert_eq!(x, MAX_WORKGROUPS_PER_DIM);
        assert_eq!(y, 2);
        assert_eq!(z, 1);
        assert!(x * y * 256 >= wide);
    }

    #[test]
    fn buffers_are_never_empty() {
        assert_eq!(padded_size(0), 16);
        assert_eq!(padded_size(17), 20);
        assert_eq!(padded_size(1024), 1024);
    }

    const FILL_IDS: &str = r#"
#import kernel::helpers::{flat_global_id, sat_add}

@group(0) @binding(0) var<storage, read_write> out: array<u32>;

@compute @workgroup_size(#{WORKGROUP_SIZE}, 1, 1)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>,
    @builtin(local_invocation_index) lid: u32,
) {
    let id = flat_global_id(wid, nwg, lid);
    if id < arrayLength(&out) {
        out[id] = sat_add(id, 0xfffffff0u);
    }
}
"#;

    kernel_source_gen!(FillIds, "main", FILL_IDS, ShaderImports::NONE, [ReadWrite]);

    #[test]
    fn flat_ids_and_saturation_on_device() {
        let Some((device, queue)) = test_device() else {
            return;
        };
        let len = 1000usize;
        let kernel = FillIds::create(&device).expect("kernel");
        let out = create_storage_buffer(&device, "ids", (len * 4) as u64);
        let bind_group = kernel.bind(&device, &[&out]);

        let mut encoder = device.create_command_encoder(&Default::default());
        kernel.dispatch(&mut encoder, &bind_group, calc_workgroups(len as u32, WORKGROUP_SIZE));
        queue.submit(Some(encoder.finish()));

        let ids: Vec<u32> = read_buffer(&device, &queue, &out, len).expect("readback");
        for (i, &v) in ids.iter().enumerate() {
            let expected = (i as u32).checked_add(0xffff_fff0).unwrap_or(u32::MAX);
            assert_eq!(v, expected);
        }
    }
}
