//! Transient resources of one frame in flight.

use bytemuck::Zeroable;
use glam::UVec2;
use kernel::{create_readback_buffer, create_storage_buffer, create_uniform_buffer};
use prefix_sum::ScanPlan;
use sort::Parity;

use crate::{
    arena::InstanceArena,
    kernels::RenderKernels,
    shaders::{RenderUniforms, VertexAttribute},
};

/// Scene data shared read-only by every slot.
pub(crate) struct SceneBuffers {
    pub splats: wgpu::Buffer,
    pub num_splats: u32,
    pub sh_degree: u32,
}

/// Bind groups over the arena, valid for one arena generation.
struct InstanceBindings {
    generation: u64,
    map_intersects: wgpu::BindGroup,
    clear_boundaries: wgpu::BindGroup,
    tile_boundaries: wgpu::BindGroup,
    rasterize: wgpu::BindGroup,
}

/// What a finished frame left in the slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompletedFrame {
    pub frame: u64,
    pub num_instances: u32,
    pub parity: Parity,
}

pub(crate) struct FrameSlot {
    pub uniforms: wgpu::Buffer,
    pub attributes: wgpu::Buffer,
    /// Overlap counts at `i + 1`, scanned in place into offsets.
    pub counts: wgpu::Buffer,
    pub scan: ScanPlan,
    pub total_readback: wgpu::Buffer,
    pub boundaries: wgpu::Buffer,
    pub output: wgpu::Buffer,
    pub arena: InstanceArena,
    pub project: wgpu::BindGroup,
    instance_bindings: Option<InstanceBindings>,

    pub last_submission: Option<wgpu::SubmissionIndex>,
    pub completed: Option<CompletedFrame>,
}

impl FrameSlot {
    pub fn new(
        device: &wgpu::Device,
        kernels: &RenderKernels,
        scene: &SceneBuffers,
        img_size: UVec2,
        capacity: u32,
        sort_bits: u32,
    ) -> Self {
        let num_splats = scene.num_splats;
        let tile_bounds = crate::render::calc_tile_bounds(img_size);
        let num_tiles = (tile_bounds.x * tile_bounds.y) as u64;

        let uniforms = create_uniform_buffer(device, "Render uniforms", &RenderUniforms::zeroed());
        let attributes = create_storage_buffer(
            device,
            "Vertex attributes",
            num_splats.max(1) as u64 * size_of::<VertexAttribute>() as u64,
        );
        let counts = create_storage_buffer(
            device,
            "Tile overlap counts",
            (num_splats as u64 + 1) * 4,
        );
        let scan = kernels.scan.plan(device, &counts, num_splats + 1);
        let total_readback = create_readback_buffer(device, "Instance total", 4);
        let boundaries = create_storage_buffer(device, "Tile boundaries", num_tiles * 2 * 4);
        let output = create_storage_buffer(
            device,
            "Output image",
            img_size.x as u64 * img_size.y as u64 * 4,
        );
        let arena = InstanceArena::new(device, &kernels.sorter, capacity, sort_bits);

        let project = kernels
            .project
            .bind(device, &[&uniforms, &scene.splats, &attributes, &counts]);

        Self {
            uniforms,
            attributes,
            counts,
            scan,
            total_readback,
            boundaries,
            output,
            arena,
            project,
            instance_bindings: None,
            last_submission: None,
            completed: None,
        }
    }

    /// Blocks until the previous frame of this slot is done on the device.
    pub fn wait_idle(&mut self, device: &wgpu::Device) -> kernel::Result<()> {
        if let Some(submission) = self.last_submission.take() {
            kernel::wait_for(device, Some(submission))?;
        }
        Ok(())
    }

    fn bind_instances(&self, device: &wgpu::Device, kernels: &RenderKernels) -> InstanceBindings {
        let buffers = self.arena.buffers();
        let input = buffers.get(Parity::Even);
        let sorted = buffers.get(self.arena.plan().result_parity());

        let map_intersects = kernels.map_intersects.bind(
            device,
            &[
                &self.uniforms,
                &self.attributes,
                &self.counts,
                &input.keys_hi,
                &input.keys_lo,
                &input.values,
            ],
        );
        let boundary_buffers = [&self.uniforms, &self.counts, &sorted.keys_hi, &self.boundaries];
        let clear_boundaries = kernels.clear_boundaries.bind(device, &boundary_buffers);
        let tile_boundaries = kernels.tile_boundaries.bind(device, &boundary_buffers);
        let rasterize = kernels.rasterize.bind(
            device,
            &[
                &self.uniforms,
                &self.boundaries,
                &sorted.values,
                &self.attributes,
                &self.output,
            ],
        );

        InstanceBindings {
            generation: self.arena.generation(),
            map_intersects,
            clear_boundaries,
            tile_boundaries,
            rasterize,
        }
    }

    /// Records key expansion, sort, boundary extraction and rasterization.
    /// Arena bind groups from an older generation are rebuilt first.
    pub fn encode_instances(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        kernels: &RenderKernels,
        uniforms: &RenderUniforms,
        num_instances: u32,
    ) -> Parity {
        let bindings = match self.instance_bindings.take() {
            Some(bindings) if bindings.generation == self.arena.generation() => bindings,
            _ => self.bind_instances(device, kernels),
        };

        let wg = kernel::WORKGROUP_SIZE;
        let parity = if num_instances > 0 {
            tracing::trace_span!("MapGaussiansToIntersects").in_scope(|| {
                kernels.map_intersects.dispatch(
                    encoder,
                    &bindings.map_intersects,
                    kernel::calc_workgroups(uniforms.num_splats, wg),
                );
            });
            tracing::trace_span!("TileSort").in_scope(|| {
                kernels
                    .sorter
                    .encode(encoder, queue, self.arena.plan(), num_instances)
            })
        } else {
            self.arena.plan().result_parity()
        };

        tracing::trace_span!("TileBoundaries").in_scope(|| {
            kernels.clear_boundaries.dispatch(
                encoder,
                &bindings.clear_boundaries,
                kernel::calc_workgroups(2 * uniforms.num_tiles(), wg),
            );
            kernels.tile_boundaries.dispatch(
                encoder,
                &bindings.tile_boundaries,
                kernel::calc_workgroups(num_instances, wg),
            );
        });

        tracing::trace_span!("Rasterize").in_scope(|| {
            let tile_bounds = uniforms.tile_bounds();
            kernels.rasterize.dispatch(
                encoder,
                &bindings.rasterize,
                [tile_bounds.x, tile_bounds.y, 1],
            );
        });

        self.instance_bindings = Some(bindings);
        parity
    }
}
