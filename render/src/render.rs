use crate::{
    CapacityPolicy, FrameError, FrameStats, GAUSSIANS_UPPER_BOUND, RendererConfig, TILE_WIDTH,
    arena::capacity_for,
    camera::FrameState,
    frame::{CompletedFrame, FrameSlot, SceneBuffers},
    gaussian_splats::SplatScene,
    kernels::RenderKernels,
    render_aux::FrameAux,
    shaders::{GpuSplat, RenderUniforms, VertexAttribute},
};

use glam::{UVec2, uvec2};
use kernel::{
    WORKGROUP_SIZE, calc_workgroups, create_storage_buffer, create_storage_buffer_init, map_read,
    read_buffer, wait_for,
};
use sort::join_key;

pub fn calc_tile_bounds(img_size: UVec2) -> UVec2 {
    uvec2(
        img_size.x.div_ceil(TILE_WIDTH),
        img_size.y.div_ceil(TILE_WIDTH),
    )
}

/// Key width needed to sort by tile id first, depth second. Depths take the
/// low 32 bits, tile ids only as many bits as the largest id needs.
pub fn sort_bits_for_tiles(num_tiles: u32) -> u32 {
    let tile_bits = u32::BITS - num_tiles.saturating_sub(1).leading_zeros();
    32 + tile_bits
}

// Runtime sized bindings need room for one element even when the scene is empty.
fn upload_splats(device: &wgpu::Device, splats: &[GpuSplat]) -> wgpu::Buffer {
    if splats.is_empty() {
        create_storage_buffer(device, "Splats", size_of::<GpuSplat>() as u64)
    } else {
        create_storage_buffer_init(device, "Splats", splats)
    }
}

/// Handle to a submitted frame. Its buffers stay readable until the slot comes
/// around again, `frames_in_flight` frames later.
#[derive(Debug, Clone, Copy)]
pub struct FrameOutput {
    frame: u64,
    slot: usize,
    img_size: UVec2,
    pub stats: FrameStats,
}

impl FrameOutput {
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn img_size(&self) -> UVec2 {
        self.img_size
    }
}

/// Runs the sort-and-bin pipeline on a wgpu device.
///
/// Each frame takes the next slot of a ring of `frames_in_flight` resource
/// sets. A frame is two submissions: preprocess and scan first, then, once the
/// instance total is known on the host and the arena holds it, expansion, sort,
/// tile boundaries and rasterization.
pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: RendererConfig,
    kernels: RenderKernels,
    img_size: UVec2,
    scene: SceneBuffers,
    slots: Vec<FrameSlot>,
    next_slot: usize,
    next_frame: u64,
    max_instances: u32,
    /// Largest instance total a frame has needed since the slots were built.
    /// Every slot grows to it at its next safe point.
    required_capacity: u32,
}

impl Renderer {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        config: RendererConfig,
        img_size: UVec2,
    ) -> Result<Self, FrameError> {
        assert!(
            config.frames_in_flight > 0,
            "Need at least one frame in flight"
        );
        assert!(
            img_size.x > 0 && img_size.y > 0,
            "Can't render images with 0 size."
        );

        let limits = device.limits();
        let binding_limit = limits
            .max_storage_buffer_binding_size
            .min(limits.max_buffer_size.min(u32::MAX as u64) as u32)
            / 4;
        let max_instances = config.max_instances.min(binding_limit);

        let kernels = RenderKernels::new(&device)?;
        let scene = SceneBuffers {
            splats: upload_splats(&device, &[]),
            num_splats: 0,
            sh_degree: 0,
        };

        let mut renderer = Self {
            device,
            queue,
            config,
            kernels,
            img_size,
            scene,
            slots: Vec::new(),
            next_slot: 0,
            next_frame: 0,
            max_instances,
            required_capacity: 0,
        };
        renderer.rebuild_slots();
        Ok(renderer)
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn img_size(&self) -> UVec2 {
        self.img_size
    }

    pub fn num_splats(&self) -> u32 {
        self.scene.num_splats
    }

    pub fn max_instances(&self) -> u32 {
        self.max_instances
    }

    fn max_splats(&self) -> u32 {
        let limits = self.device.limits();
        let per_binding = limits.max_storage_buffer_binding_size / size_of::<GpuSplat>() as u32;
        GAUSSIANS_UPPER_BOUND.min(per_binding)
    }

    fn rebuild_slots(&mut self) {
        let num_splats = self.scene.num_splats;
        let capacity = capacity_for(
            num_splats.saturating_mul(self.config.instance_multiplier),
            num_splats,
            self.max_instances,
        );
        let tile_bounds = calc_tile_bounds(self.img_size);
        let sort_bits = sort_bits_for_tiles(tile_bounds.x * tile_bounds.y);

        self.slots = (0..self.config.frames_in_flight)
            .map(|_| {
                FrameSlot::new(
                    &self.device,
                    &self.kernels,
                    &self.scene,
                    self.img_size,
                    capacity,
                    sort_bits,
                )
            })
            .collect();
        self.next_slot = 0;
        self.required_capacity = 0;
    }

    /// Replaces the scene. Waits for all frames in flight first.
    pub fn set_scene(&mut self, scene: &SplatScene) -> Result<(), FrameError> {
        let max = self.max_splats();
        if scene.num_splats() > max {
            return Err(FrameError::SceneTooLarge {
                count: scene.num_splats(),
                max,
            });
        }

        self.drain()?;
        self.scene = SceneBuffers {
            splats: upload_splats(&self.device, &scene.to_gpu()),
            num_splats: scene.num_splats(),
            sh_degree: scene.sh_degree(),
        };
        self.rebuild_slots();
        tracing::debug!(num_splats = scene.num_splats(), "Scene uploaded");
        Ok(())
    }

    /// Changes the output size. Waits for all frames in flight first.
    pub fn resize(&mut self, img_size: UVec2) -> Result<(), FrameError> {
        assert!(
            img_size.x > 0 && img_size.y > 0,
            "Can't render images with 0 size."
        );
        if img_size == self.img_size {
            return Ok(());
        }
        self.drain()?;
        self.img_size = img_size;
        self.rebuild_slots();
        Ok(())
    }

    /// Blocks until all submitted work has finished.
    pub fn drain(&self) -> Result<(), FrameError> {
        let _span = tracing::trace_span!("Drain").entered();
        wait_for(&self.device, None)?;
        Ok(())
    }

    pub fn render_frame(&mut self, frame: FrameState) -> Result<FrameOutput, FrameError> {
        let frame_id = self.next_frame;
        self.next_frame += 1;
        let slot_index = self.next_slot;
        self.next_slot = (self.next_slot + 1) % self.slots.len();

        let _span =
            tracing::trace_span!("render_frame", frame = frame_id, slot = slot_index).entered();

        let num_splats = self.scene.num_splats;
        let uniforms = RenderUniforms::new(&frame, self.img_size, num_splats, self.scene.sh_degree);
        let slot = &mut self.slots[slot_index];

        // Safe point: nothing on the device references this slot after this.
        slot.wait_idle(&self.device)?;
        slot.completed = None;
        if slot.arena.capacity() < self.required_capacity {
            let capacity = capacity_for(self.required_capacity, num_splats, self.max_instances);
            slot.arena.grow(&self.device, &self.kernels.sorter, capacity);
        }

        self.queue
            .write_buffer(&slot.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Project and count"),
            });
        tracing::trace_span!("ProjectSplats").in_scope(|| {
            self.kernels.project.dispatch(
                &mut encoder,
                &slot.project,
                calc_workgroups(num_splats, WORKGROUP_SIZE),
            );
        });
        tracing::trace_span!("PrefixSumGaussHits").in_scope(|| {
            self.kernels.scan.encode(&mut encoder, &slot.scan);
        });
        encoder.copy_buffer_to_buffer(
            &slot.counts,
            num_splats as u64 * 4,
            &slot.total_readback,
            0,
            4,
        );
        let submission = self.queue.submit(Some(encoder.finish()));
        slot.last_submission = Some(submission.clone());

        let num_instances =
            map_read::<u32>(&self.device, &slot.total_readback, 1, Some(submission))?[0];

        if num_instances == prefix_sum::SATURATED {
            tracing::warn!(frame = frame_id, "Instance count overflowed, skipping frame");
            return Err(FrameError::InstanceOverflow);
        }

        let capacity = slot.arena.capacity();
        if num_instances > capacity {
            if num_instances > self.max_instances {
                tracing::warn!(
                    frame = frame_id,
                    num_instances,
                    max = self.max_instances,
                    "Instances beyond the largest possible arena, skipping frame"
                );
                return Err(FrameError::CapacityExceeded {
                    required: num_instances,
                    capacity,
                });
            }

            self.required_capacity = self.required_capacity.max(num_instances);
            match self.config.capacity_policy {
                CapacityPolicy::Grow => {
                    // Submission A is complete, so the arena is unreferenced.
                    let grown = capacity_for(num_instances, num_splats, self.max_instances);
                    slot.arena.grow(&self.device, &self.kernels.sorter, grown);
                }
                CapacityPolicy::SkipFrame => {
                    tracing::warn!(
                        frame = frame_id,
                        num_instances,
                        capacity,
                        "Arena too small, skipping frame"
                    );
                    return Err(FrameError::CapacityExceeded {
                        required: num_instances,
                        capacity,
                    });
                }
            }
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Sort and rasterize"),
            });
        let parity = slot.encode_instances(
            &mut encoder,
            &self.device,
            &self.queue,
            &self.kernels,
            &uniforms,
            num_instances,
        );
        slot.last_submission = Some(self.queue.submit(Some(encoder.finish())));
        slot.completed = Some(CompletedFrame {
            frame: frame_id,
            num_instances,
            parity,
        });

        let stats = FrameStats {
            frame: frame_id,
            num_splats,
            num_instances,
            instance_capacity: slot.arena.capacity(),
            arena_generation: slot.arena.generation(),
            sort_passes: if num_instances > 0 {
                slot.arena.plan().num_passes()
            } else {
                0
            },
        };
        tracing::debug!(?stats, "Frame submitted");

        Ok(FrameOutput {
            frame: frame_id,
            slot: slot_index,
            img_size: self.img_size,
            stats,
        })
    }

    fn completed_slot(
        &self,
        output: &FrameOutput,
    ) -> Result<(&FrameSlot, CompletedFrame), FrameError> {
        let slot = self.slots.get(output.slot).ok_or(FrameError::NoFrame)?;
        match slot.completed {
            Some(done) if done.frame == output.frame && output.img_size == self.img_size => {
                Ok((slot, done))
            }
            _ => Err(FrameError::NoFrame),
        }
    }

    /// Packed RGBA8 image, row major, `width * height` texels. Written by the
    /// frame's last submission.
    pub fn output_buffer(&self, output: &FrameOutput) -> Result<&wgpu::Buffer, FrameError> {
        Ok(&self.completed_slot(output)?.0.output)
    }

    pub fn read_output(&self, output: &FrameOutput) -> Result<Vec<u32>, FrameError> {
        let (slot, _) = self.completed_slot(output)?;
        let len = (self.img_size.x * self.img_size.y) as usize;
        Ok(read_buffer(&self.device, &self.queue, &slot.output, len)?)
    }

    /// Reads every intermediate buffer of a finished frame.
    pub fn read_aux(&self, output: &FrameOutput) -> Result<FrameAux, FrameError> {
        let _span = tracing::trace_span!("ReadAux", frame = output.frame).entered();

        let (slot, done) = self.completed_slot(output)?;
        let n = self.scene.num_splats as usize;
        let total = done.num_instances as usize;
        let tile_bounds = calc_tile_bounds(self.img_size);
        let num_tiles = (tile_bounds.x * tile_bounds.y) as usize;

        let attributes: Vec<VertexAttribute> =
            read_buffer(&self.device, &self.queue, &slot.attributes, n)?;
        let offsets: Vec<u32> = read_buffer(&self.device, &self.queue, &slot.counts, n + 1)?;

        let sorted = slot.arena.buffers().get(done.parity);
        let keys_hi: Vec<u32> = read_buffer(&self.device, &self.queue, &sorted.keys_hi, total)?;
        let keys_lo: Vec<u32> = read_buffer(&self.device, &self.queue, &sorted.keys_lo, total)?;
        let values: Vec<u32> = read_buffer(&self.device, &self.queue, &sorted.values, total)?;
        let boundaries: Vec<[u32; 2]> =
            read_buffer(&self.device, &self.queue, &slot.boundaries, num_tiles)?;

        let keys = keys_hi
            .into_iter()
            .zip(keys_lo)
            .map(|(hi, lo)| join_key(hi, lo))
            .collect();

        Ok(FrameAux {
            img_size: self.img_size,
            tile_bounds,
            attributes,
            offsets,
            keys,
            values,
            boundaries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_bounds_round_up() {
        assert_eq!(calc_tile_bounds(uvec2(16, 16)), uvec2(1, 1));
        assert_eq!(calc_tile_bounds(uvec2(17, 33)), uvec2(2, 3));
        assert_eq!(calc_tile_bounds(uvec2(1920, 1080)), uvec2(120, 68));
    }

    #[test]
    fn sort_bits_cover_largest_tile_id() {
        assert_eq!(sort_bits_for_tiles(1), 32);
        assert_eq!(sort_bits_for_tiles(2), 33);
        assert_eq!(sort_bits_for_tiles(16), 36);
        assert_eq!(sort_bits_for_tiles(17), 37);
        // 1080p: 8160 tiles, ids up to 8159 need 13 bits.
        assert_eq!(sort_bits_for_tiles(120 * 68), 45);
    }
}
