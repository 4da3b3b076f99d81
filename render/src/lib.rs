//! Tiled Gaussian splat renderer.
//!
//! Splats are projected, binned into 16x16 tiles through a prefix sum and a
//! radix sort on `(tile, depth)` keys, and composited front to back per tile.
//! [`render::Renderer`] drives the device pipeline; [`cpu`] holds a host
//! implementation of the same stages used as a reference.

pub mod arena;
pub mod camera;
mod config;
pub mod cpu;
mod error;
mod frame;
pub mod gaussian_splats;
mod kernels;
pub mod render;
pub mod render_aux;
pub mod sh;
pub mod shaders;

pub use config::{CapacityPolicy, RendererConfig};
pub use error::FrameError;
pub use render::{FrameOutput, Renderer};

pub const TILE_WIDTH: u32 = 16;

// Two parities of keys and values, 24 bytes per instance.
pub const INTERSECTS_UPPER_BOUND: u32 = 1 << 27;
pub const GAUSSIANS_UPPER_BOUND: u32 = 256 * 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub num_splats: u32,
    pub num_instances: u32,
    pub instance_capacity: u32,
    pub arena_generation: u64,
    pub sort_passes: u32,
}
