use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::INTERSECTS_UPPER_BOUND;

/// What a frame does when its instances don't fit the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CapacityPolicy {
    /// Grow the arena right away and finish the frame.
    #[default]
    Grow,
    /// Drop the frame. Every slot grows before its next frame.
    SkipFrame,
}

#[derive(Config, Debug)]
pub struct RendererConfig {
    /// Frames whose transient buffers may be in use at the same time.
    #[config(default = 2)]
    pub frames_in_flight: usize,

    #[config(default = "CapacityPolicy::Grow")]
    pub capacity_policy: CapacityPolicy,

    /// Initial arena size, in instances per splat.
    #[config(default = 4)]
    pub instance_multiplier: u32,

    /// Hard cap on the arena, on top of the device binding limit.
    #[config(default = "INTERSECTS_UPPER_BOUND")]
    pub max_instances: u32,
}
