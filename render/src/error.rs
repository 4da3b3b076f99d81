use kernel::KernelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame needs {required} instances but the arena holds {capacity}")]
    CapacityExceeded { required: u32, capacity: u32 },

    #[error("Instance count overflowed while summing tile overlaps")]
    InstanceOverflow,

    #[error("Scene has {count} splats, at most {max} are supported")]
    SceneTooLarge { count: u32, max: u32 },

    #[error("Frame is no longer available, its slot has been reused")]
    NoFrame,

    #[error(transparent)]
    Device(#[from] KernelError),
}

impl FrameError {
    /// Whether the run loop should stop. Everything else only costs one frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Device(_))
    }
}
