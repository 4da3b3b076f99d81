use thiserror::Error;

pub type Result<T> = std::result::Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("No compatible adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("Failed to compose shader {label}: {message}")]
    Shader { label: String, message: String },

    #[error("Adapter can't run the compute kernels: {0}")]
    Unsupported(String),

    #[error("Device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("Device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("Buffer map failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("Buffer map callback was dropped before completing")]
    MapCancelled,
}
