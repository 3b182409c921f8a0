pub mod buffer;
pub mod context;
pub mod readback;

pub use context::{GpuBackend, GpuContext, GpuError};
