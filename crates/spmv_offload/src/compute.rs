//! wgpu side of the SpMV kernels: WGSL shaders, pipelines and the executor
//! that encodes one dispatch.

pub mod spmv;
pub mod spmv_exec;
