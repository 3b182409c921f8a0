use wgpu::Buffer;

use crate::sparse::ElementKind;

/// Storage buffer owned by an offload session. Destroyed when dropped, so
/// device memory goes back as soon as the session state holding it ends.
#[derive(Debug)]
pub struct GpuBuffer {
    pub buffer: Buffer,
    pub label: &'static str,
    pub kind: ElementKind,
    pub len: usize,
}

impl GpuBuffer {
    pub fn byte_len(&self) -> u64 {
        (self.len * self.kind.size()) as u64
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
    }
}
