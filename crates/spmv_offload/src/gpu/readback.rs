use bytemuck::{Pod, cast_slice};
use futures::channel::oneshot;
use wgpu::PollType;
use wgpu::{BufferDescriptor, BufferUsages, CommandEncoderDescriptor, Device, MapMode, Queue};

use crate::error::{Result, SpmvError};
use crate::gpu::buffer::GpuBuffer;

/// Copy `src` into a MAP_READ staging buffer, wait for the map and return the
/// contents. Every failure on the way is a `TransferFailure` for `src`.
pub async fn readback_to_vec<T: Pod>(
    device: &Device,
    queue: &Queue,
    src: &GpuBuffer,
    label: Option<&str>,
) -> Result<Vec<T>> {
    let byte_len = src.byte_len();
    if byte_len == 0 {
        return Ok(Vec::new());
    }

    let transfer_err = |reason: String| SpmvError::TransferFailure {
        label: src.label,
        reason,
    };

    let staging = device.create_buffer(&BufferDescriptor {
        label,
        size: byte_len,
        usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_buffer_to_buffer(&src.buffer, 0, &staging, 0, byte_len);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);

    let (tx, rx) = oneshot::channel();
    slice.map_async(MapMode::Read, move |r| {
        let _ = tx.send(r);
    });

    device
        .poll(PollType::wait_indefinitely())
        .map_err(|e| transfer_err(format!("poll while mapping: {e}")))?;

    rx.await
        .map_err(|_| transfer_err("map_async callback dropped".into()))?
        .map_err(|e| transfer_err(format!("map_async failed: {e}")))?;

    let data = slice.get_mapped_range();
    let out = cast_slice::<u8, T>(&data).to_vec();
    drop(data);
    staging.unmap();
    staging.destroy();

    Ok(out)
}
