use futures::executor;
use tracing::{debug, info};
use wgpu::{BufferUsages, CommandEncoderDescriptor, PollType};

use super::OffloadBackend;
use crate::compute::spmv_exec::SpmvExecutor;
use crate::error::{Result, SpmvError};
use crate::gpu::buffer::GpuBuffer;
use crate::gpu::context::{GpuBackend, GpuContext};
use crate::sparse::{ElementKind, HostSlice, LaunchShape, SparseFormat};

/// wgpu offload device. Only constructed on adapters with `SHADER_F64`.
pub struct GpuOffload {
    ctx: GpuContext,
}

impl GpuOffload {
    /// Fails with `UnsupportedBackend` if there is no adapter or it cannot run
    /// f64 shaders. Decided here, before any kernel is requested.
    pub fn new(ctx: GpuContext) -> Result<Self> {
        if !ctx.adapter_info.has_f64 {
            return Err(SpmvError::UnsupportedBackend(format!(
                "{} lacks SHADER_F64",
                ctx.adapter_info.name
            )));
        }
        info!(adapter = %ctx.describe(), "gpu offload device ready");
        Ok(Self { ctx })
    }

    /// Blocking adapter + device setup.
    pub fn connect(backend: GpuBackend) -> Result<Self> {
        let ctx = executor::block_on(GpuContext::create(backend))?;
        Self::new(ctx)
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }
}

impl OffloadBackend for GpuOffload {
    type Buffer = GpuBuffer;
    type Kernel = SpmvExecutor;

    fn describe(&self) -> String {
        self.ctx.describe()
    }

    fn prepare_kernel(&self, format: SparseFormat) -> Result<SpmvExecutor> {
        self.ctx.capture_errors(
            || Ok(SpmvExecutor::create(&self.ctx, format)),
            |e| SpmvError::DispatchFailure(format!("{format} kernel: {e}")),
        )
    }

    fn allocate(&self, label: &'static str, kind: ElementKind, len: usize) -> Result<GpuBuffer> {
        let buffer = self
            .ctx
            .create_storage_buffer(label, kind, len, BufferUsages::empty())?;
        debug!(label, bytes = buffer.byte_len(), "gpu buffer acquired");
        Ok(buffer)
    }

    fn upload(&self, buffer: &mut GpuBuffer, data: HostSlice<'_>) -> Result<()> {
        self.ctx.write_storage_buffer(buffer, data)
    }

    fn dispatch(
        &self,
        kernel: &SpmvExecutor,
        args: &mut [GpuBuffer],
        shape: LaunchShape,
    ) -> Result<()> {
        let commands = self.ctx.capture_errors(
            || {
                let mut encoder = self
                    .ctx
                    .device
                    .create_command_encoder(&CommandEncoderDescriptor {
                        label: Some("spmv encoder"),
                    });
                kernel.encode_spmv(&self.ctx, &mut encoder, args, shape)?;
                Ok(encoder.finish())
            },
            |e| SpmvError::DispatchFailure(format!("encode: {e}")),
        )?;

        // Single submit; pending write_buffer copies land first.
        self.ctx.capture_errors(
            || {
                self.ctx.queue.submit(Some(commands));
                Ok(())
            },
            |e| SpmvError::ExecutionFailure(format!("submit: {e}")),
        )
    }

    fn synchronize(&self) -> Result<()> {
        self.ctx.capture_errors(
            || {
                self.ctx
                    .device
                    .poll(PollType::wait_indefinitely())
                    .map(|_| ())
                    .map_err(|e| SpmvError::ExecutionFailure(format!("device poll: {e}")))
            },
            |e| SpmvError::ExecutionFailure(e.to_string()),
        )
    }

    fn download(&self, buffer: &GpuBuffer) -> Result<Vec<f64>> {
        self.ctx.capture_errors(
            || executor::block_on(self.ctx.readback(buffer)),
            |e| SpmvError::TransferFailure {
                label: buffer.label,
                reason: e.to_string(),
            },
        )
    }
}
