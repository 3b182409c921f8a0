use std::fmt;
use std::sync::Arc;

use futures::executor;
use thiserror::Error;
use tracing::error;
use wgpu::{
    Adapter, Backend, Backends, BufferDescriptor, BufferUsages, Device, DeviceDescriptor,
    DeviceType, ErrorFilter, ExperimentalFeatures, Features, Instance, InstanceDescriptor, Limits,
    MemoryHints, PowerPreference, Queue, RequestAdapterOptions, Trace,
};

use crate::error::{Result, SpmvError};
use crate::gpu::{buffer::GpuBuffer, readback::readback_to_vec};
use crate::sparse::{ElementKind, HostSlice};

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("request device failed: {0}")]
    RequestDevice(String),
}

impl From<GpuError> for SpmvError {
    fn from(e: GpuError) -> Self {
        SpmvError::UnsupportedBackend(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuBackend {
    #[default]
    Auto,
    Vulkan,
    Dx12,
    Metal,
}

impl fmt::Display for GpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Vulkan => "vulkan",
            Self::Dx12 => "dx12",
            Self::Metal => "metal",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: DeviceType,
    pub backend: Backend,
    pub has_f64: bool,
}

#[derive(Debug)]
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    pub adapter_info: AdapterInfo,
}

fn backend_bits(gpu_backend: GpuBackend) -> Backends {
    match gpu_backend {
        GpuBackend::Auto => Backends::all(),
        GpuBackend::Vulkan => Backends::VULKAN,
        GpuBackend::Dx12 => Backends::DX12,
        GpuBackend::Metal => Backends::METAL,
    }
}

impl GpuContext {
    /// Headless compute context. `SHADER_F64` is requested whenever the
    /// adapter offers it; callers check `adapter_info.has_f64` before
    /// compiling f64 kernels.
    pub async fn create(gpu_backend: GpuBackend) -> std::result::Result<Self, GpuError> {
        let instance = Instance::new(&InstanceDescriptor {
            backends: backend_bits(gpu_backend),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .or(Err(GpuError::NoAdapter))?;

        let has_f64 = adapter.features().contains(Features::SHADER_F64);
        let info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: info.name,
            vendor: info.vendor,
            device: info.device,
            device_type: info.device_type,
            backend: info.backend,
            has_f64,
        };

        let mut required_features = Features::empty();
        if has_f64 {
            required_features |= Features::SHADER_F64;
        }

        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("spmv_offload_device"),
                required_features,
                required_limits: Limits::default(),
                experimental_features: ExperimentalFeatures::disabled(),
                memory_hints: MemoryHints::default(),
                trace: Trace::default(),
            })
            .await
            .map_err(|e| GpuError::RequestDevice(format!("{e:?}")))?;

        // Work outside `capture_errors` must not panic the process.
        device.on_uncaptured_error(Arc::new(|e: wgpu::Error| {
            error!(error = %e, "uncaptured wgpu error");
        }));

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            adapter_info,
        })
    }

    pub fn describe(&self) -> String {
        format!(
            "{} ({:?}, backend={:?}, vendor=0x{:04x}, device=0x{:04x}, f64={})",
            self.adapter_info.name,
            self.adapter_info.device_type,
            self.adapter_info.backend,
            self.adapter_info.vendor,
            self.adapter_info.device,
            if self.adapter_info.has_f64 { "yes" } else { "no" }
        )
    }

    /// Runs `f` inside out-of-memory and validation error scopes. An error
    /// returned by `f` wins; otherwise a captured device error is turned into
    /// a `SpmvError` by `on_device_error`, out-of-memory first.
    pub fn capture_errors<T>(
        &self,
        f: impl FnOnce() -> Result<T>,
        on_device_error: impl FnOnce(wgpu::Error) -> SpmvError,
    ) -> Result<T> {
        let oom = self.device.push_error_scope(ErrorFilter::OutOfMemory);
        let validation = self.device.push_error_scope(ErrorFilter::Validation);
        let out = f();
        // Scopes pop innermost first.
        let validation_err = executor::block_on(validation.pop());
        let oom_err = executor::block_on(oom.pop());
        let value = out?;
        match oom_err.or(validation_err) {
            Some(e) => Err(on_device_error(e)),
            None => Ok(value),
        }
    }

    /// Largest storage buffer the device will both create and bind.
    pub fn max_storage_bytes(&self) -> u64 {
        let limits = self.device.limits();
        u64::from(limits.max_buffer_size).min(u64::from(limits.max_storage_buffer_binding_size))
    }

    /// Zero-initialized storage buffer for `len` elements.
    ///
    /// Sizes above the device limits are refused up front. Anything the
    /// device still rejects is captured as `AllocationFailure`.
    pub fn create_storage_buffer(
        &self,
        label: &'static str,
        kind: ElementKind,
        len: usize,
        extra_usage: BufferUsages,
    ) -> Result<GpuBuffer> {
        let byte_len = (len as u64)
            .checked_mul(kind.size() as u64)
            .ok_or_else(|| SpmvError::AllocationFailure {
                label,
                bytes: u64::MAX,
                reason: "size overflows u64".into(),
            })?;
        let limit = self.max_storage_bytes();
        if byte_len > limit {
            return Err(SpmvError::AllocationFailure {
                label,
                bytes: byte_len,
                reason: format!("exceeds device storage limit of {limit} bytes"),
            });
        }

        // Zero-sized bindings are invalid; keep one element of backing store.
        let size = byte_len.max(kind.size() as u64);
        let usage =
            BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST | extra_usage;
        let buffer = self.capture_errors(
            || {
                Ok(self.device.create_buffer(&BufferDescriptor {
                    label: Some(label),
                    size,
                    usage,
                    mapped_at_creation: false,
                }))
            },
            |e| SpmvError::AllocationFailure {
                label,
                bytes: size,
                reason: e.to_string(),
            },
        )?;

        Ok(GpuBuffer {
            buffer,
            label,
            kind,
            len,
        })
    }

    /// Queue a host -> device copy into `dst`. The write lands before the
    /// next submit.
    pub fn write_storage_buffer(&self, dst: &GpuBuffer, data: HostSlice<'_>) -> Result<()> {
        if data.kind() != dst.kind || data.len() != dst.len {
            return Err(SpmvError::TransferFailure {
                label: dst.label,
                reason: format!(
                    "host data is {:?}[{}], buffer is {:?}[{}]",
                    data.kind(),
                    data.len(),
                    dst.kind,
                    dst.len
                ),
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        self.capture_errors(
            || {
                self.queue.write_buffer(&dst.buffer, 0, data.as_bytes());
                Ok(())
            },
            |e| SpmvError::TransferFailure {
                label: dst.label,
                reason: e.to_string(),
            },
        )
    }

    pub async fn readback(&self, buf: &GpuBuffer) -> Result<Vec<f64>> {
        if buf.kind != ElementKind::F64 {
            return Err(SpmvError::TransferFailure {
                label: buf.label,
                reason: "only f64 buffers are read back".into(),
            });
        }
        readback_to_vec::<f64>(&self.device, &self.queue, buf, Some("readback_staging")).await
    }
}
