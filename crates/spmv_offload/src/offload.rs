//! Device offload: stage operands, dispatch one kernel, wait, read back.
//!
//! [`DeviceOffloadSession`] is a typestate pipeline. Each step consumes the
//! previous state and returns the next one, so the order
//! `stage -> dispatch -> await_completion -> retrieve` is enforced by the
//! compiler. The device buffers live inside the state value; whichever step
//! fails drops them, and the backend releases the storage on drop.

use std::fmt;

use tracing::debug;

use crate::error::{Result, SpmvError};
use crate::gpu::GpuBackend;
use crate::sparse::{ElementKind, HostSlice, LaunchShape, SparseFormat, SparseOperand};

pub mod gpu;
pub mod host;

pub use gpu::GpuOffload;
pub use host::HostDevice;

/// A compute device that can run the SpMV kernels.
///
/// Every method maps to one failure class: `allocate` to `AllocationFailure`,
/// `upload`/`download` to `TransferFailure`, `dispatch` to `DispatchFailure`,
/// `synchronize` to `ExecutionFailure`. Kernel availability is decided in
/// `prepare_kernel`, before anything is staged.
pub trait OffloadBackend {
    type Buffer;
    type Kernel;

    fn describe(&self) -> String;

    fn prepare_kernel(&self, format: SparseFormat) -> Result<Self::Kernel>;

    fn allocate(&self, label: &'static str, kind: ElementKind, len: usize)
    -> Result<Self::Buffer>;

    fn upload(&self, buffer: &mut Self::Buffer, data: HostSlice<'_>) -> Result<()>;

    /// Bind `args` positionally (matrix fields, input vector, output) and
    /// submit a single kernel invocation over `shape.n_rows` rows.
    fn dispatch(
        &self,
        kernel: &Self::Kernel,
        args: &mut [Self::Buffer],
        shape: LaunchShape,
    ) -> Result<()>;

    /// Block until all submitted work has finished.
    fn synchronize(&self) -> Result<()>;

    fn download(&self, buffer: &Self::Buffer) -> Result<Vec<f64>>;
}

/// Which device a harness run offloads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelection {
    /// Host memory and rayon; `memory_limit` in bytes, unbounded if `None`.
    Host { memory_limit: Option<u64> },
    /// wgpu adapter with `SHADER_F64`.
    Gpu { backend: GpuBackend },
}

impl Default for DeviceSelection {
    fn default() -> Self {
        Self::Host { memory_limit: None }
    }
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host { .. } => f.write_str("host"),
            Self::Gpu { backend } => write!(f, "gpu:{backend}"),
        }
    }
}

/// Uninitialized session: a backend with a kernel ready for one format.
pub struct DeviceOffloadSession<'b, B: OffloadBackend> {
    backend: &'b B,
    kernel: B::Kernel,
    format: SparseFormat,
}

/// Buffers in argument order plus the launch shape. Shared by the
/// post-stage states.
struct StagedBuffers<B: OffloadBackend> {
    args: Vec<B::Buffer>,
    shape: LaunchShape,
}

impl<B: OffloadBackend> Drop for StagedBuffers<B> {
    fn drop(&mut self) {
        debug!(buffers = self.args.len(), "releasing session buffers");
    }
}

pub struct StagedSession<'b, B: OffloadBackend> {
    session: DeviceOffloadSession<'b, B>,
    buffers: StagedBuffers<B>,
}

pub struct DispatchedSession<'b, B: OffloadBackend> {
    session: DeviceOffloadSession<'b, B>,
    buffers: StagedBuffers<B>,
}

pub struct CompletedSession<'b, B: OffloadBackend> {
    session: DeviceOffloadSession<'b, B>,
    buffers: StagedBuffers<B>,
}

impl<'b, B: OffloadBackend> DeviceOffloadSession<'b, B> {
    /// Fails with `UnsupportedBackend` when `backend` has no kernel for `format`.
    pub fn new(backend: &'b B, format: SparseFormat) -> Result<Self> {
        let kernel = backend.prepare_kernel(format)?;
        debug!(%format, device = %backend.describe(), "offload session ready");
        Ok(Self {
            backend,
            kernel,
            format,
        })
    }

    pub fn format(&self) -> SparseFormat {
        self.format
    }

    /// Acquire device storage for every matrix field, `vec` and the output,
    /// then copy the host data in. Host data is only read.
    pub fn stage<M>(self, matrix: &M, vec: &[f64]) -> Result<StagedSession<'b, B>>
    where
        M: SparseOperand + ?Sized,
    {
        if matrix.format() != self.format {
            return Err(SpmvError::DispatchFailure(format!(
                "session kernel is {}, operand is {}",
                self.format,
                matrix.format()
            )));
        }
        let n = matrix.n_rows();
        if vec.len() != n {
            return Err(SpmvError::DimensionMismatch {
                what: "dense vector",
                expected: n,
                got: vec.len(),
            });
        }

        let mut inputs = matrix.fields();
        inputs.push(crate::sparse::OperandField {
            label: "x vector",
            data: HostSlice::F64(vec),
        });

        let mut buffers = StagedBuffers::<B> {
            args: Vec::with_capacity(inputs.len() + 1),
            shape: matrix.launch_shape(),
        };

        for field in &inputs {
            let buffer = self
                .backend
                .allocate(field.label, field.data.kind(), field.data.len())?;
            buffers.args.push(buffer);
        }
        let out = self.backend.allocate("y output", ElementKind::F64, n)?;
        buffers.args.push(out);

        for (buffer, field) in buffers.args.iter_mut().zip(&inputs) {
            self.backend.upload(buffer, field.data)?;
        }

        debug!(
            format = %self.format,
            n_rows = n,
            stored = matrix.stored_len(),
            buffers = buffers.args.len(),
            "operands staged"
        );
        Ok(StagedSession {
            session: self,
            buffers,
        })
    }
}

impl<'b, B: OffloadBackend> StagedSession<'b, B> {
    pub fn dispatch(mut self) -> Result<DispatchedSession<'b, B>> {
        let backend = self.session.backend;
        backend.dispatch(
            &self.session.kernel,
            &mut self.buffers.args,
            self.buffers.shape,
        )?;
        debug!(n_rows = self.buffers.shape.n_rows, "kernel dispatched");
        Ok(DispatchedSession {
            session: self.session,
            buffers: self.buffers,
        })
    }
}

impl<'b, B: OffloadBackend> DispatchedSession<'b, B> {
    pub fn await_completion(self) -> Result<CompletedSession<'b, B>> {
        self.session.backend.synchronize()?;
        debug!("kernel completed");
        Ok(CompletedSession {
            session: self.session,
            buffers: self.buffers,
        })
    }
}

impl<B: OffloadBackend> CompletedSession<'_, B> {
    /// Copy the output buffer back. Consumes the session; all device storage
    /// is released before this returns.
    pub fn retrieve(self) -> Result<Vec<f64>> {
        let out = match self.buffers.args.last() {
            Some(buffer) => self.session.backend.download(buffer)?,
            None => {
                return Err(SpmvError::TransferFailure {
                    label: "y output",
                    reason: "session holds no output buffer".into(),
                });
            }
        };
        drop(self.buffers);
        Ok(out)
    }
}

/// Full pipeline in one call: stage, dispatch, wait, retrieve.
pub fn offload_spmv<B, M>(backend: &B, matrix: &M, vec: &[f64]) -> Result<Vec<f64>>
where
    B: OffloadBackend,
    M: SparseOperand + ?Sized,
{
    DeviceOffloadSession::new(backend, matrix.format())?
        .stage(matrix, vec)?
        .dispatch()?
        .await_completion()?
        .retrieve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::{SparseMatrixCrs, SparseMatrixEll};

    fn crs() -> SparseMatrixCrs {
        SparseMatrixCrs::new(vec![2.0, 3.0, 1.0, 4.0], vec![0, 2, 1, 0], vec![0, 1, 3, 4]).unwrap()
    }

    #[test]
    fn pipeline_runs_crs_on_host() {
        let dev = HostDevice::new();
        let out = offload_spmv(&dev, &crs(), &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(out, vec![2.0, 11.0, 4.0]);
        assert_eq!(dev.bytes_in_use(), 0);
    }

    #[test]
    fn pipeline_runs_ell_on_host() {
        let ell = SparseMatrixEll::new(2, 2, vec![2.0, 0.0, 3.0, 1.0], vec![0, 0, 1, 0]).unwrap();
        let dev = HostDevice::new();
        let out = offload_spmv(&dev, &ell, &[1.0, 2.0]).unwrap();
        assert_eq!(out, vec![2.0, 7.0]);
    }

    #[test]
    fn states_hold_buffers_until_retrieved() {
        let dev = HostDevice::new();
        let m = crs();
        let staged = DeviceOffloadSession::new(&dev, SparseFormat::Crs)
            .unwrap()
            .stage(&m, &[1.0, 2.0, 3.0])
            .unwrap();
        // values 4*8, columns 4*4, delimiters 4*4, x 3*8, y 3*8
        assert_eq!(dev.bytes_in_use(), 32 + 16 + 16 + 24 + 24);
        let completed = staged.dispatch().unwrap().await_completion().unwrap();
        assert!(dev.bytes_in_use() > 0);
        let out = completed.retrieve().unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(dev.bytes_in_use(), 0);
    }

    #[test]
    fn dropping_a_staged_session_releases_storage() {
        let dev = HostDevice::new();
        let m = crs();
        let staged = DeviceOffloadSession::new(&dev, SparseFormat::Crs)
            .unwrap()
            .stage(&m, &[1.0, 2.0, 3.0])
            .unwrap();
        assert!(dev.bytes_in_use() > 0);
        drop(staged);
        assert_eq!(dev.bytes_in_use(), 0);
    }

    #[test]
    fn allocation_failure_leaves_host_data_alone() {
        let m = crs();
        let vec = vec![1.0, 2.0, 3.0];
        let prior_out = vec![9.0, 9.0, 9.0];
        // Room for the matrix fields but not the vectors.
        let dev = HostDevice::with_memory_limit(64);

        let err = offload_spmv(&dev, &m, &vec).unwrap_err();
        assert!(matches!(err, SpmvError::AllocationFailure { .. }), "{err}");
        assert_eq!(vec, [1.0, 2.0, 3.0]);
        assert_eq!(prior_out, [9.0, 9.0, 9.0]);
        assert_eq!(m, crs());
        assert_eq!(dev.bytes_in_use(), 0);
    }

    #[test]
    fn operand_format_must_match_kernel() {
        let dev = HostDevice::new();
        let ell = SparseMatrixEll::from_crs(&crs(), None).unwrap();
        let session = DeviceOffloadSession::new(&dev, SparseFormat::Crs).unwrap();
        let err = session.stage(&ell, &[1.0, 2.0, 3.0]).err().unwrap();
        assert!(matches!(err, SpmvError::DispatchFailure(_)));
        assert_eq!(dev.bytes_in_use(), 0);
    }

    #[test]
    fn vector_length_is_checked_before_allocation() {
        let dev = HostDevice::new();
        let err = offload_spmv(&dev, &crs(), &[1.0]).unwrap_err();
        assert!(matches!(err, SpmvError::DimensionMismatch { .. }));
        assert_eq!(dev.bytes_in_use(), 0);
    }
}
