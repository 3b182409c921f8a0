//! Host-memory device. Buffers are plain vectors; the kernel runs on the
//! rayon pool when dispatched, so completion is already reached by the time
//! `synchronize` is called.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::OffloadBackend;
use crate::error::{Result, SpmvError};
use crate::kernel;
use crate::sparse::{ElementKind, HostSlice, LaunchShape, SparseFormat};

#[derive(Debug)]
enum HostData {
    F64(Vec<f64>),
    U32(Vec<u32>),
}

/// A buffer in host memory. Returns its bytes to the owning device's ledger
/// when dropped.
#[derive(Debug)]
pub struct HostBuffer {
    label: &'static str,
    data: HostData,
    bytes: u64,
    ledger: Arc<AtomicU64>,
}

impl HostBuffer {
    fn kind(&self) -> ElementKind {
        match self.data {
            HostData::F64(_) => ElementKind::F64,
            HostData::U32(_) => ElementKind::U32,
        }
    }

    fn len(&self) -> usize {
        match &self.data {
            HostData::F64(v) => v.len(),
            HostData::U32(v) => v.len(),
        }
    }

    fn f64s(&self) -> Result<&[f64]> {
        match &self.data {
            HostData::F64(v) => Ok(v),
            HostData::U32(_) => Err(self.wrong_kind(ElementKind::F64)),
        }
    }

    fn u32s(&self) -> Result<&[u32]> {
        match &self.data {
            HostData::U32(v) => Ok(v),
            HostData::F64(_) => Err(self.wrong_kind(ElementKind::U32)),
        }
    }

    fn f64s_mut(&mut self) -> Result<&mut [f64]> {
        let label = self.label;
        match &mut self.data {
            HostData::F64(v) => Ok(v),
            HostData::U32(_) => Err(SpmvError::DispatchFailure(format!(
                "argument '{label}' is {:?}, kernel expects {:?}",
                ElementKind::U32,
                ElementKind::F64
            ))),
        }
    }

    fn wrong_kind(&self, expected: ElementKind) -> SpmvError {
        SpmvError::DispatchFailure(format!(
            "argument '{}' is {:?}, kernel expects {:?}",
            self.label,
            self.kind(),
            expected
        ))
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.ledger.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// Host offload device with optional memory budget.
#[derive(Debug, Default)]
pub struct HostDevice {
    memory_limit: Option<u64>,
    in_use: Arc<AtomicU64>,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocations that would push usage above `bytes` fail with
    /// `AllocationFailure`.
    pub fn with_memory_limit(bytes: u64) -> Self {
        Self {
            memory_limit: Some(bytes),
            in_use: Arc::default(),
        }
    }

    pub fn memory_limit(&self) -> Option<u64> {
        self.memory_limit
    }

    /// Bytes held by live buffers.
    pub fn bytes_in_use(&self) -> u64 {
        self.in_use.load(Ordering::Acquire)
    }

    fn reserve(&self, label: &'static str, bytes: u64) -> Result<()> {
        let limit = self.memory_limit.unwrap_or(u64::MAX);
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= limit)
            })
            .map(|_| ())
            .map_err(|used| SpmvError::AllocationFailure {
                label,
                bytes,
                reason: format!("host budget {limit} bytes, {used} already in use"),
            })
    }
}

impl OffloadBackend for HostDevice {
    type Buffer = HostBuffer;
    type Kernel = SparseFormat;

    fn describe(&self) -> String {
        match self.memory_limit {
            Some(limit) => format!(
                "host ({} threads, {limit} byte budget)",
                rayon::current_num_threads()
            ),
            None => format!("host ({} threads)", rayon::current_num_threads()),
        }
    }

    fn prepare_kernel(&self, format: SparseFormat) -> Result<SparseFormat> {
        Ok(format)
    }

    fn allocate(&self, label: &'static str, kind: ElementKind, len: usize) -> Result<HostBuffer> {
        let bytes = (len as u64)
            .checked_mul(kind.size() as u64)
            .ok_or_else(|| SpmvError::AllocationFailure {
                label,
                bytes: u64::MAX,
                reason: "size overflows u64".into(),
            })?;
        self.reserve(label, bytes)?;
        debug!(label, bytes, "host buffer acquired");

        let data = match kind {
            ElementKind::F64 => HostData::F64(vec![0.0; len]),
            ElementKind::U32 => HostData::U32(vec![0; len]),
        };
        Ok(HostBuffer {
            label,
            data,
            bytes,
            ledger: Arc::clone(&self.in_use),
        })
    }

    fn upload(&self, buffer: &mut HostBuffer, data: HostSlice<'_>) -> Result<()> {
        let (label, kind, len) = (buffer.label, buffer.kind(), buffer.len());
        match (&mut buffer.data, data) {
            (HostData::F64(dst), HostSlice::F64(src)) if dst.len() == src.len() => {
                dst.copy_from_slice(src);
                Ok(())
            }
            (HostData::U32(dst), HostSlice::U32(src)) if dst.len() == src.len() => {
                dst.copy_from_slice(src);
                Ok(())
            }
            (_, src) => Err(SpmvError::TransferFailure {
                label,
                reason: format!(
                    "host data is {:?}[{}], buffer is {kind:?}[{len}]",
                    src.kind(),
                    src.len()
                ),
            }),
        }
    }

    fn dispatch(
        &self,
        format: &SparseFormat,
        args: &mut [HostBuffer],
        shape: LaunchShape,
    ) -> Result<()> {
        let expected = match format {
            SparseFormat::Crs => 5,
            SparseFormat::Ell => 4,
        };
        if args.len() != expected {
            return Err(SpmvError::DispatchFailure(format!(
                "{format} kernel takes {expected} buffers, got {}",
                args.len()
            )));
        }
        let Some((out, inputs)) = args.split_last_mut() else {
            return Err(SpmvError::DispatchFailure("no output buffer bound".into()));
        };
        let n = shape.n_rows;
        let out = out.f64s_mut()?;

        match format {
            SparseFormat::Crs => {
                let values = inputs[0].f64s()?;
                let columns = inputs[1].u32s()?;
                let delims = inputs[2].u32s()?;
                let x = inputs[3].f64s()?;
                check_lengths(n, x.len(), out.len())?;
                if delims.len() != n + 1 || values.len() != columns.len() {
                    return Err(SpmvError::DispatchFailure(format!(
                        "CRS buffers inconsistent: {} delimiters, {n} rows, {} values, {} columns",
                        delims.len(),
                        values.len(),
                        columns.len()
                    )));
                }
                if delims.iter().any(|d| *d as usize > values.len()) {
                    return Err(SpmvError::DispatchFailure(
                        "CRS row delimiter points past the value buffer".into(),
                    ));
                }
                check_columns(columns, n)?;
                kernel::crs_rows(values, columns, delims, x, out);
            }
            SparseFormat::Ell => {
                let values = inputs[0].f64s()?;
                let columns = inputs[1].u32s()?;
                let x = inputs[2].f64s()?;
                check_lengths(n, x.len(), out.len())?;
                let slots = n.checked_mul(shape.row_width);
                if slots != Some(values.len()) || values.len() != columns.len() {
                    return Err(SpmvError::DispatchFailure(format!(
                        "ELL buffers inconsistent with {n}x{} launch: {} values, {} columns",
                        shape.row_width,
                        values.len(),
                        columns.len()
                    )));
                }
                check_columns(columns, n)?;
                kernel::ell_rows(values, columns, shape.row_width, x, out);
            }
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    fn download(&self, buffer: &HostBuffer) -> Result<Vec<f64>> {
        match &buffer.data {
            HostData::F64(v) => Ok(v.clone()),
            HostData::U32(_) => Err(SpmvError::TransferFailure {
                label: buffer.label,
                reason: "only f64 buffers are read back".into(),
            }),
        }
    }
}

fn check_lengths(n: usize, x_len: usize, out_len: usize) -> Result<()> {
    if x_len != n || out_len != n {
        return Err(SpmvError::DispatchFailure(format!(
            "vector buffers hold x={x_len}, y={out_len} for {n} rows"
        )));
    }
    Ok(())
}

fn check_columns(columns: &[u32], n: usize) -> Result<()> {
    match columns.iter().find(|c| **c as usize >= n) {
        Some(c) => Err(SpmvError::DispatchFailure(format!(
            "column index {c} out of range for {n} rows"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_enforced_and_released() {
        let dev = HostDevice::with_memory_limit(80);
        let a = dev.allocate("a", ElementKind::F64, 8).unwrap();
        assert_eq!(dev.bytes_in_use(), 64);
        let err = dev.allocate("b", ElementKind::F64, 4).unwrap_err();
        assert!(matches!(err, SpmvError::AllocationFailure { label: "b", bytes: 32, .. }));
        let c = dev.allocate("c", ElementKind::U32, 4).unwrap();
        assert_eq!(dev.bytes_in_use(), 80);
        drop(a);
        drop(c);
        assert_eq!(dev.bytes_in_use(), 0);
    }

    #[test]
    fn upload_checks_kind_and_length() {
        let dev = HostDevice::new();
        let mut buf = dev.allocate("v", ElementKind::F64, 2).unwrap();
        let err = dev.upload(&mut buf, HostSlice::F64(&[1.0])).unwrap_err();
        assert!(matches!(err, SpmvError::TransferFailure { label: "v", .. }));
        let err = dev.upload(&mut buf, HostSlice::U32(&[1, 2])).unwrap_err();
        assert!(matches!(err, SpmvError::TransferFailure { .. }));
        dev.upload(&mut buf, HostSlice::F64(&[1.0, 2.0])).unwrap();
        assert_eq!(dev.download(&buf).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn download_refuses_index_buffers() {
        let dev = HostDevice::new();
        let buf = dev.allocate("cols", ElementKind::U32, 1).unwrap();
        assert!(matches!(
            dev.download(&buf),
            Err(SpmvError::TransferFailure { label: "cols", .. })
        ));
    }

    #[test]
    fn dispatch_rejects_wrong_argument_list() {
        let dev = HostDevice::new();
        let mut args = vec![
            dev.allocate("values", ElementKind::F64, 1).unwrap(),
            dev.allocate("columns", ElementKind::U32, 1).unwrap(),
            dev.allocate("x", ElementKind::F64, 1).unwrap(),
            dev.allocate("y", ElementKind::F64, 1).unwrap(),
        ];
        let shape = LaunchShape {
            n_rows: 1,
            row_width: 1,
        };
        let err = dev.dispatch(&SparseFormat::Crs, &mut args, shape).unwrap_err();
        assert!(matches!(err, SpmvError::DispatchFailure(_)));

        // Swapped kinds: columns bound where values belong.
        args.swap(0, 1);
        let err = dev.dispatch(&SparseFormat::Ell, &mut args, shape).unwrap_err();
        assert!(matches!(err, SpmvError::DispatchFailure(_)));

        args.swap(0, 1);
        dev.upload(&mut args[0], HostSlice::F64(&[3.0])).unwrap();
        dev.upload(&mut args[2], HostSlice::F64(&[2.0])).unwrap();
        dev.dispatch(&SparseFormat::Ell, &mut args, shape).unwrap();
        dev.synchronize().unwrap();
        assert_eq!(dev.download(&args[3]).unwrap(), vec![6.0]);
    }
}
