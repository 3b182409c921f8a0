//! Sparse matrix representations consumed by the SpMV kernels.
//!
//! Both formats are square N×N, populated once and immutable afterwards.
//! Construction validates the structural invariants so the kernels can index
//! without bounds failures.

use std::fmt;

pub mod crs;
pub mod ell;

pub use crs::SparseMatrixCrs;
pub use ell::SparseMatrixEll;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SparseFormat {
    Crs,
    Ell,
}

impl fmt::Display for SparseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crs => f.write_str("crs"),
            Self::Ell => f.write_str("ell"),
        }
    }
}

/// Element type of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    F64,
    U32,
}

impl ElementKind {
    pub const fn size(self) -> usize {
        match self {
            Self::F64 => size_of::<f64>(),
            Self::U32 => size_of::<u32>(),
        }
    }
}

/// Borrowed host data destined for one device buffer.
#[derive(Debug, Clone, Copy)]
pub enum HostSlice<'a> {
    F64(&'a [f64]),
    U32(&'a [u32]),
}

impl HostSlice<'_> {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::F64(_) => ElementKind::F64,
            Self::U32(_) => ElementKind::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F64(s) => s.len(),
            Self::U32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::F64(s) => bytemuck::cast_slice(s),
            Self::U32(s) => bytemuck::cast_slice(s),
        }
    }
}

/// One matrix field, labelled for device-side buffer names and errors.
#[derive(Debug, Clone, Copy)]
pub struct OperandField<'a> {
    pub label: &'static str,
    pub data: HostSlice<'a>,
}

/// Sizes the kernel needs besides its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchShape {
    pub n_rows: usize,
    /// ELL slots per row; zero for CRS.
    pub row_width: usize,
}

/// A validated matrix that can be staged onto a device.
pub trait SparseOperand {
    fn format(&self) -> SparseFormat;

    fn n_rows(&self) -> usize;

    /// Stored entries, padding included for ELL.
    fn stored_len(&self) -> usize;

    fn launch_shape(&self) -> LaunchShape;

    /// Matrix fields in kernel-argument order. The dense input vector and the
    /// output buffer follow these positionally.
    fn fields(&self) -> Vec<OperandField<'_>>;
}

/// Either representation, picked at run time by the harness.
#[derive(Debug, Clone, PartialEq)]
pub enum SparseMatrix {
    Crs(SparseMatrixCrs),
    Ell(SparseMatrixEll),
}

impl SparseMatrix {
    /// Host-side multiply with the kernel matching the representation.
    pub fn multiply(&self, vec: &[f64]) -> crate::error::Result<Vec<f64>> {
        match self {
            Self::Crs(m) => crate::kernel::spmv_crs(m, vec),
            Self::Ell(m) => crate::kernel::spmv_ell(m, vec),
        }
    }
}

impl SparseOperand for SparseMatrix {
    fn format(&self) -> SparseFormat {
        match self {
            Self::Crs(m) => m.format(),
            Self::Ell(m) => m.format(),
        }
    }

    fn n_rows(&self) -> usize {
        match self {
            Self::Crs(m) => m.n_rows(),
            Self::Ell(m) => m.n_rows(),
        }
    }

    fn stored_len(&self) -> usize {
        match self {
            Self::Crs(m) => m.stored_len(),
            Self::Ell(m) => m.stored_len(),
        }
    }

    fn launch_shape(&self) -> LaunchShape {
        match self {
            Self::Crs(m) => m.launch_shape(),
            Self::Ell(m) => m.launch_shape(),
        }
    }

    fn fields(&self) -> Vec<OperandField<'_>> {
        match self {
            Self::Crs(m) => m.fields(),
            Self::Ell(m) => m.fields(),
        }
    }
}

impl From<SparseMatrixCrs> for SparseMatrix {
    fn from(m: SparseMatrixCrs) -> Self {
        Self::Crs(m)
    }
}

impl From<SparseMatrixEll> for SparseMatrix {
    fn from(m: SparseMatrixEll) -> Self {
        Self::Ell(m)
    }
}
