pub mod compute;
pub mod error;
pub mod generate;
pub mod gpu;
pub mod harness;
pub mod io;
pub mod kernel;
pub mod offload;
pub mod sparse;

pub use error::{Result, SpmvError};
pub use harness::{BenchmarkHarness, EPSILON, HarnessConfig, RunOutcome, verify};
pub use offload::{DeviceOffloadSession, DeviceSelection, OffloadBackend};
pub use sparse::{SparseFormat, SparseMatrix, SparseMatrixCrs, SparseMatrixEll};
