use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpmvError>;

/// Every failure a benchmark run can hit. None of them are retried: the run
/// aborts and the caller gets the variant naming the failing stage.
#[derive(Debug, Error)]
pub enum SpmvError {
    #[error("malformed matrix: {0}")]
    MalformedMatrix(String),

    #[error("{what} length mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("allocation of '{label}' ({bytes} bytes) failed: {reason}")]
    AllocationFailure {
        label: &'static str,
        bytes: u64,
        reason: String,
    },

    #[error("transfer of '{label}' failed: {reason}")]
    TransferFailure { label: &'static str, reason: String },

    #[error("kernel dispatch failed: {0}")]
    DispatchFailure(String),

    #[error("kernel execution failed: {0}")]
    ExecutionFailure(String),

    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("bad dataset {}: {reason}", path.display())]
    Dataset { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SpmvError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMatrix(msg.into())
    }

    /// Short stage name, used in logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::MalformedMatrix(_) | Self::DimensionMismatch { .. } => "construct",
            Self::AllocationFailure { .. } => "allocate",
            Self::TransferFailure { .. } => "transfer",
            Self::DispatchFailure(_) => "dispatch",
            Self::ExecutionFailure(_) => "execute",
            Self::UnsupportedBackend(_) => "configure",
            Self::Dataset { .. } | Self::Io(_) => "load",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_buffer() {
        let err = SpmvError::AllocationFailure {
            label: "spmv values",
            bytes: 64,
            reason: "over budget".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("spmv values"));
        assert!(msg.contains("64 bytes"));
        assert_eq!(err.stage(), "allocate");
    }

    #[test]
    fn io_errors_convert() {
        fn open_missing() -> Result<Vec<u8>> {
            Ok(std::fs::read("/definitely/not/here.data")?)
        }
        let err = open_missing().unwrap_err();
        assert!(matches!(err, SpmvError::Io(_)));
        assert_eq!(err.stage(), "load");
    }
}
