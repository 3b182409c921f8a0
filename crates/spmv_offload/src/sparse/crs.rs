use std::ops::Range;

use super::{HostSlice, LaunchShape, OperandField, SparseFormat, SparseOperand};
use crate::error::{Result, SpmvError};

/// Compressed Row Storage.
///
/// Row `i` owns the half-open range `row_delimiters[i]..row_delimiters[i + 1]`
/// of `values`/`columns`. Nonzeros keep their stored order inside a row; the
/// kernel accumulates in that order.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrixCrs {
    n: usize,
    values: Vec<f64>,
    columns: Vec<u32>,
    row_delimiters: Vec<u32>,
}

impl SparseMatrixCrs {
    /// Builds an N×N matrix where N = `row_delimiters.len() - 1`.
    ///
    /// Fails with `MalformedMatrix` when:
    /// - `row_delimiters` is empty, does not start at 0, or decreases anywhere
    /// - `row_delimiters[N]` differs from the nonzero count
    /// - `values` and `columns` lengths differ
    /// - a column index is outside `[0, N)`
    pub fn new(values: Vec<f64>, columns: Vec<u32>, row_delimiters: Vec<u32>) -> Result<Self> {
        let Some(n) = row_delimiters.len().checked_sub(1) else {
            return Err(SpmvError::malformed(
                "CRS row delimiters must have N+1 entries, got none",
            ));
        };
        Self::with_rows(n, values, columns, row_delimiters)
    }

    /// Same as [`SparseMatrixCrs::new`] but with N given explicitly, so a
    /// delimiter array of the wrong length is reported instead of silently
    /// changing the matrix size.
    pub fn with_rows(
        n: usize,
        values: Vec<f64>,
        columns: Vec<u32>,
        row_delimiters: Vec<u32>,
    ) -> Result<Self> {
        let Some(expected) = n.checked_add(1) else {
            return Err(SpmvError::malformed(format!("CRS row count {n} overflows")));
        };
        if row_delimiters.len() != expected {
            return Err(SpmvError::malformed(format!(
                "CRS row delimiters must have N+1 = {expected} entries, got {}",
                row_delimiters.len()
            )));
        }
        if values.len() != columns.len() {
            return Err(SpmvError::malformed(format!(
                "CRS values/columns length differ: values {}, columns {}",
                values.len(),
                columns.len()
            )));
        }
        let nnz = values.len();

        if row_delimiters[0] != 0 {
            return Err(SpmvError::malformed(format!(
                "CRS row delimiters must start at 0, got {}",
                row_delimiters[0]
            )));
        }
        if let Some(i) = row_delimiters.windows(2).position(|w| w[1] < w[0]) {
            return Err(SpmvError::malformed(format!(
                "CRS row delimiters must be non-decreasing: [{}]={} > [{}]={}",
                i,
                row_delimiters[i],
                i + 1,
                row_delimiters[i + 1]
            )));
        }
        let last = row_delimiters[n] as usize;
        if last != nnz {
            return Err(SpmvError::malformed(format!(
                "CRS row delimiters must end at NNZ ({nnz}), got {last}"
            )));
        }
        if let Some((k, &c)) = columns.iter().enumerate().find(|(_, c)| **c as usize >= n) {
            return Err(SpmvError::malformed(format!(
                "CRS column index {c} at position {k} out of range for N={n}"
            )));
        }

        Ok(Self {
            n,
            values,
            columns,
            row_delimiters,
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn columns(&self) -> &[u32] {
        &self.columns
    }

    pub fn row_delimiters(&self) -> &[u32] {
        &self.row_delimiters
    }

    /// Offsets of row `i` into `values`/`columns`.
    pub fn row_range(&self, i: usize) -> Range<usize> {
        self.row_delimiters[i] as usize..self.row_delimiters[i + 1] as usize
    }

    /// `(value, column)` pairs of row `i` in stored order.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (f64, u32)> + '_ {
        let r = self.row_range(i);
        self.values[r.clone()]
            .iter()
            .copied()
            .zip(self.columns[r].iter().copied())
    }

    /// Longest row, i.e. the smallest ELL width that can hold this matrix.
    pub fn max_row_len(&self) -> usize {
        self.row_delimiters
            .windows(2)
            .map(|w| (w[1] - w[0]) as usize)
            .max()
            .unwrap_or(0)
    }
}

impl SparseOperand for SparseMatrixCrs {
    fn format(&self) -> SparseFormat {
        SparseFormat::Crs
    }

    fn n_rows(&self) -> usize {
        self.n
    }

    fn stored_len(&self) -> usize {
        self.nnz()
    }

    fn launch_shape(&self) -> LaunchShape {
        LaunchShape {
            n_rows: self.n,
            row_width: 0,
        }
    }

    fn fields(&self) -> Vec<OperandField<'_>> {
        vec![
            OperandField {
                label: "crs values",
                data: HostSlice::F64(&self.values),
            },
            OperandField {
                label: "crs columns",
                data: HostSlice::U32(&self.columns),
            },
            OperandField {
                label: "crs row_delimiters",
                data: HostSlice::U32(&self.row_delimiters),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SparseMatrixCrs {
        SparseMatrixCrs::new(vec![2.0, 3.0, 1.0, 4.0], vec![0, 2, 1, 0], vec![0, 1, 3, 4]).unwrap()
    }

    #[test]
    fn rows_follow_delimiters() {
        let m = sample();
        assert_eq!(m.n(), 3);
        assert_eq!(m.nnz(), 4);
        assert_eq!(m.row_range(1), 1..3);
        let row1: Vec<_> = m.row(1).collect();
        assert_eq!(row1, vec![(3.0, 2), (1.0, 1)]);
        assert_eq!(m.max_row_len(), 2);
    }

    #[test]
    fn empty_rows_are_allowed() {
        let m = SparseMatrixCrs::new(vec![5.0], vec![1], vec![0, 0, 1]).unwrap();
        assert_eq!(m.row(0).count(), 0);
        assert_eq!(m.row(1).count(), 1);
    }

    #[test]
    fn zero_sized_matrix() {
        let m = SparseMatrixCrs::new(vec![], vec![], vec![0]).unwrap();
        assert_eq!(m.n(), 0);
        assert_eq!(m.max_row_len(), 0);
    }

    #[test]
    fn rejects_decreasing_delimiters() {
        let err = SparseMatrixCrs::new(vec![1.0, 1.0], vec![0, 1], vec![0, 2, 1, 2]).unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)));
        assert!(err.to_string().contains("non-decreasing"));
    }

    #[test]
    fn rejects_wrong_delimiter_count() {
        let err = SparseMatrixCrs::with_rows(3, vec![1.0], vec![0], vec![0, 1]).unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)));
        let err = SparseMatrixCrs::new(vec![], vec![], vec![]).unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)));
    }

    #[test]
    fn rejects_nonzero_start() {
        let err = SparseMatrixCrs::new(vec![1.0], vec![0], vec![1, 1]).unwrap_err();
        assert!(err.to_string().contains("start at 0"));
    }

    #[test]
    fn rejects_last_delimiter_not_nnz() {
        let err = SparseMatrixCrs::new(vec![1.0, 2.0], vec![0, 1], vec![0, 1, 1]).unwrap_err();
        assert!(err.to_string().contains("NNZ"));
    }

    #[test]
    fn rejects_out_of_range_column() {
        let err = SparseMatrixCrs::new(vec![1.0, 2.0], vec![0, 2], vec![0, 1, 2]).unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn rejects_values_columns_mismatch() {
        let err = SparseMatrixCrs::new(vec![1.0, 2.0], vec![0], vec![0, 1, 2]).unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)));
    }

    #[test]
    fn overflowing_row_count_is_malformed() {
        let err = SparseMatrixCrs::with_rows(usize::MAX, vec![], vec![], vec![0]).unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)));
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn fields_are_in_argument_order() {
        let m = sample();
        let labels: Vec<_> = m.fields().iter().map(|f| f.label).collect();
        assert_eq!(labels, ["crs values", "crs columns", "crs row_delimiters"]);
    }
}
