use super::{HostSlice, LaunchShape, OperandField, SparseFormat, SparseMatrixCrs, SparseOperand};
use crate::error::{Result, SpmvError};

/// Column index written into padding slots. Any in-range index works since
/// the paired value is 0.
pub const PADDING_COLUMN: u32 = 0;

/// ELLPACK: every row has exactly `row_width` (value, column) slots, stored
/// row-major in `values`/`columns` of length N×L. Rows with fewer nonzeros
/// are padded with `(0.0, PADDING_COLUMN)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrixEll {
    n: usize,
    row_width: usize,
    values: Vec<f64>,
    columns: Vec<u32>,
}

impl SparseMatrixEll {
    /// Fails with `MalformedMatrix` unless both sequences hold exactly N×L
    /// entries and every column index lies in `[0, N)`.
    pub fn new(n: usize, row_width: usize, values: Vec<f64>, columns: Vec<u32>) -> Result<Self> {
        let expected = n.checked_mul(row_width).ok_or_else(|| {
            SpmvError::malformed(format!("ELL shape {n}x{row_width} overflows"))
        })?;
        if values.len() != expected || columns.len() != expected {
            return Err(SpmvError::malformed(format!(
                "ELL values/columns must hold N*L = {expected} entries, got {} and {}",
                values.len(),
                columns.len()
            )));
        }
        if let Some((k, &c)) = columns.iter().enumerate().find(|(_, c)| **c as usize >= n) {
            return Err(SpmvError::malformed(format!(
                "ELL column index {c} at slot {k} out of range for N={n}"
            )));
        }

        Ok(Self {
            n,
            row_width,
            values,
            columns,
        })
    }

    /// Repacks a CRS matrix, keeping each row's stored order and padding the
    /// tail. `row_width` defaults to the longest row.
    pub fn from_crs(crs: &SparseMatrixCrs, row_width: Option<usize>) -> Result<Self> {
        let longest = crs.max_row_len();
        let width = row_width.unwrap_or(longest);
        if width < longest {
            return Err(SpmvError::malformed(format!(
                "ELL row width {width} cannot hold a row of {longest} nonzeros"
            )));
        }

        let n = crs.n();
        let slots = n.checked_mul(width).ok_or_else(|| {
            SpmvError::malformed(format!("ELL shape {n}x{width} overflows"))
        })?;
        let mut values = vec![0.0; slots];
        let mut columns = vec![PADDING_COLUMN; slots];
        for i in 0..n {
            for (slot, (v, c)) in crs.row(i).enumerate() {
                values[i * width + slot] = v;
                columns[i * width + slot] = c;
            }
        }

        Self::new(n, width, values, columns)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// L, the fixed slot count per row.
    pub fn row_width(&self) -> usize {
        self.row_width
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn columns(&self) -> &[u32] {
        &self.columns
    }

    /// The L `(value, column)` slots of row `i`, padding included.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (f64, u32)> + '_ {
        let start = i * self.row_width;
        let end = start + self.row_width;
        self.values[start..end]
            .iter()
            .copied()
            .zip(self.columns[start..end].iter().copied())
    }

    /// Slots whose value is nonzero. Explicitly stored zeros are not
    /// distinguishable from padding and are not counted.
    pub fn nonzero_slots(&self) -> usize {
        self.values.iter().filter(|v| **v != 0.0).count()
    }
}

impl SparseOperand for SparseMatrixEll {
    fn format(&self) -> SparseFormat {
        SparseFormat::Ell
    }

    fn n_rows(&self) -> usize {
        self.n
    }

    fn stored_len(&self) -> usize {
        self.values.len()
    }

    fn launch_shape(&self) -> LaunchShape {
        LaunchShape {
            n_rows: self.n,
            row_width: self.row_width,
        }
    }

    fn fields(&self) -> Vec<OperandField<'_>> {
        vec![
            OperandField {
                label: "ell values",
                data: HostSlice::F64(&self.values),
            },
            OperandField {
                label: "ell columns",
                data: HostSlice::U32(&self.columns),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_have_fixed_width() {
        let m = SparseMatrixEll::new(2, 2, vec![2.0, 0.0, 3.0, 1.0], vec![0, 0, 1, 0]).unwrap();
        assert_eq!(m.row_width(), 2);
        assert_eq!(m.row(0).collect::<Vec<_>>(), vec![(2.0, 0), (0.0, 0)]);
        assert_eq!(m.row(1).collect::<Vec<_>>(), vec![(3.0, 1), (1.0, 0)]);
        assert_eq!(m.nonzero_slots(), 3);
    }

    #[test]
    fn rejects_length_not_n_times_l() {
        let err = SparseMatrixEll::new(2, 2, vec![1.0; 3], vec![0; 4]).unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)));
        let err = SparseMatrixEll::new(2, 2, vec![1.0; 4], vec![0; 5]).unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)));
    }

    #[test]
    fn rejects_out_of_range_column() {
        let err = SparseMatrixEll::new(2, 1, vec![1.0, 1.0], vec![0, 2]).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn zero_width_is_valid() {
        let m = SparseMatrixEll::new(3, 0, vec![], vec![]).unwrap();
        assert_eq!(m.row(2).count(), 0);
    }

    #[test]
    fn from_crs_pads_short_rows() {
        let crs =
            SparseMatrixCrs::new(vec![2.0, 3.0, 1.0, 4.0], vec![0, 2, 1, 0], vec![0, 1, 3, 4])
                .unwrap();
        let ell = SparseMatrixEll::from_crs(&crs, None).unwrap();
        assert_eq!(ell.row_width(), 2);
        assert_eq!(ell.values(), &[2.0, 0.0, 3.0, 1.0, 4.0, 0.0]);
        assert_eq!(ell.columns(), &[0, PADDING_COLUMN, 2, 1, 0, PADDING_COLUMN]);

        let wide = SparseMatrixEll::from_crs(&crs, Some(4)).unwrap();
        assert_eq!(wide.values().len(), 12);
    }

    #[test]
    fn from_crs_rejects_narrow_width() {
        let crs = SparseMatrixCrs::new(vec![1.0, 1.0], vec![0, 1], vec![0, 2, 2]).unwrap();
        let err = SparseMatrixEll::from_crs(&crs, Some(1)).unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)));
    }

    #[test]
    fn from_crs_overflowing_width_is_malformed() {
        let crs = SparseMatrixCrs::new(vec![1.0, 1.0], vec![0, 1], vec![0, 2, 2]).unwrap();
        let err = SparseMatrixEll::from_crs(&crs, Some(usize::MAX)).unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)));
        assert!(err.to_string().contains("overflows"));
    }
}
