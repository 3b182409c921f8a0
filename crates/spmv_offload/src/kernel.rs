//! Host SpMV kernels, one per format.
//!
//! Rows are computed in parallel; the nonzeros of a single row are always
//! accumulated sequentially in stored order starting from 0.0. That order
//! fixes the rounding path the verification tolerance is calibrated against,
//! so it must not be split or reassociated.

use rayon::prelude::*;

use crate::error::{Result, SpmvError};
use crate::sparse::{SparseMatrixCrs, SparseMatrixEll};

/// `out = A * vec` for a CRS matrix.
pub fn spmv_crs(matrix: &SparseMatrixCrs, vec: &[f64]) -> Result<Vec<f64>> {
    check_vec_len(matrix.n(), vec)?;
    let mut out = vec![0.0; matrix.n()];
    crs_rows(
        matrix.values(),
        matrix.columns(),
        matrix.row_delimiters(),
        vec,
        &mut out,
    );
    Ok(out)
}

/// `out = A * vec` for an ELL matrix; padding slots add `0.0 * vec[PADDING_COLUMN]`.
pub fn spmv_ell(matrix: &SparseMatrixEll, vec: &[f64]) -> Result<Vec<f64>> {
    check_vec_len(matrix.n(), vec)?;
    let mut out = vec![0.0; matrix.n()];
    ell_rows(
        matrix.values(),
        matrix.columns(),
        matrix.row_width(),
        vec,
        &mut out,
    );
    Ok(out)
}

fn check_vec_len(n: usize, vec: &[f64]) -> Result<()> {
    if vec.len() != n {
        return Err(SpmvError::DimensionMismatch {
            what: "dense vector",
            expected: n,
            got: vec.len(),
        });
    }
    Ok(())
}

/// Raw CRS kernel over already validated arrays. `out.len()` is N.
pub(crate) fn crs_rows(
    values: &[f64],
    columns: &[u32],
    row_delimiters: &[u32],
    vec: &[f64],
    out: &mut [f64],
) {
    out.par_iter_mut().enumerate().for_each(|(i, y)| {
        let start = row_delimiters[i] as usize;
        let end = row_delimiters[i + 1] as usize;
        let mut sum = 0.0;
        for k in start..end {
            sum += values[k] * vec[columns[k] as usize];
        }
        *y = sum;
    });
}

/// Raw ELL kernel over already validated arrays. `out.len()` is N.
pub(crate) fn ell_rows(
    values: &[f64],
    columns: &[u32],
    row_width: usize,
    vec: &[f64],
    out: &mut [f64],
) {
    out.par_iter_mut().enumerate().for_each(|(i, y)| {
        let start = i * row_width;
        let mut sum = 0.0;
        for k in start..start + row_width {
            sum += values[k] * vec[columns[k] as usize];
        }
        *y = sum;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{EPSILON, verify};
    use crate::sparse::ell::PADDING_COLUMN;
    use proptest::prelude::*;

    #[test]
    fn crs_worked_example() {
        let m = SparseMatrixCrs::new(vec![2.0, 3.0, 1.0, 4.0], vec![0, 2, 1, 0], vec![0, 1, 3, 4])
            .unwrap();
        let out = spmv_crs(&m, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(out, vec![2.0, 11.0, 4.0]);
    }

    #[test]
    fn ell_worked_example() {
        let m = SparseMatrixEll::new(2, 2, vec![2.0, 0.0, 3.0, 1.0], vec![0, PADDING_COLUMN, 1, 0])
            .unwrap();
        let out = spmv_ell(&m, &[1.0, 2.0]).unwrap();
        assert_eq!(out, vec![2.0, 7.0]);
    }

    #[test]
    fn empty_row_yields_zero() {
        let m = SparseMatrixCrs::new(vec![1.5], vec![0], vec![0, 1, 1]).unwrap();
        assert_eq!(spmv_crs(&m, &[2.0, 9.0]).unwrap(), vec![3.0, 0.0]);
    }

    #[test]
    fn vector_length_is_checked() {
        let m = SparseMatrixCrs::new(vec![1.0], vec![0], vec![0, 1]).unwrap();
        let err = spmv_crs(&m, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            SpmvError::DimensionMismatch {
                expected: 1,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn accumulation_follows_stored_order() {
        // 1e16 + 1 - 1e16 loses the 1 when summed left to right.
        let m = SparseMatrixCrs::new(vec![1e16, 1.0, -1e16], vec![0, 0, 0], vec![0, 3]).unwrap();
        assert_eq!(spmv_crs(&m, &[1.0]).unwrap(), vec![0.0]);

        let reordered =
            SparseMatrixCrs::new(vec![1e16, -1e16, 1.0], vec![0, 0, 0], vec![0, 3]).unwrap();
        assert_eq!(spmv_crs(&reordered, &[1.0]).unwrap(), vec![1.0]);
    }

    fn arb_crs() -> impl Strategy<Value = (SparseMatrixCrs, Vec<f64>)> {
        (1usize..24).prop_flat_map(|n| {
            let rows = prop::collection::vec(
                prop::collection::btree_set(0..n as u32, 0..=n.min(6)),
                n,
            );
            let vec = prop::collection::vec(-10.0f64..10.0, n);
            (rows, vec).prop_flat_map(move |(rows, vec)| {
                let nnz: usize = rows.iter().map(|r| r.len()).sum();
                prop::collection::vec(-10.0f64..10.0, nnz).prop_map(move |values| {
                    let mut columns = Vec::with_capacity(nnz);
                    let mut delims = vec![0u32];
                    for r in &rows {
                        columns.extend(r.iter().copied());
                        delims.push(columns.len() as u32);
                    }
                    let m = SparseMatrixCrs::new(values, columns, delims).unwrap();
                    (m, vec.clone())
                })
            })
        })
    }

    proptest! {
        #[test]
        fn crs_and_ell_agree((crs, vec) in arb_crs(), extra in 0usize..3) {
            let ell = SparseMatrixEll::from_crs(&crs, Some(crs.max_row_len() + extra)).unwrap();
            let a = spmv_crs(&crs, &vec).unwrap();
            let b = spmv_ell(&ell, &vec).unwrap();
            prop_assert!(verify(&a, &b));
            for (x, y) in a.iter().zip(&b) {
                prop_assert!((x - y).abs() <= EPSILON);
            }
        }

        #[test]
        fn padding_columns_do_not_matter((crs, vec) in arb_crs(), seed in any::<u64>()) {
            let ell = SparseMatrixEll::from_crs(&crs, Some(crs.max_row_len() + 2)).unwrap();
            let n = ell.n() as u64;
            let mut columns = ell.columns().to_vec();
            for (k, c) in columns.iter_mut().enumerate() {
                if ell.values()[k] == 0.0 {
                    *c = (seed.wrapping_add(k as u64 * 7919) % n) as u32;
                }
            }
            let shuffled =
                SparseMatrixEll::new(ell.n(), ell.row_width(), ell.values().to_vec(), columns)
                    .unwrap();
            prop_assert_eq!(spmv_ell(&ell, &vec).unwrap(), spmv_ell(&shuffled, &vec).unwrap());
        }

        #[test]
        fn parallel_rows_match_sequential_reference((crs, vec) in arb_crs()) {
            let out = spmv_crs(&crs, &vec).unwrap();
            for i in 0..crs.n() {
                let mut sum = 0.0;
                for (v, c) in crs.row(i) {
                    sum += v * vec[c as usize];
                }
                prop_assert_eq!(out[i].to_bits(), sum.to_bits());
            }
        }
    }
}
