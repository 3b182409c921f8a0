//! Deterministic case generation.
//!
//! A fixed seed always yields the same matrix, vector and reference output,
//! so generated case directories can be regenerated instead of stored.

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::error::{Result, SpmvError};
use crate::io::{self, CaseInput};
use crate::sparse::{SparseFormat, SparseMatrix, SparseMatrixCrs, SparseMatrixEll, SparseOperand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub n: usize,
    /// Upper bound on nonzeros in a row; clamped to N.
    pub max_nnz_per_row: usize,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            n: 494,
            max_nnz_per_row: 10,
            seed: 1,
        }
    }
}

/// A generated matrix with its dense input vector.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCase {
    pub matrix: SparseMatrixCrs,
    pub vec: Vec<f64>,
}

/// Every row gets between 1 and `max_nnz_per_row` distinct columns in
/// ascending order. Values and the vector are uniform in `[-1, 1)`.
pub fn generate_crs(cfg: GeneratorConfig) -> Result<GeneratedCase> {
    let n = cfg.n;
    if u32::try_from(n).is_err() {
        return Err(SpmvError::malformed(format!(
            "N={n} does not fit 32-bit indices"
        )));
    }
    let max_row = cfg.max_nnz_per_row.min(n);
    if n > 0 && max_row == 0 {
        return Err(SpmvError::malformed(
            "max_nnz_per_row must be at least 1",
        ));
    }

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut values: Vec<f64> = Vec::new();
    let mut columns: Vec<u32> = Vec::new();
    let mut row_delimiters = Vec::with_capacity(n + 1);
    row_delimiters.push(0u32);

    for _ in 0..n {
        let k = rng.gen_range(1..=max_row);
        let mut cols = rand::seq::index::sample(&mut rng, n, k).into_vec();
        cols.sort_unstable();
        for c in cols {
            columns.push(c as u32);
            values.push(rng.gen_range(-1.0..1.0));
        }
        let end = u32::try_from(values.len())
            .map_err(|_| SpmvError::malformed("NNZ does not fit 32-bit indices"))?;
        row_delimiters.push(end);
    }
    let vec: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let matrix = SparseMatrixCrs::new(values, columns, row_delimiters)?;
    Ok(GeneratedCase { matrix, vec })
}

/// Writes `input.data` in `format` plus `check.data`, creating `dir` if
/// needed. Returns the staged matrix and the reference output it wrote.
pub fn write_case_dir(
    dir: &Path,
    format: SparseFormat,
    case: &GeneratedCase,
) -> Result<(SparseMatrix, Vec<f64>)> {
    let matrix: SparseMatrix = match format {
        SparseFormat::Crs => case.matrix.clone().into(),
        SparseFormat::Ell => SparseMatrixEll::from_crs(&case.matrix, None)?.into(),
    };
    let reference = matrix.multiply(&case.vec)?;

    fs::create_dir_all(dir)?;
    io::write_case_input(
        &dir.join(io::INPUT_FILE),
        &CaseInput::from_operands(&matrix, case.vec.clone()),
    )?;
    io::write_output(&dir.join(io::CHECK_FILE), &reference)?;

    info!(
        dir = %dir.display(),
        %format,
        n = matrix.n_rows(),
        stored = matrix.stored_len(),
        "case written"
    );
    Ok((matrix, reference))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(n: usize, max: usize, seed: u64) -> GeneratorConfig {
        GeneratorConfig {
            n,
            max_nnz_per_row: max,
            seed,
        }
    }

    #[test]
    fn same_seed_same_case() {
        let a = generate_crs(cfg(50, 6, 7)).unwrap();
        let b = generate_crs(cfg(50, 6, 7)).unwrap();
        let c = generate_crs(cfg(50, 6, 8)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rows_are_sorted_distinct_and_bounded() {
        let case = generate_crs(cfg(40, 5, 3)).unwrap();
        let m = &case.matrix;
        for i in 0..m.n() {
            let cols: Vec<u32> = m.row(i).map(|(_, c)| c).collect();
            assert!((1..=5).contains(&cols.len()));
            assert!(cols.windows(2).all(|w| w[0] < w[1]));
        }
        assert!(m.values().iter().all(|v| (-1.0..1.0).contains(v)));
        assert!(case.vec.iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn row_bound_is_clamped_to_n() {
        let case = generate_crs(cfg(3, 100, 1)).unwrap();
        assert!(case.matrix.max_row_len() <= 3);
    }

    #[test]
    fn zero_width_rows_are_rejected() {
        assert!(matches!(
            generate_crs(cfg(4, 0, 1)),
            Err(SpmvError::MalformedMatrix(_))
        ));
        let empty = generate_crs(cfg(0, 0, 1)).unwrap();
        assert_eq!(empty.matrix.n(), 0);
    }

    #[test]
    fn written_case_loads_back_for_both_formats() {
        let case = generate_crs(cfg(30, 4, 11)).unwrap();
        for format in [SparseFormat::Crs, SparseFormat::Ell] {
            let dir = tempfile::tempdir().unwrap();
            let (matrix, reference) = write_case_dir(dir.path(), format, &case).unwrap();

            let loaded = io::load_case_dir(dir.path(), format).unwrap();
            assert_eq!(loaded.reference, reference);
            let (m, vec) = loaded.input.into_operands().unwrap();
            assert_eq!(m, matrix);
            assert_eq!(vec, case.vec);
        }
    }
}
