use crate::error::Result;
use crate::sparse::{SparseFormat, SparseMatrix, SparseMatrixCrs, SparseMatrixEll};

/// CRS input file: values, columns, row delimiters, dense vector.
#[derive(Debug, Clone, PartialEq)]
pub struct CrsInput {
    pub values: Vec<f64>,
    pub columns: Vec<u32>,
    pub row_delimiters: Vec<u32>,
    pub vec: Vec<f64>,
}

/// ELL input file: N×L values, N×L columns, dense vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EllInput {
    pub values: Vec<f64>,
    pub columns: Vec<u32>,
    pub vec: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseInput {
    Crs(CrsInput),
    Ell(EllInput),
}

/// One benchmark case: input operands plus the reference output.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseData {
    pub input: CaseInput,
    pub reference: Vec<f64>,
}

impl CrsInput {
    pub fn from_matrix(m: &SparseMatrixCrs, vec: Vec<f64>) -> Self {
        Self {
            values: m.values().to_vec(),
            columns: m.columns().to_vec(),
            row_delimiters: m.row_delimiters().to_vec(),
            vec,
        }
    }
}

impl EllInput {
    pub fn from_matrix(m: &SparseMatrixEll, vec: Vec<f64>) -> Self {
        Self {
            values: m.values().to_vec(),
            columns: m.columns().to_vec(),
            vec,
        }
    }
}

impl CaseInput {
    pub fn from_operands(matrix: &SparseMatrix, vec: Vec<f64>) -> Self {
        match matrix {
            SparseMatrix::Crs(m) => Self::Crs(CrsInput::from_matrix(m, vec)),
            SparseMatrix::Ell(m) => Self::Ell(EllInput::from_matrix(m, vec)),
        }
    }

    pub fn format(&self) -> SparseFormat {
        match self {
            Self::Crs(_) => SparseFormat::Crs,
            Self::Ell(_) => SparseFormat::Ell,
        }
    }

    pub fn vec(&self) -> &[f64] {
        match self {
            Self::Crs(c) => &c.vec,
            Self::Ell(e) => &e.vec,
        }
    }

    /// Validate into a matrix plus the dense vector. N is the vector length
    /// for both layouts; L is the ELL slot count per row.
    pub fn into_operands(self) -> Result<(SparseMatrix, Vec<f64>)> {
        match self {
            Self::Crs(c) => {
                let m = SparseMatrixCrs::with_rows(
                    c.vec.len(),
                    c.values,
                    c.columns,
                    c.row_delimiters,
                )?;
                Ok((m.into(), c.vec))
            }
            Self::Ell(e) => {
                let n = e.vec.len();
                let row_width = ell_row_width(n, e.values.len())?;
                let m = SparseMatrixEll::new(n, row_width, e.values, e.columns)?;
                Ok((m.into(), e.vec))
            }
        }
    }
}

fn ell_row_width(n: usize, slots: usize) -> Result<usize> {
    if n == 0 {
        if slots == 0 {
            return Ok(0);
        }
        return Err(crate::error::SpmvError::malformed(format!(
            "ELL dataset has {slots} slots but an empty vector"
        )));
    }
    if slots % n != 0 {
        return Err(crate::error::SpmvError::malformed(format!(
            "ELL dataset has {slots} slots, not a multiple of N={n}"
        )));
    }
    Ok(slots / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpmvError;
    use crate::sparse::SparseOperand;

    #[test]
    fn ell_width_is_derived_from_vector_length() {
        let input = CaseInput::Ell(EllInput {
            values: vec![2.0, 0.0, 3.0, 1.0],
            columns: vec![0, 0, 1, 0],
            vec: vec![1.0, 2.0],
        });
        let (m, vec) = input.into_operands().unwrap();
        assert_eq!(m.launch_shape().row_width, 2);
        assert_eq!(m.multiply(&vec).unwrap(), vec![2.0, 7.0]);
    }

    #[test]
    fn ell_slots_must_divide_evenly() {
        let input = CaseInput::Ell(EllInput {
            values: vec![1.0; 3],
            columns: vec![0; 3],
            vec: vec![1.0, 2.0],
        });
        assert!(matches!(
            input.into_operands(),
            Err(SpmvError::MalformedMatrix(_))
        ));
    }

    #[test]
    fn crs_delimiter_count_must_match_vector() {
        let input = CaseInput::Crs(CrsInput {
            values: vec![2.0, 3.0, 1.0],
            columns: vec![0, 2, 1],
            row_delimiters: vec![0, 1, 3],
            vec: vec![1.0, 2.0, 3.0],
        });
        let err = input.into_operands().unwrap_err();
        assert!(matches!(err, SpmvError::MalformedMatrix(_)), "{err}");
        assert!(err.to_string().contains("N+1 = 4"));
    }

    #[test]
    fn crs_validation_runs() {
        let input = CaseInput::Crs(CrsInput {
            values: vec![1.0],
            columns: vec![5],
            row_delimiters: vec![0, 1],
            vec: vec![1.0],
        });
        assert!(matches!(
            input.into_operands(),
            Err(SpmvError::MalformedMatrix(_))
        ));
    }
}
