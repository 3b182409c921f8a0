use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use tracing::debug;

use super::data_format::{CaseData, CaseInput, CrsInput, EllInput};
use super::sections::{SectionCursor, SectionWriter};
use crate::error::{Result, SpmvError};
use crate::sparse::SparseFormat;

pub const INPUT_FILE: &str = "input.data";
pub const CHECK_FILE: &str = "check.data";

/// Reads `input.data` in the layout `format` implies, plus `check.data`.
pub fn load_case_dir(case_dir: &Path, format: SparseFormat) -> Result<CaseData> {
    let input_path = case_dir.join(INPUT_FILE);
    let input = match format {
        SparseFormat::Crs => CaseInput::Crs(load_crs_input(&input_path)?),
        SparseFormat::Ell => CaseInput::Ell(load_ell_input(&input_path)?),
    };
    let reference = load_output(&case_dir.join(CHECK_FILE))?;

    debug!(
        dir = %case_dir.display(),
        %format,
        n = input.vec().len(),
        reference = reference.len(),
        "case loaded"
    );
    Ok(CaseData { input, reference })
}

pub fn load_crs_input(path: &Path) -> Result<CrsInput> {
    let text = read_text(path)?;
    let mut cur = SectionCursor::new(path, &text);

    let values = cur.read_f64s("values")?;
    let columns = cur.read_indices("columns")?;
    let row_delimiters = cur.read_indices("row_delimiters")?;
    let vec = cur.read_f64s("vec")?;
    cur.finish()?;

    Ok(CrsInput {
        values,
        columns,
        row_delimiters,
        vec,
    })
}

/// Three sections: N×L values, N×L columns, the N-long vector. L is not
/// recorded in the file; it falls out of the section lengths later.
pub fn load_ell_input(path: &Path) -> Result<EllInput> {
    let text = read_text(path)?;
    let mut cur = SectionCursor::new(path, &text);

    let values = cur.read_f64s("values")?;
    let columns = cur.read_indices("columns")?;
    let vec = cur.read_f64s("vec")?;
    cur.finish()?;

    if values.len() != columns.len() {
        return Err(SpmvError::Dataset {
            path: path.to_path_buf(),
            reason: format!(
                "values has {} entries, columns has {}",
                values.len(),
                columns.len()
            ),
        });
    }

    Ok(EllInput {
        values,
        columns,
        vec,
    })
}

pub fn load_output(path: &Path) -> Result<Vec<f64>> {
    let text = read_text(path)?;
    let mut cur = SectionCursor::new(path, &text);
    let out = cur.read_f64s("out")?;
    cur.finish()?;
    Ok(out)
}

pub fn write_crs_input(path: &Path, input: &CrsInput) -> Result<()> {
    let mut w = create(path)?;
    w.section(&input.values)?;
    w.section(&input.columns)?;
    w.section(&input.row_delimiters)?;
    w.section(&input.vec)?;
    w.finish()?;
    Ok(())
}

pub fn write_ell_input(path: &Path, input: &EllInput) -> Result<()> {
    let mut w = create(path)?;
    w.section(&input.values)?;
    w.section(&input.columns)?;
    w.section(&input.vec)?;
    w.finish()?;
    Ok(())
}

pub fn write_case_input(path: &Path, input: &CaseInput) -> Result<()> {
    match input {
        CaseInput::Crs(c) => write_crs_input(path, c),
        CaseInput::Ell(e) => write_ell_input(path, e),
    }
}

pub fn write_output(path: &Path, out: &[f64]) -> Result<()> {
    let mut w = create(path)?;
    w.section(out)?;
    w.finish()?;
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| SpmvError::Dataset {
        path: path.to_path_buf(),
        reason: format!("failed to read: {e}"),
    })
}

fn create(path: &Path) -> Result<SectionWriter<BufWriter<File>>> {
    Ok(SectionWriter::new(BufWriter::new(File::create(path)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crs_input() -> CrsInput {
        CrsInput {
            values: vec![2.0, 3.0, 1.0, 4.0],
            columns: vec![0, 2, 1, 0],
            row_delimiters: vec![0, 1, 3, 4],
            vec: vec![1.0, 2.0, 3.0],
        }
    }

    #[test]
    fn crs_case_dir_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write_crs_input(&dir.path().join(INPUT_FILE), &crs_input()).unwrap();
        write_output(&dir.path().join(CHECK_FILE), &[2.0, 11.0, 4.0]).unwrap();

        let case = load_case_dir(dir.path(), SparseFormat::Crs).unwrap();
        assert_eq!(case.input, CaseInput::Crs(crs_input()));
        assert_eq!(case.reference, vec![2.0, 11.0, 4.0]);
    }

    #[test]
    fn ell_layout_has_three_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INPUT_FILE);
        let ell = EllInput {
            values: vec![2.0, 0.0, 3.0, 1.0],
            columns: vec![0, 0, 1, 0],
            vec: vec![1.0, 2.0],
        };
        write_ell_input(&path, &ell).unwrap();
        assert_eq!(load_ell_input(&path).unwrap(), ell);

        // The same file is one section short of a CRS input.
        let err = load_crs_input(&path).unwrap_err();
        assert!(matches!(err, SpmvError::Dataset { .. }), "{err}");
    }

    #[test]
    fn reads_hand_written_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECK_FILE);
        fs::write(&path, "%% Section 1\n2.0\n1.1e1\n4\n").unwrap();
        assert_eq!(load_output(&path).unwrap(), vec![2.0, 11.0, 4.0]);
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_case_dir(dir.path(), SparseFormat::Ell).unwrap_err();
        match err {
            SpmvError::Dataset { path, .. } => assert!(path.ends_with(INPUT_FILE)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ell_values_and_columns_must_pair_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INPUT_FILE);
        fs::write(&path, "%%\n1.0\n2.0\n%%\n0\n%%\n1.0\n").unwrap();
        assert!(matches!(
            load_ell_input(&path),
            Err(SpmvError::Dataset { .. })
        ));
    }
}
