use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use spmv_offload::generate::{GeneratorConfig, generate_crs, write_case_dir};
use spmv_offload::io::{CHECK_FILE, INPUT_FILE};
use spmv_offload::sparse::{SparseFormat, SparseOperand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spmv_offload_datagen")]
#[command(about = "Deterministic SpMV case generator (input.data + check.data)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate one case directory from a seed.
    Generate {
        /// Output directory to create files in.
        #[arg(long)]
        out_dir: PathBuf,

        /// Layout of input.data.
        #[arg(long, value_enum, default_value_t = FormatArg::Crs)]
        format: FormatArg,

        /// Matrix size N.
        #[arg(long, default_value_t = GeneratorConfig::default().n)]
        n: usize,

        /// Upper bound on nonzeros per row.
        #[arg(long, default_value_t = GeneratorConfig::default().max_nnz_per_row)]
        max_nnz_per_row: usize,

        #[arg(long, default_value_t = GeneratorConfig::default().seed)]
        seed: u64,

        /// Overwrite output directory if it exists.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum FormatArg {
    Crs,
    Ell,
}

impl From<FormatArg> for SparseFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Crs => SparseFormat::Crs,
            FormatArg::Ell => SparseFormat::Ell,
        }
    }
}

#[derive(Serialize)]
struct MetaJson {
    format: String,
    n: usize,
    nnz: usize,
    stored_len: usize,
    row_width: usize,
    max_nnz_per_row: usize,
    seed: u64,
    input_file: String,
    check_file: String,
}

fn main() -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Generate {
            out_dir,
            format,
            n,
            max_nnz_per_row,
            seed,
            force,
        } => {
            let cfg = GeneratorConfig {
                n,
                max_nnz_per_row,
                seed,
            };
            generate(&out_dir, format.into(), cfg, force)?;
            println!("Wrote case into {}", out_dir.display());
            Ok(())
        }
    }
}

fn generate(
    out_dir: &Path,
    format: SparseFormat,
    cfg: GeneratorConfig,
    force: bool,
) -> Result<(), String> {
    if out_dir.exists() {
        if !force {
            return Err(format!(
                "{} already exists (use --force to overwrite)",
                out_dir.display()
            ));
        }
        fs::remove_dir_all(out_dir)
            .map_err(|e| format!("remove_dir_all {}: {e}", out_dir.display()))?;
    }

    let case = generate_crs(cfg).map_err(|e| e.to_string())?;
    let (matrix, _reference) =
        write_case_dir(out_dir, format, &case).map_err(|e| e.to_string())?;

    let meta = MetaJson {
        format: format.to_string(),
        n: matrix.n_rows(),
        nnz: case.matrix.nnz(),
        stored_len: matrix.stored_len(),
        row_width: matrix.launch_shape().row_width,
        max_nnz_per_row: cfg.max_nnz_per_row,
        seed: cfg.seed,
        input_file: INPUT_FILE.to_string(),
        check_file: CHECK_FILE.to_string(),
    };
    let json = serde_json::to_string_pretty(&meta).map_err(|e| e.to_string())?;
    let meta_path = out_dir.join("meta.json");
    fs::write(&meta_path, json).map_err(|e| format!("write {}: {e}", meta_path.display()))?;
    info!(
        dir = %out_dir.display(),
        meta = %meta_path.display(),
        format = %format,
        n = meta.n,
        nnz = meta.nnz,
        seed = cfg.seed,
        "case written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spmv_offload::io::load_case_dir;

    fn small() -> GeneratorConfig {
        GeneratorConfig {
            n: 16,
            max_nnz_per_row: 4,
            seed: 7,
        }
    }

    #[test]
    fn generate_writes_case_and_meta() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("case");
        generate(&out, SparseFormat::Ell, small(), false).unwrap();

        let case = load_case_dir(&out, SparseFormat::Ell).unwrap();
        assert_eq!(case.reference.len(), 16);

        let meta: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("meta.json")).unwrap()).unwrap();
        assert_eq!(meta["format"], "ell");
        assert_eq!(meta["n"], 16);
        assert_eq!(meta["seed"], 7);
    }

    #[test]
    fn existing_dir_needs_force() {
        let tmp = tempfile::tempdir().unwrap();
        let err = generate(tmp.path(), SparseFormat::Crs, small(), false).unwrap_err();
        assert!(err.contains("--force"));

        generate(tmp.path(), SparseFormat::Crs, small(), true).unwrap();
        assert!(tmp.path().join(INPUT_FILE).exists());
        assert!(tmp.path().join(CHECK_FILE).exists());
    }
}
