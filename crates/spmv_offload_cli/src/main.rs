use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::to_string_pretty;
use spmv_offload::gpu::GpuBackend;
use spmv_offload::harness::{StageTimings, compare};
use spmv_offload::io::{load_output, write_output};
use spmv_offload::offload::{GpuOffload, HostDevice, OffloadBackend, offload_spmv};
use spmv_offload::{
    BenchmarkHarness, DeviceSelection, EPSILON, HarnessConfig, SparseFormat, SparseMatrix,
    SparseMatrixCrs, SparseMatrixEll, SpmvError, verify,
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "spmv-offload",
    version,
    about = "CRS/ELL sparse matrix-vector multiply offload benchmark"
)]
struct Cli {
    /// wgpu backend used when --device gpu is selected
    #[arg(long, value_enum, default_value_t = BackendArg::Auto, global = true)]
    gpu_backend: BackendArg,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the selected device and emit a metrics JSON blob (stdout).
    Info {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Run one case directory (input.data + check.data) and verify it.
    RunCase {
        /// Case directory containing input.data and check.data
        #[arg(long)]
        case_dir: PathBuf,

        /// Layout of input.data
        #[arg(long, value_enum, default_value_t = FormatArg::Crs)]
        format: FormatArg,

        #[command(flatten)]
        device: DeviceArgs,

        /// Where to write the computed output (check.data layout)
        #[arg(long)]
        out_y: Option<PathBuf>,

        /// Where to write metrics.json; always printed to stdout as well
        #[arg(long)]
        out_metrics: Option<PathBuf>,
    },
    /// Compare two output files with the verification tolerance
    Compare {
        /// Reference output (check.data layout)
        #[arg(long)]
        reference: PathBuf,

        /// Produced output (check.data layout)
        #[arg(long)]
        computed: PathBuf,

        /// Show top-k worst indices
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Run the built-in CRS and ELL examples through the offload session.
    SelfTest {
        #[command(flatten)]
        device: DeviceArgs,
    },
}

#[derive(Args, Debug, Clone, Copy)]
struct DeviceArgs {
    /// Offload device
    #[arg(long, value_enum, default_value_t = DeviceArg::Host)]
    device: DeviceArg,

    /// Byte budget for host device buffers
    #[arg(long)]
    host_memory_limit: Option<u64>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceArg {
    Host,
    Gpu,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum BackendArg {
    Auto,
    Vulkan,
    Dx12,
    Metal,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum FormatArg {
    Crs,
    Ell,
}

impl From<BackendArg> for GpuBackend {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Auto => GpuBackend::Auto,
            BackendArg::Vulkan => GpuBackend::Vulkan,
            BackendArg::Dx12 => GpuBackend::Dx12,
            BackendArg::Metal => GpuBackend::Metal,
        }
    }
}

impl From<FormatArg> for SparseFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Crs => SparseFormat::Crs,
            FormatArg::Ell => SparseFormat::Ell,
        }
    }
}

impl DeviceArgs {
    fn selection(self, backend: BackendArg) -> DeviceSelection {
        match self.device {
            DeviceArg::Host => DeviceSelection::Host {
                memory_limit: self.host_memory_limit,
            },
            DeviceArg::Gpu => DeviceSelection::Gpu {
                backend: backend.into(),
            },
        }
    }
}

#[derive(Serialize)]
struct Metrics {
    run_id: String,
    command: String,
    device: DeviceMetrics,
    build: BuildMetrics,
}

#[derive(Serialize)]
struct DeviceMetrics {
    selection: String,
    description: String,
}

#[derive(Serialize)]
struct BuildMetrics {
    crate_version: String,
    git_rev: Option<String>,
}

#[derive(Serialize)]
struct RunMetrics {
    run_id: String,
    command: String,

    case_dir: String,
    format: String,
    n: usize,
    /// Stored entries for CRS, nonzero-valued slots for ELL.
    nnz: usize,
    row_width: usize,
    epsilon: f64,

    passed: bool,
    max_abs_err: f64,
    over_tolerance: usize,

    timings_ms: TimingsMs,

    device: DeviceMetrics,
    build: BuildMetrics,
}

#[derive(Serialize)]
struct TimingsMs {
    total: f64,
    load_io: f64,
    device_init: f64,
    stage: f64,
    dispatch: f64,
    complete: f64,
    retrieve: f64,
    verify: f64,
}

impl From<StageTimings> for TimingsMs {
    fn from(t: StageTimings) -> Self {
        let ms = |d: Duration| d.as_secs_f64() * 1e3;
        Self {
            total: ms(t.total),
            load_io: ms(t.load),
            device_init: ms(t.device_init),
            stage: ms(t.stage),
            dispatch: ms(t.dispatch),
            complete: ms(t.complete),
            retrieve: ms(t.retrieve),
            verify: ms(t.verify),
        }
    }
}

fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown-time".to_string())
}

fn build_metrics() -> BuildMetrics {
    BuildMetrics {
        crate_version: env!("CARGO_PKG_VERSION").to_string(),
        git_rev: option_env!("GIT_REV").map(|s| s.to_string()),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    to_string_pretty(value).map_err(|e| format!("serialize metrics: {e}"))
}

fn write_json(path: &Path, json: &str) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("create_dir_all {}: {e}", parent.display()))?;
    }

    fs::write(path, json).map_err(|e| format!("write {}: {e}", path.display()))
}

fn run_info(selection: DeviceSelection) -> Result<(), SpmvError> {
    let description = match selection {
        DeviceSelection::Host { memory_limit } => match memory_limit {
            Some(bytes) => HostDevice::with_memory_limit(bytes).describe(),
            None => HostDevice::new().describe(),
        },
        DeviceSelection::Gpu { backend } => GpuOffload::connect(backend)?.describe(),
    };

    // Human-readable first, JSON for scripts after it.
    println!("{description}");

    let metrics = Metrics {
        run_id: now_utc_rfc3339(),
        command: "info".to_string(),
        device: DeviceMetrics {
            selection: selection.to_string(),
            description,
        },
        build: build_metrics(),
    };
    match to_json(&metrics) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("{e}"),
    }
    Ok(())
}

/// Returns whether the case verified.
fn run_case(
    case_dir: &Path,
    config: HarnessConfig,
    out_y: Option<&Path>,
    out_metrics: Option<&Path>,
) -> Result<bool, String> {
    let harness = BenchmarkHarness::new(config);
    let outcome = harness.run(case_dir).map_err(|e| format!("{} failed: {e}", e.stage()))?;

    if let Some(path) = out_y {
        write_output(path, &outcome.computed).map_err(|e| e.to_string())?;
    }

    let stats = compare(&outcome.computed, &outcome.reference, 0);
    let metrics = RunMetrics {
        run_id: now_utc_rfc3339(),
        command: "run_case".to_string(),
        case_dir: case_dir.display().to_string(),
        format: outcome.format.to_string(),
        n: outcome.n,
        nnz: outcome.nnz,
        row_width: outcome.row_width,
        epsilon: EPSILON,
        passed: outcome.passed,
        max_abs_err: stats.max_abs_err,
        over_tolerance: stats.over_tolerance,
        timings_ms: outcome.timings.into(),
        device: DeviceMetrics {
            selection: config.device.to_string(),
            description: outcome.device.clone(),
        },
        build: build_metrics(),
    };

    let json = to_json(&metrics)?;
    if let Some(path) = out_metrics {
        write_json(path, &json)?;
    }
    println!("{json}");

    Ok(outcome.passed)
}

fn run_compare(reference_path: &Path, computed_path: &Path, top_k: usize) -> Result<bool, String> {
    let reference = load_output(reference_path).map_err(|e| e.to_string())?;
    let computed = load_output(computed_path).map_err(|e| e.to_string())?;

    if reference.len() != computed.len() {
        return Err(format!(
            "Length mismatch: reference len {} vs computed len {}",
            reference.len(),
            computed.len()
        ));
    }

    let stats = compare(&computed, &reference, top_k);
    let pass = verify(&computed, &reference);

    println!("Compare:");
    println!("  n              : {}", stats.n);
    println!("  epsilon (abs)  : {EPSILON:.3e}");
    println!("  max_abs_err    : {:.9e}", stats.max_abs_err);
    println!("  over_tolerance : {}", stats.over_tolerance);
    println!("  pass           : {pass}");

    if !stats.worst.is_empty() {
        println!("\nTop {} worst entries (by abs error):", stats.worst.len());
        for w in &stats.worst {
            println!(
                "  i={:<8} reference={:.9e}  computed={:.9e}  abs={:.9e}",
                w.i, w.reference, w.computed, w.abs_err
            );
        }
    }

    Ok(pass)
}

fn self_test_on<B: OffloadBackend>(backend: &B) -> Result<bool, SpmvError> {
    let crs = SparseMatrixCrs::new(vec![2.0, 3.0, 1.0, 4.0], vec![0, 2, 1, 0], vec![0, 1, 3, 4])?;
    let ell = SparseMatrixEll::new(2, 2, vec![2.0, 0.0, 3.0, 1.0], vec![0, 0, 1, 0])?;

    let cases: [(&str, SparseMatrix, Vec<f64>, Vec<f64>); 3] = [
        ("crs", crs.clone().into(), vec![1.0, 2.0, 3.0], vec![2.0, 11.0, 4.0]),
        ("ell", ell.into(), vec![1.0, 2.0], vec![2.0, 7.0]),
        (
            "crs-as-ell",
            SparseMatrixEll::from_crs(&crs, None)?.into(),
            vec![1.0, 2.0, 3.0],
            vec![2.0, 11.0, 4.0],
        ),
    ];

    let mut all_ok = true;
    for (name, matrix, vec, expected) in &cases {
        let got = offload_spmv(backend, matrix, vec)?;
        let ok = verify(&got, expected);
        if ok {
            println!("SelfTest {name} OK: y == {got:?}");
        } else {
            println!("SelfTest {name} FAILED: y == {got:?}, expected {expected:?}");
        }
        all_ok &= ok;
    }
    Ok(all_ok)
}

fn run_self_test(selection: DeviceSelection) -> Result<bool, SpmvError> {
    match selection {
        DeviceSelection::Host { memory_limit } => {
            let dev = match memory_limit {
                Some(bytes) => HostDevice::with_memory_limit(bytes),
                None => HostDevice::new(),
            };
            info!(device = %dev.describe(), "self-test");
            self_test_on(&dev)
        }
        DeviceSelection::Gpu { backend } => {
            let dev = GpuOffload::connect(backend)?;
            info!(device = %dev.describe(), "self-test");
            self_test_on(&dev)
        }
    }
}

fn exit_on(result: Result<bool, String>) -> ! {
    match result {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{e}");
            process::exit(2);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match cli.cmd {
        Cmd::Info { device } => {
            if let Err(e) = run_info(device.selection(cli.gpu_backend)) {
                eprintln!("Failed to init device: {e}");
                process::exit(2);
            }
        }
        Cmd::RunCase {
            case_dir,
            format,
            device,
            out_y,
            out_metrics,
        } => {
            let config = HarnessConfig {
                format: format.into(),
                device: device.selection(cli.gpu_backend),
            };
            exit_on(run_case(
                &case_dir,
                config,
                out_y.as_deref(),
                out_metrics.as_deref(),
            ));
        }
        Cmd::Compare {
            reference,
            computed,
            top_k,
        } => exit_on(run_compare(&reference, &computed, top_k)),
        Cmd::SelfTest { device } => exit_on(
            run_self_test(device.selection(cli.gpu_backend)).map_err(|e| e.to_string()),
        ),
    }
}
