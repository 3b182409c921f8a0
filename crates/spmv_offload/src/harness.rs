//! End-to-end benchmark driver and result verification.
//!
//! One run loads a case directory, offloads the multiply to the configured
//! device and checks the output against the stored reference with a fixed
//! absolute tolerance.

use std::cmp::Ordering;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{Result, SpmvError};
use crate::io::{self, CaseData};
use crate::offload::{DeviceOffloadSession, DeviceSelection, GpuOffload, HostDevice, OffloadBackend};
use crate::sparse::{SparseFormat, SparseMatrix, SparseOperand};

/// Absolute per-element tolerance of [`verify`].
pub const EPSILON: f64 = 1.0e-6;

/// True iff the lengths agree and every `|computed[i] - reference[i]| <= EPSILON`.
///
/// NaN or infinite entries never pass: the difference is NaN or infinite and
/// fails the bound.
pub fn verify(computed: &[f64], reference: &[f64]) -> bool {
    computed.len() == reference.len()
        && computed
            .iter()
            .zip(reference)
            .all(|(c, r)| (c - r).abs() <= EPSILON)
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorstEntry {
    pub i: usize,
    pub reference: f64,
    pub computed: f64,
    pub abs_err: f64,
}

/// Diagnostics for a failed (or passed) comparison. Not part of the
/// pass/fail decision.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareStats {
    /// Compared entries, the shorter of the two lengths.
    pub n: usize,
    pub max_abs_err: f64,
    /// Entries over `EPSILON` (NaN counts).
    pub over_tolerance: usize,
    /// Largest errors first, at most `top_k`.
    pub worst: Vec<WorstEntry>,
}

pub fn compare(computed: &[f64], reference: &[f64], top_k: usize) -> CompareStats {
    let n = reference.len().min(computed.len());
    let mut max_abs_err = 0.0f64;
    let mut over_tolerance = 0usize;
    let mut worst: Vec<WorstEntry> = Vec::with_capacity(top_k);

    for i in 0..n {
        let r = reference[i];
        let c = computed[i];
        // NaN sorts above every finite error under total_cmp.
        let abs_err = (c - r).abs();

        if abs_err.total_cmp(&max_abs_err) == Ordering::Greater {
            max_abs_err = abs_err;
        }
        if abs_err.is_nan() || abs_err > EPSILON {
            over_tolerance += 1;
        }

        if top_k == 0 {
            continue;
        }
        let entry = WorstEntry {
            i,
            reference: r,
            computed: c,
            abs_err,
        };
        if worst.len() < top_k {
            worst.push(entry);
        } else if let Some(last) = worst.last_mut()
            && abs_err.total_cmp(&last.abs_err) == Ordering::Greater
        {
            *last = entry;
        } else {
            continue;
        }
        worst.sort_by(|p, q| q.abs_err.total_cmp(&p.abs_err));
    }

    CompareStats {
        n,
        max_abs_err,
        over_tolerance,
        worst,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    pub format: SparseFormat,
    pub device: DeviceSelection,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            format: SparseFormat::Crs,
            device: DeviceSelection::default(),
        }
    }
}

/// Wall time spent in each part of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub load: Duration,
    pub device_init: Duration,
    pub stage: Duration,
    pub dispatch: Duration,
    pub complete: Duration,
    pub retrieve: Duration,
    pub verify: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub format: SparseFormat,
    pub n: usize,
    /// Stored entries for CRS; nonzero-valued slots for ELL.
    pub nnz: usize,
    /// ELL slots per row; zero for CRS.
    pub row_width: usize,
    pub device: String,
    pub computed: Vec<f64>,
    pub reference: Vec<f64>,
    pub passed: bool,
    pub timings: StageTimings,
}

#[derive(Debug, Clone, Default)]
pub struct BenchmarkHarness {
    config: HarnessConfig,
}

impl BenchmarkHarness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Load `case_dir`, bring up the configured device and run the case.
    pub fn run(&self, case_dir: &Path) -> Result<RunOutcome> {
        let t0 = Instant::now();
        let case = io::load_case_dir(case_dir, self.config.format)?;
        let load = t0.elapsed();

        let t_init = Instant::now();
        let mut outcome = match self.config.device {
            DeviceSelection::Host { memory_limit } => {
                let dev = match memory_limit {
                    Some(bytes) => HostDevice::with_memory_limit(bytes),
                    None => HostDevice::new(),
                };
                let device_init = t_init.elapsed();
                let mut outcome = self.run_case(&dev, case)?;
                outcome.timings.device_init = device_init;
                outcome
            }
            DeviceSelection::Gpu { backend } => {
                let dev = GpuOffload::connect(backend)?;
                let device_init = t_init.elapsed();
                let mut outcome = self.run_case(&dev, case)?;
                outcome.timings.device_init = device_init;
                outcome
            }
        };

        outcome.timings.load = load;
        outcome.timings.total = t0.elapsed();
        Ok(outcome)
    }

    /// Runs an already loaded case on `backend`. The case must be in the
    /// configured format.
    pub fn run_case<B: OffloadBackend>(&self, backend: &B, case: CaseData) -> Result<RunOutcome> {
        if case.input.format() != self.config.format {
            return Err(SpmvError::DispatchFailure(format!(
                "harness configured for {}, case is {}",
                self.config.format,
                case.input.format()
            )));
        }
        let reference = case.reference;
        let (matrix, vec) = case.input.into_operands()?;
        let n = matrix.n_rows();
        if reference.len() != n {
            return Err(SpmvError::DimensionMismatch {
                what: "reference output",
                expected: n,
                got: reference.len(),
            });
        }

        let mut timings = StageTimings::default();
        let session = DeviceOffloadSession::new(backend, self.config.format)?;

        let t = Instant::now();
        let staged = session.stage(&matrix, &vec)?;
        timings.stage = t.elapsed();

        let t = Instant::now();
        let dispatched = staged.dispatch()?;
        timings.dispatch = t.elapsed();

        let t = Instant::now();
        let completed = dispatched.await_completion()?;
        timings.complete = t.elapsed();

        let t = Instant::now();
        let computed = completed.retrieve()?;
        timings.retrieve = t.elapsed();

        let t = Instant::now();
        let passed = verify(&computed, &reference);
        timings.verify = t.elapsed();

        let (nnz, row_width) = match &matrix {
            SparseMatrix::Crs(m) => (m.nnz(), 0),
            SparseMatrix::Ell(m) => (m.nonzero_slots(), m.row_width()),
        };
        let device = backend.describe();
        if passed {
            info!(format = %self.config.format, n, nnz, %device, "verification passed");
        } else {
            let stats = compare(&computed, &reference, 1);
            warn!(
                format = %self.config.format,
                n,
                max_abs_err = stats.max_abs_err,
                over_tolerance = stats.over_tolerance,
                "verification failed"
            );
        }

        Ok(RunOutcome {
            format: self.config.format,
            n,
            nnz,
            row_width,
            device,
            computed,
            reference,
            passed,
            timings,
        })
    }
}
