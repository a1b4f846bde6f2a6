// ========================================================================================
//
//                              THE ROWCORR COMMAND LINE
//
// ========================================================================================
//
// Correlates every row of a matrix file (or the rows picked by ROI masks) against every
// row, writing the result as a new matrix file with a layout sidecar describing its rows.
//
// Settings come from an optional TOML config file; flags given on the command line win.

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rowcorr::config::ConfigError;
use rowcorr::io::{
    MappedMatrix, MatrixFileWriter, MatrixIoError, load_surface_mask, load_volume_mask,
    write_layout,
};
use rowcorr::{
    CorrelationEngine, CorrelationError, CorrelationOptions, CorrelationProgressObserver,
    CorrelationStage, MatrixSource, RoiSelectors, RunConfig, ValidationError,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use thiserror::Error;

/// Structure names the surface ROI flags map to.
const LEFT_CORTEX: &str = "CORTEX_LEFT";
const RIGHT_CORTEX: &str = "CORTEX_RIGHT";
const CEREBELLUM: &str = "CEREBELLUM";

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "rowcorr",
    version,
    about = "Correlate every row of a large matrix against every other row, out of core."
)]
struct Args {
    /// Input matrix file (.rcm). A `<input>.layout.toml` next to it is picked up
    /// automatically.
    input: PathBuf,

    /// Output matrix file to create.
    output: PathBuf,

    /// Text file of one non-negative weight per column.
    #[arg(long, value_name = "FILE")]
    weights: Option<PathBuf>,

    /// Apply the Fisher small-z transform (atanh) to every correlation.
    #[arg(long)]
    fisher_z: bool,

    /// Restrict memory usage to roughly this many gigabytes.
    #[arg(long, value_name = "GB")]
    mem_limit: Option<f64>,

    /// Number of worker threads (default: ROWCORR_THREADS, then all CPUs).
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// TOML file with default settings.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Load the whole input into memory before computing.
    #[arg(long)]
    in_memory: bool,

    /// Surface mask selecting rows of the left cortex.
    #[arg(long, value_name = "FILE")]
    left_roi: Option<PathBuf>,

    /// Surface mask selecting rows of the right cortex.
    #[arg(long, value_name = "FILE")]
    right_roi: Option<PathBuf>,

    /// Surface mask selecting rows of the cerebellum.
    #[arg(long, value_name = "FILE")]
    cereb_roi: Option<PathBuf>,

    /// Volume mask (TOML) selecting voxel rows.
    #[arg(long, value_name = "FILE")]
    vol_roi: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Matrix(#[from] MatrixIoError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error("output '{}' is the input matrix; choose a different output path", .0.display())]
    OutputIsInput(PathBuf),
}

impl AppError {
    fn exit_code(&self) -> i32 {
        let invalid = match self {
            Self::Validation(_) | Self::OutputIsInput(_) => true,
            Self::Config(ConfigError::Validation(_)) => true,
            Self::Correlation(err) => err.is_validation(),
            Self::Config(_) | Self::Matrix(_) => false,
        };
        if invalid { 2 } else { 1 }
    }
}

// ========================================================================================
//                                  PROGRESS REPORTING
// ========================================================================================

/// Draws an indicatif bar per stage, only when stderr is a terminal.
#[derive(Default)]
struct TerminalProgress {
    bar: Option<ProgressBar>,
}

impl CorrelationProgressObserver for TerminalProgress {
    fn on_stage_start(&mut self, stage: CorrelationStage, total_rows: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total_rows as u64), draw_target);
        let style = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_message(stage.describe());
        self.bar = Some(bar);
    }

    fn on_stage_advance(&mut self, _stage: CorrelationStage, processed_rows: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(processed_rows as u64);
        }
    }

    fn on_stage_finish(&mut self, _stage: CorrelationStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

// ========================================================================================
//                           THE MAIN ORCHESTRATION LOGIC
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let start_time = Instant::now();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
    log::info!("finished in {:.2?}", start_time.elapsed());
}

fn run(args: Args) -> Result<(), AppError> {
    let options = resolve_options(&args)?;
    let selectors = load_selectors(&args)?;
    if refers_to_same_file(&args.input, &args.output) {
        return Err(AppError::OutputIsInput(args.output));
    }

    let input = MappedMatrix::open(&args.input)?;
    log::info!(
        "input {} has {} rows of {} columns",
        args.input.display(),
        input.n_rows(),
        input.n_cols()
    );
    if args.in_memory {
        let dense = input.load_into_memory()?;
        correlate_into(dense, &options, selectors.as_ref(), &args.output)
    } else {
        correlate_into(input, &options, selectors.as_ref(), &args.output)
    }
}

/// Config file first, then command-line overrides.
fn resolve_options(args: &Args) -> Result<CorrelationOptions, AppError> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    config.fisher_z |= args.fisher_z;
    if args.mem_limit.is_some() {
        config.memory_limit_gb = args.mem_limit;
    }
    if args.weights.is_some() {
        config.weights_file = args.weights.clone();
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    Ok(config.into_options()?)
}

/// The output is created by truncating its path, which must not be the mapped input.
fn refers_to_same_file(input: &Path, output: &Path) -> bool {
    match (input.canonicalize(), canonical_target(output)) {
        (Ok(input), Some(output)) => input == output,
        _ => input == output,
    }
}

/// Canonical form of a path that may not exist yet.
fn canonical_target(path: &Path) -> Option<PathBuf> {
    if let Ok(existing) = path.canonicalize() {
        return Some(existing);
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Some(parent.canonicalize().ok()?.join(path.file_name()?))
}

/// `None` unless at least one ROI flag was given.
fn load_selectors(args: &Args) -> Result<Option<RoiSelectors>, ValidationError> {
    let mut selectors = RoiSelectors::default();
    for (structure, path) in [
        (LEFT_CORTEX, &args.left_roi),
        (RIGHT_CORTEX, &args.right_roi),
        (CEREBELLUM, &args.cereb_roi),
    ] {
        if let Some(path) = path {
            selectors = selectors.with_surface(structure, load_surface_mask(path)?);
        }
    }
    if let Some(path) = &args.vol_roi {
        selectors = selectors.with_volume(load_volume_mask(path)?);
    }
    Ok((!selectors.is_empty()).then_some(selectors))
}

fn correlate_into<S>(
    source: S,
    options: &CorrelationOptions,
    selectors: Option<&RoiSelectors>,
    output: &Path,
) -> Result<(), AppError>
where
    S: MatrixSource + Send,
{
    let mut engine = match selectors {
        Some(selectors) => CorrelationEngine::with_roi(source, options, selectors)?,
        None => CorrelationEngine::new(source, options)?,
    };
    let (rows, cols) = engine.output_shape();
    log::info!(
        "writing {} x {} output with {} workers",
        rows,
        cols,
        engine.worker_count()
    );

    let mut writer = MatrixFileWriter::create(output, rows, cols)?;
    engine.run(&mut writer, &mut TerminalProgress::default())?;
    writer.finish()?;
    if let Some(layout) = engine.output_layout() {
        write_layout(output, layout)?;
    }
    Ok(())
}
