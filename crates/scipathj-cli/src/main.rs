//! `scipathj`: batch histopathology image analysis composition root.
//!
//! Parses arguments, loads and validates a [`scipathj_types::Config`],
//! wires a [`scipathj_orchestrator::PipelineOrchestrator`] against every
//! image file in the input directory, drains its progress events to
//! `stdout`, then writes CSV reports and an ImageJ-compatible ROI
//! archive from the resulting [`scipathj_store::RoiStore`]. The "parse
//! args, build config, run, report progress, exit code reflects
//! outcome" shape follows the same composition-root pattern the other
//! standalone tools in this corpus use, generalized here from a flat
//! per-file loop to the full multi-stage analysis pipeline.
//!
//! No nucleus-detection neural network ships with this repository (out
//! of scope, per the [`scipathj_core::NucleusDetector`] collaborator
//! contract): this binary always runs with a detector that reports zero
//! nuclei, logging a warning so operators don't mistake an empty
//! nucleus/cytoplasm/cell output for a pipeline bug. A real detector is
//! wired in by replacing [`NullNucleusDetector`] at this composition
//! root.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use scipathj_core::{DetectedNucleus, DetectorError, NucleusDetector};
use scipathj_orchestrator::{CancellationToken, Event, FileSystemImageReader, PipelineOrchestrator};
use scipathj_store::{csv_export, roi_archive, CsvFormat, RoiStore};
use scipathj_types::Config;
use tracing_subscriber::EnvFilter;

/// Batch histopathology image analysis: H&E deconvolution, vessel and
/// nuclear segmentation, cell construction, feature extraction, and
/// classification over every image in a directory.
#[derive(Parser)]
#[command(name = "scipathj", version)]
struct Cli {
    /// Directory of input images (PNG, JPEG, BMP, TIFF, WebP).
    input_dir: PathBuf,

    /// Directory reports and the ROI archive are written into; created
    /// if missing.
    output_dir: PathBuf,

    /// Optional TOML settings file; built-in defaults otherwise.
    #[arg(long)]
    config: Option<PathBuf>,

    /// CSV locale: `us` (`,` separator, `.` decimal) or `eu` (`;`
    /// separator, `,` decimal).
    #[arg(long, value_enum, default_value_t = CsvLocale::Us)]
    format: CsvLocale,

    /// Increase log verbosity; repeatable (`-v`, `-vv`).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CsvLocale {
    Us,
    Eu,
}

impl From<CsvLocale> for CsvFormat {
    fn from(locale: CsvLocale) -> Self {
        match locale {
            CsvLocale::Us => Self::Us,
            CsvLocale::Eu => Self::Eu,
        }
    }
}

/// Stand-in for the out-of-scope nucleus-detection network: reports no
/// nuclei so the rest of the pipeline still runs end to end (vessels,
/// an empty cell population, CSV/archive export) against any input.
struct NullNucleusDetector;

impl NucleusDetector for NullNucleusDetector {
    fn detect(&self, _image: &scipathj_types::Image) -> Result<Vec<DetectedNucleus>, DetectorError> {
        Ok(Vec::new())
    }
}

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

fn collect_image_paths(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(input_dir)
        .with_context(|| format!("reading input directory {}", input_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(std::ffi::OsStr::to_str)
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "scipathj=info,scipathj_orchestrator=info,warn",
        1 => "scipathj=debug,scipathj_orchestrator=debug,info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    config.validate().context("invalid configuration")?;
    // Keep the worker count honest against the CLI's own reports: the
    // archive/CSV writers run single-threaded after the batch finishes,
    // so only pipeline stages benefit from this.
    tracing::info!(parallelism = config.batch.parallelism, "configuration loaded");

    let image_paths = collect_image_paths(&cli.input_dir)?;
    if image_paths.is_empty() {
        tracing::warn!(dir = %cli.input_dir.display(), "no recognized image files found");
    }
    tracing::warn!("no nucleus-detection network is wired in; nuclear/cytoplasm/cell output will be empty");

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("creating output directory {}", cli.output_dir.display()))?;

    let orchestrator = PipelineOrchestrator::new(FileSystemImageReader, Arc::new(NullNucleusDetector), None, config);
    let store = RoiStore::new();
    let cancellation = CancellationToken::new();
    let (events_tx, events_rx) = scipathj_orchestrator::subscribe();

    let orchestrator_handle = std::thread::scope(|scope| {
        let store_ref = &store;
        let cancellation_ref = &cancellation;
        let handle = scope.spawn(move || orchestrator.run(&image_paths, store_ref, cancellation_ref, &events_tx));

        for event in &events_rx {
            report_event(&event);
        }

        handle.join().expect("orchestrator worker thread panicked")
    });
    let report = orchestrator_handle;

    let format = CsvFormat::from(cli.format);
    let per_roi_path = cli.output_dir.join("rois.csv");
    let summary_path = cli.output_dir.join("summary.csv");
    let archive_path = cli.output_dir.join("rois.zip");

    csv_export::export_per_roi(&store, &per_roi_path, format, false, 6)
        .with_context(|| format!("writing {}", per_roi_path.display()))?;
    csv_export::export_per_image_summary(&store, &summary_path, format, false, 6)
        .with_context(|| format!("writing {}", summary_path.display()))?;

    let rois_by_image: Vec<(String, Vec<scipathj_types::Roi>)> =
        store.image_keys().into_iter().map(|key| (key.clone(), store.get_all(&key))).collect();
    roi_archive::export_archive(&archive_path, &rois_by_image).with_context(|| format!("writing {}", archive_path.display()))?;

    println!(
        "{} images: {} succeeded, {} failed, {} cancelled ({:.1}s)",
        report.total_images,
        report.succeeded,
        report.failed,
        report.cancelled,
        report.elapsed.as_secs_f64()
    );
    println!("Reports written to {}", cli.output_dir.display());

    if report.failed > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn report_event(event: &Event) {
    match event {
        Event::BatchStarted { total_images } => println!("Starting batch: {total_images} images"),
        Event::ImageStarted { image_key } => tracing::info!(image = %image_key, "started"),
        Event::ImageProgress { image_key, stage, fraction } => {
            tracing::debug!(image = %image_key, stage, fraction, "progress");
        }
        Event::ImageCompleted { image_key, roi_counts_by_category } => {
            println!("  {image_key}: {roi_counts_by_category:?}");
        }
        Event::ImageFailed { image_key, error_kind, message } => {
            tracing::warn!(image = %image_key, kind = %error_kind, %message, "image failed");
        }
        Event::BatchCompleted { .. } | Event::BatchCancelled => {}
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
