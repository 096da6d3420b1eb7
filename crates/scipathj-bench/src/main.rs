//! scipathj-bench: CLI tool for per-image pipeline parameter
//! experimentation and diagnostics.
//!
//! Runs color deconvolution, vessel segmentation, nucleus detection,
//! and cell construction on a single image with a configurable
//! [`scipathj_types::Config`], printing per-stage timing. Modeled on
//! `mujou-bench`'s `Cli`/`print_multi_run_summary` shape, generalized
//! from its single fixed pipeline to this crate's six configurable
//! stages.
//!
//! No nucleus-detection neural network ships with this repository (out
//! of scope, per the [`scipathj_core::NucleusDetector`] collaborator
//! contract); this tool always runs with a `NullNucleusDetector` that
//! reports zero nuclei, so the nucleus/cytoplasm/cell stage timings
//! shown here reflect construction over an empty nucleus set, not a
//! real detector's cost.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use scipathj_core::{CoreError, DetectedNucleus, DetectorError, NucleusDetector};
use scipathj_orchestrator::{FileSystemImageReader, ImageReader};
use scipathj_types::Config;
use serde::Serialize;

/// Per-image pipeline parameter experimentation and diagnostics for
/// SciPathJ.
#[derive(Parser)]
#[command(name = "scipathj-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP, TIFF).
    image_path: PathBuf,

    /// Optional TOML settings file; defaults to every stage's built-in
    /// defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the vessel segmentation threshold.
    #[arg(long)]
    vessel_threshold: Option<f64>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1)]
    runs: usize,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

struct NullNucleusDetector;

impl NucleusDetector for NullNucleusDetector {
    fn detect(&self, _image: &scipathj_types::Image) -> Result<Vec<DetectedNucleus>, DetectorError> {
        Ok(Vec::new())
    }
}

/// `std::time::Duration` does not implement serde's `Serialize`;
/// durations are serialized as fractional milliseconds (`f64`) instead,
/// matching `mujou_pipeline::diagnostics`'s own duration-as-secs
/// convention generalized to milliseconds (this tool's reports are all
/// sub-second).
mod duration_as_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
    }
}

#[derive(Debug, Serialize)]
struct StageDiagnostics {
    #[serde(with = "duration_as_millis")]
    decode: Duration,
    #[serde(with = "duration_as_millis")]
    deconvolution: Duration,
    #[serde(with = "duration_as_millis")]
    vessel_segmentation: Duration,
    #[serde(with = "duration_as_millis")]
    nucleus_detection: Duration,
    #[serde(with = "duration_as_millis")]
    cell_construction: Duration,
    #[serde(with = "duration_as_millis")]
    total: Duration,
    vessel_count: usize,
    nucleus_count: usize,
    cell_count: usize,
}

fn run_once(image_path: &std::path::Path, config: &Config) -> Result<StageDiagnostics, String> {
    let total_start = Instant::now();

    let decode_start = Instant::now();
    let image = FileSystemImageReader.read(image_path).map_err(|e| e.to_string())?;
    let decode = decode_start.elapsed();

    let deconv_start = Instant::now();
    let od = scipathj_core::deconvolve(&image, &config.color_deconvolution).map_err(core_error_string)?;
    let deconvolution = deconv_start.elapsed();

    let vessel_start = Instant::now();
    let vessels = scipathj_core::segment(&od, &config.vessel_segmentation).map_err(core_error_string)?;
    let vessel_segmentation = vessel_start.elapsed();

    let nucleus_start = Instant::now();
    let nuclei = scipathj_core::detect_nuclei(&NullNucleusDetector, &image, &config.nuclear_segmentation);
    let nucleus_detection = nucleus_start.elapsed();

    let vessel_polygons: Vec<_> = vessels.iter().map(|v| v.polygon.clone()).collect();
    let cell_start = Instant::now();
    let construction = scipathj_core::construct(&nuclei, &vessel_polygons, image.dimensions(), &config.cytoplasm_segmentation)
        .map_err(core_error_string)?;
    let cell_construction = cell_start.elapsed();

    Ok(StageDiagnostics {
        decode,
        deconvolution,
        vessel_segmentation,
        nucleus_detection,
        cell_construction,
        total: total_start.elapsed(),
        vessel_count: vessels.len(),
        nucleus_count: nuclei.len(),
        cell_count: construction.cells.len(),
    })
}

fn core_error_string(err: CoreError) -> String {
    err.to_string()
}

fn report(diagnostics: &StageDiagnostics) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<24} {:>10.3}ms\n", "Decode", diagnostics.decode.as_secs_f64() * 1000.0));
    out.push_str(&format!("{:<24} {:>10.3}ms\n", "Deconvolution", diagnostics.deconvolution.as_secs_f64() * 1000.0));
    out.push_str(&format!(
        "{:<24} {:>10.3}ms  ({} vessels)\n",
        "Vessel segmentation",
        diagnostics.vessel_segmentation.as_secs_f64() * 1000.0,
        diagnostics.vessel_count
    ));
    out.push_str(&format!(
        "{:<24} {:>10.3}ms  ({} nuclei)\n",
        "Nucleus detection",
        diagnostics.nucleus_detection.as_secs_f64() * 1000.0,
        diagnostics.nucleus_count
    ));
    out.push_str(&format!(
        "{:<24} {:>10.3}ms  ({} cells)\n",
        "Cell construction",
        diagnostics.cell_construction.as_secs_f64() * 1000.0,
        diagnostics.cell_count
    ));
    out.push_str(&format!("{:<24} {:>10.3}ms\n", "Total", diagnostics.total.as_secs_f64() * 1000.0));
    out
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.runs == 0 {
        eprintln!("Error: --runs must be at least 1");
        return ExitCode::FAILURE;
    }

    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    if let Some(threshold) = cli.vessel_threshold {
        config.vessel_segmentation.threshold = threshold;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {e}");
        return ExitCode::FAILURE;
    }

    eprintln!("Image: {}", cli.image_path.display());
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);
    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match run_once(&cli.image_path, &config) {
            Ok(diagnostics) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", report(&diagnostics));
                }
                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[StageDiagnostics]) {
    println!();
    println!("Summary ({} runs)\n{}", all_diagnostics.len(), "=".repeat(60));

    let totals: Vec<f64> = all_diagnostics.iter().map(|d| d.total.as_secs_f64() * 1000.0).collect();
    let min = totals.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = totals.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = totals.iter().sum::<f64>() / totals.len() as f64;
    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");
}
