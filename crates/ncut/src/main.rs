//! ncut: segment a 2D histogram with recursive normalized graph cuts.
//!
//! Loads a 2D `.npy` histogram, log-scales the counts with
//! `log10(count + 1)`, and segments it once for every maximum recursion
//! depth `0..=max_rec`. The resulting `(rows, cols, max_rec + 1)` `u32`
//! mask stack is saved next to the input as
//! `<basename>_ncut_sp<nr_sup_pix>_c<compactness>.npy`.
//!
//! Optional previews:
//!
//! - `--png` writes the log-scaled histogram, the superpixel partition
//!   and the deepest mask
//! - `--gif` writes an animation cycling through every depth
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin ncut -- [OPTIONS] <FILENAME>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use ncut_export::LabelPalette;
use ncut_pipeline::SegmentationConfig;
use ncut_pipeline::diagnostics::Clock;

/// Normalized graph-cut segmentation of 2D histograms.
///
/// Segments the histogram at every recursion depth up to `--max-rec`
/// and saves the stacked label masks as `.npy`.
#[derive(Parser)]
#[command(name = "ncut", version)]
struct Cli {
    /// Path to the input `.npy` histogram (2D, any numeric dtype).
    filename: PathBuf,

    /// Approximate number of superpixels.
    #[arg(long, default_value_t = SegmentationConfig::DEFAULT_NR_SUP_PIX)]
    nr_sup_pix: u32,

    /// SLIC compactness; higher values give more regular superpixels.
    #[arg(long, default_value_t = SegmentationConfig::DEFAULT_COMPACTNESS)]
    compactness: f64,

    /// Maximum normalized-cut recursion depth.
    #[arg(long, default_value_t = SegmentationConfig::DEFAULT_MAX_REC)]
    max_rec: u32,

    /// Affinity between identical regions (RAG self-edge weight).
    #[arg(long, default_value_t = SegmentationConfig::DEFAULT_MAX_EDGE)]
    max_edge: f64,

    /// Candidate thresholds evaluated per cut.
    #[arg(long, default_value_t = SegmentationConfig::DEFAULT_NUM_CUTS)]
    num_cuts: u32,

    /// Percentile above which values are clipped before 8-bit rescaling.
    #[arg(long, default_value_t = SegmentationConfig::DEFAULT_CLIP_PERCENTILE)]
    clip_percentile: f64,

    /// Largest normalized-cut cost at which a split is accepted.
    #[arg(long, default_value_t = SegmentationConfig::DEFAULT_THRESH)]
    thresh: f64,

    /// How RAG edge weights are computed.
    #[arg(long, value_enum, default_value_t = Weights::SimilarityAndProximity)]
    rag_mode: Weights,

    /// Which image the RAG mean colours come from.
    #[arg(long, value_enum, default_value_t = Source::Preprocessed)]
    rag_source: Source,

    /// Full segmentation config as a JSON string.
    ///
    /// When provided, all other segmentation parameter flags are ignored.
    /// The JSON must be a valid `SegmentationConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Directory for outputs. Defaults to the input's directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Also write `<stem>_hist.png`, `<stem>_source.png` and
    /// `<stem>_ncut.png` previews.
    #[arg(long)]
    png: bool,

    /// Also write `<stem>.gif`, cycling through every depth.
    #[arg(long)]
    gif: bool,

    /// Milliseconds each depth is shown in the GIF.
    #[arg(long, default_value_t = ncut_export::DEFAULT_FRAME_DELAY_MS)]
    frame_delay_ms: u32,

    /// Print diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

/// RAG edge-weight selection.
#[derive(Clone, Copy, ValueEnum)]
enum Weights {
    /// Euclidean distance between mean colours.
    Distance,
    /// Gaussian similarity of mean colours.
    Similarity,
    /// Colour similarity damped by centroid distance.
    SimilarityAndProximity,
}

/// RAG colour source selection.
#[derive(Clone, Copy, ValueEnum)]
enum Source {
    /// The clipped 8-bit image the superpixels were computed on.
    Preprocessed,
    /// The log-scaled histogram before clipping.
    LogScaled,
}

/// Build a [`SegmentationConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<SegmentationConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(SegmentationConfig {
        nr_sup_pix: cli.nr_sup_pix,
        compactness: cli.compactness,
        max_rec: cli.max_rec,
        max_edge: cli.max_edge,
        num_cuts: cli.num_cuts,
        clip_percentile: cli.clip_percentile,
        thresh: cli.thresh,
        rag_mode: match cli.rag_mode {
            Weights::Distance => ncut_pipeline::RagMode::Distance,
            Weights::Similarity => ncut_pipeline::RagMode::Similarity,
            Weights::SimilarityAndProximity => ncut_pipeline::RagMode::SimilarityAndProximity,
        },
        rag_source: match cli.rag_source {
            Source::Preprocessed => ncut_pipeline::RagSource::Preprocessed,
            Source::LogScaled => ncut_pipeline::RagSource::LogScaled,
        },
        ..SegmentationConfig::default()
    })
}

/// `path` with `suffix` appended to its file name.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn write_output(path: &Path, bytes: &[u8], what: &str) -> Result<(), String> {
    std::fs::write(path, bytes)
        .map_err(|e| format!("Error writing {what} to {}: {e}", path.display()))?;
    eprintln!("{what} written to {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;

    let npy_bytes = std::fs::read(&cli.filename)
        .map_err(|e| format!("Error reading {}: {e}", cli.filename.display()))?;
    let counts = ncut_export::decode_array2_f64(&npy_bytes)
        .map_err(|e| format!("Error decoding {}: {e}", cli.filename.display()))?;
    let (rows, cols) = counts.dim();
    eprintln!("Histogram: {} ({rows}x{cols})", cli.filename.display());
    eprintln!("Config: {config:#?}");
    eprintln!();

    let log_scaled = counts.mapv(|x| (x + 1.0).log10());
    let (staged, diagnostics) =
        ncut_pipeline::diagnostics::process_staged_with_diagnostics(&log_scaled, &config, &StdClock)
            .map_err(|e| format!("Pipeline error: {e}"))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&diagnostics)
            .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", diagnostics.report());
    }

    let stem = match cli.out_dir {
        Some(ref dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("Error creating {}: {e}", dir.display()))?;
            dir.join(ncut_export::output_file_name(
                &cli.filename,
                config.nr_sup_pix,
                config.compactness,
            ))
        }
        None => ncut_export::output_stem(&cli.filename, config.nr_sup_pix, config.compactness),
    };
    log::debug!("output stem {}", stem.display());

    let stack = ncut_export::encode_mask_stack(&staged.masks)
        .map_err(|e| format!("Error encoding mask stack: {e}"))?;
    write_output(&with_suffix(&stem, ".npy"), &stack, "Mask stack")?;

    if cli.png {
        let hist = ncut_export::render_grayscale(log_scaled.view())
            .and_then(ncut_export::encode_png)
            .map_err(|e| format!("Error rendering histogram: {e}"))?;
        write_output(&with_suffix(&stem, "_hist.png"), &hist, "Histogram PNG")?;

        let source = ncut_export::render_labels(
            staged.superpixels.as_array().view(),
            LabelPalette::Inferno,
        )
        .and_then(ncut_export::encode_png)
        .map_err(|e| format!("Error rendering superpixels: {e}"))?;
        write_output(&with_suffix(&stem, "_source.png"), &source, "Source PNG")?;

        let deepest = staged
            .final_mask()
            .ok_or_else(|| "Mask stack is empty".to_owned())?;
        let mask = ncut_export::render_labels(deepest, LabelPalette::Spectral)
            .and_then(ncut_export::encode_png)
            .map_err(|e| format!("Error rendering final mask: {e}"))?;
        write_output(&with_suffix(&stem, "_ncut.png"), &mask, "Ncut PNG")?;
    }

    if cli.gif {
        let gif = ncut_export::render_depth_frames(&staged.masks, LabelPalette::Flag)
            .and_then(|frames| ncut_export::encode_gif(&frames, cli.frame_delay_ms))
            .map_err(|e| format!("Error rendering animation: {e}"))?;
        write_output(&with_suffix(&stem, ".gif"), &gif, "Animation")?;
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_config() {
        let cli = Cli::parse_from(["ncut", "hist.npy"]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config, SegmentationConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "ncut",
            "hist.npy",
            "--nr-sup-pix",
            "200",
            "--compactness",
            "5",
            "--max-rec",
            "2",
            "--rag-source",
            "log-scaled",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.nr_sup_pix, 200);
        assert!((config.compactness - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.max_rec, 2);
        assert_eq!(config.rag_source, ncut_pipeline::RagSource::LogScaled);
    }

    #[test]
    fn config_json_wins_over_flags() {
        let json = serde_json::to_string(&SegmentationConfig {
            max_rec: 4,
            ..SegmentationConfig::default()
        })
        .unwrap();
        let cli = Cli::parse_from(["ncut", "hist.npy", "--max-rec", "1", "--config-json", &json]);
        assert_eq!(config_from_cli(&cli).unwrap().max_rec, 4);
    }

    #[test]
    fn bad_config_json_is_reported() {
        let cli = Cli::parse_from(["ncut", "hist.npy", "--config-json", "{"]);
        let err = config_from_cli(&cli).unwrap_err();
        assert!(err.starts_with("Error parsing --config-json"));
    }

    #[test]
    fn suffix_appends_to_file_name() {
        let path = with_suffix(Path::new("out/hist_ncut_sp10_c2pt0"), "_ncut.png");
        assert_eq!(path, PathBuf::from("out/hist_ncut_sp10_c2pt0_ncut.png"));
    }
}
