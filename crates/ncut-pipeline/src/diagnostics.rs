//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! Every stage of [`Pipeline`](crate::Pipeline) reports a
//! [`StageMetrics`] value; [`process_staged_with_diagnostics`] times each
//! stage with a caller-supplied [`Clock`] and collects the results into a
//! [`PipelineDiagnostics`].
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::pipeline::{Pipeline, PipelineStage};
use crate::types::{PipelineError, SegmentationConfig, StagedResult};

/// Source of timestamps for stage timing.
///
/// Keeps the library free of a hard dependency on a particular time
/// source; the CLI backs it with [`std::time::Instant`].
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: clip, rescale, replicate.
    pub preprocess: StageDiagnostics,
    /// Stage 2: superpixel segmentation.
    pub superpixels: StageDiagnostics,
    /// Stage 3: region adjacency graph.
    pub rag: StageDiagnostics,
    /// Stage 4: normalized cut for every depth.
    pub ncut: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Array preprocessing metrics.
    Preprocess {
        /// Image width in pixels (array columns).
        width: u32,
        /// Image height in pixels (array rows).
        height: u32,
        /// Clip percentile applied before rescaling.
        clip_percentile: f64,
        /// Pixels at the maximum intensity (255) after rescaling.
        saturated_pixel_count: u64,
    },
    /// Superpixel segmentation metrics.
    Superpixels {
        /// Which algorithm was used.
        algorithm: String,
        /// Requested superpixel count.
        target_count: u32,
        /// Compactness parameter.
        compactness: f64,
        /// Superpixels actually produced.
        superpixel_count: usize,
    },
    /// Region adjacency graph metrics.
    Rag {
        /// Edge weighting mode.
        mode: String,
        /// Image the mean colours came from.
        source: String,
        /// Number of nodes (superpixels).
        node_count: usize,
        /// Number of edges (adjacent pairs).
        edge_count: usize,
        /// Mean node degree.
        mean_degree: f64,
    },
    /// Normalized-cut metrics.
    Cut {
        /// Which backend was used.
        backend: String,
        /// Deepest recursion level computed.
        max_depth: u32,
        /// Candidate thresholds per bisection.
        num_cuts: u32,
        /// Distinct segments in each depth slice.
        segments_per_depth: Vec<usize>,
    },
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Number of superpixels.
    pub superpixel_count: usize,
    /// Number of RAG edges.
    pub rag_edge_count: usize,
    /// Number of depth slices in the mask stack.
    pub depth_count: usize,
    /// Distinct segments in the deepest slice.
    pub final_segment_count: usize,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Array: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Preprocess", &self.preprocess),
            ("Superpixels", &self.superpixels),
            ("Region Graph", &self.rag),
            ("Normalized Cut", &self.ncut),
        ];
        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Superpixels: {}  |  Depths: {}  |  Final segments: {}",
            self.summary.superpixel_count,
            self.summary.depth_count,
            self.summary.final_segment_count,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Preprocess {
            width,
            height,
            clip_percentile,
            saturated_pixel_count,
        } => {
            format!("{width}x{height} clip=p{clip_percentile} saturated={saturated_pixel_count}")
        }
        StageMetrics::Superpixels {
            algorithm,
            target_count,
            compactness,
            superpixel_count,
        } => {
            format!("{algorithm} target={target_count} c={compactness} -> {superpixel_count}")
        }
        StageMetrics::Rag {
            mode,
            source,
            node_count,
            edge_count,
            mean_degree,
        } => {
            format!(
                "{mode} from {source}: {node_count} nodes, {edge_count} edges (deg {mean_degree:.1})",
            )
        }
        StageMetrics::Cut {
            backend,
            max_depth,
            num_cuts,
            segments_per_depth,
        } => {
            format!("{backend} depth<={max_depth} cuts={num_cuts} segments={segments_per_depth:?}")
        }
    }
}

/// Time one stage transition and capture its metrics.
fn measure<C: Clock, S: PipelineStage>(
    clock: &C,
    advance: impl FnOnce() -> Result<S, PipelineError>,
) -> Result<(S, StageDiagnostics), PipelineError> {
    let start = clock.now();
    let stage = advance()?;
    let duration = clock.elapsed(&start);
    let metrics = stage.metrics().ok_or_else(|| {
        PipelineError::Computation(format!("stage {} reported no metrics", S::NAME))
    })?;
    Ok((stage, StageDiagnostics { duration, metrics }))
}

/// Run the full pipeline, timing every stage.
///
/// # Errors
///
/// Returns the first [`PipelineError`] any stage produces.
pub fn process_staged_with_diagnostics<C: Clock>(
    raw: &Array2<f64>,
    config: &SegmentationConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    let total_start = clock.now();
    let pending = Pipeline::new(raw.clone(), config.clone());

    let (preprocessed, preprocess) = measure(clock, || pending.preprocess())?;
    let (superpixelated, superpixels) = measure(clock, || preprocessed.segment_superpixels())?;
    let (graph, rag) = measure(clock, || superpixelated.build_rag())?;
    let (segmented, ncut) = measure(clock, || graph.cut_all_depths())?;
    let total_duration = clock.elapsed(&total_start);

    let staged = segmented.into_result();
    let depth_count = staged.masks.depth_count();
    let summary = PipelineSummary {
        image_width: staged.dimensions.width,
        image_height: staged.dimensions.height,
        pixel_count: staged.dimensions.pixel_count(),
        superpixel_count: staged.rag_nodes,
        rag_edge_count: staged.rag_edges,
        depth_count,
        final_segment_count: depth_count
            .checked_sub(1)
            .and_then(|last| staged.masks.distinct_count(last))
            .unwrap_or(0),
    };
    log::debug!(
        "pipeline finished in {:.3}ms: {} superpixels, {} final segments",
        duration_ms(total_duration),
        summary.superpixel_count,
        summary.final_segment_count
    );

    Ok((
        staged,
        PipelineDiagnostics {
            preprocess,
            superpixels,
            rag,
            ncut,
            total_duration,
            summary,
        },
    ))
}
