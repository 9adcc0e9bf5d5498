//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process_staged`] which runs the entire pipeline in one
//! call, [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use ncut_pipeline::{Pipeline, SegmentationConfig, PipelineError};
//! # fn run(raw: ndarray::Array2<f64>) -> Result<(), PipelineError> {
//! let config = SegmentationConfig::default();
//! let staged = Pipeline::new(raw, config)
//!     .preprocess()?
//!     .segment_superpixels()?
//!     .build_rag()?
//!     .cut_all_depths()?
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state,
//! carrying the intermediates later stages need. The superpixel partition
//! and the region adjacency graph are computed once and shared by every
//! recursion depth, since both are deterministic in the input.

use ndarray::Array2;

use crate::diagnostics::StageMetrics;
use crate::ncut::{CutParams, NormalizedCutter};
use crate::rag::{RagSource, RegionAdjacencyGraph};
use crate::superpixel::SuperpixelGenerator;
use crate::types::{
    Dimensions, LabelMap, MaskStack, PipelineError, RgbImage, SegmentationConfig, StagedResult,
};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`preprocess`](Self::preprocess) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .preprocess() to continue"]
pub struct Pending {
    config: SegmentationConfig,
    raw: Array2<f64>,
}

impl Pending {
    /// The raw (log-scaled) input array.
    #[must_use]
    pub const fn raw(&self) -> &Array2<f64> {
        &self.raw
    }

    /// Validate the config, then clip, rescale and replicate the array
    /// into the three-channel intensity image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if any parameter is out of
    /// range and [`PipelineError::InvalidInput`] for a degenerate array.
    pub fn preprocess(self) -> Result<Preprocessed, PipelineError> {
        self.config.validate()?;
        let (rows, cols) = self.raw.dim();
        let dimensions = Dimensions::from_shape(rows, cols)?;
        let intensity =
            crate::preprocess::to_intensity_image(&self.raw, self.config.clip_percentile)?;
        Ok(Preprocessed {
            config: self.config,
            raw: self.raw,
            intensity,
            dimensions,
        })
    }
}

// ───────────────────────── Stage 1: Preprocessed ─────────────────────

/// Pipeline state after the 8-bit intensity image has been built.
///
/// Call [`segment_superpixels`](Self::segment_superpixels) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .segment_superpixels() to continue"]
pub struct Preprocessed {
    config: SegmentationConfig,
    raw: Array2<f64>,
    intensity: RgbImage,
    dimensions: Dimensions,
}

impl Preprocessed {
    /// The three-channel 8-bit intensity image.
    #[must_use]
    pub const fn intensity(&self) -> &RgbImage {
        &self.intensity
    }

    /// Over-segment the intensity image with the configured
    /// [`SuperpixelKind`](crate::SuperpixelKind).
    ///
    /// # Errors
    ///
    /// Propagates [`SuperpixelGenerator::partition_into_superpixels`]
    /// errors.
    pub fn segment_superpixels(self) -> Result<Superpixelated, PipelineError> {
        let superpixels = self.config.superpixel.partition_into_superpixels(
            &self.intensity,
            self.config.nr_sup_pix,
            self.config.compactness,
        )?;
        Ok(Superpixelated {
            config: self.config,
            raw: self.raw,
            intensity: self.intensity,
            superpixels,
            dimensions: self.dimensions,
        })
    }
}

// ───────────────────────── Stage 2: Superpixelated ───────────────────

/// Pipeline state after superpixel segmentation.
///
/// Call [`build_rag`](Self::build_rag) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .build_rag() to continue"]
pub struct Superpixelated {
    config: SegmentationConfig,
    raw: Array2<f64>,
    intensity: RgbImage,
    superpixels: LabelMap,
    dimensions: Dimensions,
}

impl Superpixelated {
    /// The superpixel label map.
    #[must_use]
    pub const fn superpixels(&self) -> &LabelMap {
        &self.superpixels
    }

    /// Build the region adjacency graph. Mean colours come from the
    /// image selected by `config.rag_source`.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::rag::build_rag`] errors.
    pub fn build_rag(self) -> Result<GraphBuilt, PipelineError> {
        let rag = match self.config.rag_source {
            RagSource::Preprocessed => {
                crate::rag::build_rag(&self.intensity, &self.superpixels, self.config.rag_mode)?
            }
            RagSource::LogScaled => {
                crate::rag::build_rag(&self.raw, &self.superpixels, self.config.rag_mode)?
            }
        };
        Ok(GraphBuilt {
            config: self.config,
            intensity: self.intensity,
            superpixels: self.superpixels,
            rag,
            dimensions: self.dimensions,
        })
    }
}

// ───────────────────────── Stage 3: GraphBuilt ───────────────────────

/// Pipeline state after the region adjacency graph has been built.
///
/// Call [`cut_all_depths`](Self::cut_all_depths) to advance.
#[must_use = "pipeline stages are consumed by advancing: call .cut_all_depths() to continue"]
pub struct GraphBuilt {
    config: SegmentationConfig,
    intensity: RgbImage,
    superpixels: LabelMap,
    rag: RegionAdjacencyGraph,
    dimensions: Dimensions,
}

impl GraphBuilt {
    /// The region adjacency graph.
    #[must_use]
    pub const fn rag(&self) -> &RegionAdjacencyGraph {
        &self.rag
    }

    /// Run the normalized cut for every maximum depth in
    /// `0..=config.max_rec` and stack the results.
    ///
    /// # Errors
    ///
    /// Propagates [`NormalizedCutter::cut_all_depths`] errors.
    pub fn cut_all_depths(self) -> Result<Segmented, PipelineError> {
        let params = CutParams {
            max_edge: self.config.max_edge,
            num_cuts: self.config.num_cuts,
            max_depth: self.config.max_rec,
            thresh: self.config.thresh,
        };
        let maps = self
            .config
            .cutter
            .cut_all_depths(&self.superpixels, &self.rag, &params)?;
        let masks = MaskStack::from_slices(&maps)?;
        Ok(Segmented {
            config: self.config,
            intensity: self.intensity,
            superpixels: self.superpixels,
            rag_nodes: self.rag.node_count(),
            rag_edges: self.rag.edge_count(),
            masks,
            dimensions: self.dimensions,
        })
    }
}

// ───────────────────────── Stage 4: Segmented ────────────────────────

/// Pipeline state after the normalized cut, the final stage.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`StagedResult`].
#[must_use = "call .into_result() to extract the StagedResult"]
pub struct Segmented {
    config: SegmentationConfig,
    intensity: RgbImage,
    superpixels: LabelMap,
    rag_nodes: usize,
    rag_edges: usize,
    masks: MaskStack,
    dimensions: Dimensions,
}

impl Segmented {
    /// The mask stack, one slice per recursion depth.
    #[must_use]
    pub const fn masks(&self) -> &MaskStack {
        &self.masks
    }

    /// Source array dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Consume the pipeline and return the full [`StagedResult`].
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            intensity: self.intensity,
            superpixels: self.superpixels,
            rag_nodes: self.rag_nodes,
            rag_edges: self.rag_edges,
            masks: self.masks,
            dimensions: self.dimensions,
        }
    }
}

// ──────────────────── PipelineStage trait + Stage enum ────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 5;

/// Trait implemented by every pipeline stage, enabling uniform iteration.
pub trait PipelineStage: Sized {
    /// Human-readable name of this stage (e.g. `"source"`, `"rag"`).
    const NAME: &str;

    /// Zero-based index of this stage (`0` for Pending through `4` for
    /// Segmented).
    const INDEX: usize;

    /// Stage-specific metrics for diagnostics.
    ///
    /// Returns `None` for the initial [`Pending`] stage.
    fn metrics(&self) -> Option<StageMetrics>;

    /// Advance to the next stage, or `Ok(None)` at the final stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the stage transition fails.
    fn next(self) -> Result<Option<Stage>, PipelineError>;

    /// Run all remaining stages and return the [`StagedResult`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any remaining stage fails.
    fn complete(self) -> Result<StagedResult, PipelineError>;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Preprocessed(self.preprocess()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.preprocess()?.complete()
    }
}

impl PipelineStage for Preprocessed {
    const NAME: &str = "preprocess";
    const INDEX: usize = 1;

    fn metrics(&self) -> Option<StageMetrics> {
        let saturated_pixel_count = self
            .intensity
            .pixels()
            .map(|p| u64::from(u8::from(p.0[0] == u8::MAX)))
            .sum();
        Some(StageMetrics::Preprocess {
            width: self.dimensions.width,
            height: self.dimensions.height,
            clip_percentile: self.config.clip_percentile,
            saturated_pixel_count,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Superpixelated(self.segment_superpixels()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.segment_superpixels()?.complete()
    }
}

impl PipelineStage for Superpixelated {
    const NAME: &str = "superpixels";
    const INDEX: usize = 2;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Superpixels {
            algorithm: format!("{:?}", self.config.superpixel),
            target_count: self.config.nr_sup_pix,
            compactness: self.config.compactness,
            superpixel_count: self.superpixels.distinct_count(),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::GraphBuilt(self.build_rag()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.build_rag()?.complete()
    }
}

impl PipelineStage for GraphBuilt {
    const NAME: &str = "rag";
    const INDEX: usize = 3;

    fn metrics(&self) -> Option<StageMetrics> {
        let node_count = self.rag.node_count();
        let edge_count = self.rag.edge_count();
        #[allow(clippy::cast_precision_loss)]
        let mean_degree = if node_count > 0 {
            2.0 * edge_count as f64 / node_count as f64
        } else {
            0.0
        };
        Some(StageMetrics::Rag {
            mode: format!("{:?}", self.config.rag_mode),
            source: format!("{:?}", self.config.rag_source),
            node_count,
            edge_count,
            mean_degree,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Segmented(self.cut_all_depths()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.cut_all_depths()?.into_result())
    }
}

impl PipelineStage for Segmented {
    const NAME: &str = "ncut";
    const INDEX: usize = 4;

    fn metrics(&self) -> Option<StageMetrics> {
        let segments_per_depth = (0..self.masks.depth_count())
            .filter_map(|d| self.masks.distinct_count(d))
            .collect();
        Some(StageMetrics::Cut {
            backend: format!("{:?}", self.config.cutter),
            max_depth: self.config.max_rec,
            num_cuts: self.config.num_cuts,
            segments_per_depth,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(None)
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.into_result())
    }
}

/// Enum wrapping all pipeline stages for uniform, loopable access.
///
/// ```rust
/// # use ncut_pipeline::{Pipeline, SegmentationConfig, PipelineError};
/// # use ncut_pipeline::pipeline::{Advance, Stage};
/// # fn run(raw: ndarray::Array2<f64>) -> Result<(), PipelineError> {
/// let mut stage: Stage = Pipeline::new(raw, SegmentationConfig::default()).into();
/// loop {
///     match stage.advance()? {
///         Advance::Next(next) => stage = next,
///         Advance::Complete(done) => { stage = done; break; }
///     }
/// }
/// let result = stage.complete()?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Preprocessed`].
    Preprocessed(Preprocessed),
    /// See [`Superpixelated`].
    Superpixelated(Superpixelated),
    /// See [`GraphBuilt`].
    GraphBuilt(GraphBuilt),
    /// See [`Segmented`].
    Segmented(Segmented),
}

/// Result of [`Stage::advance`]: either the next stage or the
/// completed final stage returned unchanged.
#[must_use]
pub enum Advance {
    /// The pipeline advanced to this next stage.
    Next(Stage),
    /// The pipeline was already at the final stage.
    Complete(Stage),
}

/// Delegate a method call to whichever `Stage` variant is active.
macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Pending(s) => s.$method($($arg),*),
            Self::Preprocessed(s) => s.$method($($arg),*),
            Self::Superpixelated(s) => s.$method($($arg),*),
            Self::GraphBuilt(s) => s.$method($($arg),*),
            Self::Segmented(s) => s.$method($($arg),*),
        }
    };
}

impl Stage {
    /// Human-readable name of the current stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        delegate!(self, name)
    }

    /// Zero-based index of the current stage.
    #[must_use]
    pub fn index(&self) -> usize {
        delegate!(self, index)
    }

    /// Stage-specific metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        delegate!(self, metrics)
    }

    /// Whether the pipeline is at the final stage.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Segmented(_))
    }

    /// Advance to the next stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a stage transition fails.
    pub fn next(self) -> Result<Option<Self>, PipelineError> {
        delegate!(self, next)
    }

    /// Advance to the next stage, returning `self` unchanged if already
    /// complete.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a stage transition fails.
    pub fn advance(self) -> Result<Advance, PipelineError> {
        if self.is_complete() {
            return Ok(Advance::Complete(self));
        }
        match self.next()? {
            Some(next) => Ok(Advance::Next(next)),
            None => Err(PipelineError::Computation(
                "non-final stage produced no successor".to_string(),
            )),
        }
    }

    /// Run all remaining stages to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any remaining stage fails.
    pub fn complete(self) -> Result<StagedResult, PipelineError> {
        delegate!(self, complete)
    }
}

// Lets the macro call `.name()` and `.index()` on `&self`; associated
// constants are not reachable through `self.NAME`.
trait StageMetadata {
    fn name(&self) -> &'static str;
    fn index(&self) -> usize;
}

impl<T: PipelineStage> StageMetadata for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn index(&self) -> usize {
        T::INDEX
    }
}

impl From<Pending> for Stage {
    fn from(s: Pending) -> Self {
        Self::Pending(s)
    }
}

impl From<Preprocessed> for Stage {
    fn from(s: Preprocessed) -> Self {
        Self::Preprocessed(s)
    }
}

impl From<Superpixelated> for Stage {
    fn from(s: Superpixelated) -> Self {
        Self::Superpixelated(s)
    }
}

impl From<GraphBuilt> for Stage {
    fn from(s: GraphBuilt) -> Self {
        Self::GraphBuilt(s)
    }
}

impl From<Segmented> for Stage {
    fn from(s: Segmented) -> Self {
        Self::Segmented(s)
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental segmentation pipeline.
///
/// Created via [`Pipeline::new`], which stores the array and config
/// without doing any processing. Each stage method consumes the current
/// state and returns the next, making it a compile-time error to skip
/// stages or call them out of order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from a raw (log-scaled) array and config.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(raw: Array2<f64>, config: SegmentationConfig) -> Pending {
        Pending { config, raw }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::rag::RagMode;

    /// Two Gaussian peaks on a 40x40 grid.
    fn two_peaks() -> Array2<f64> {
        Array2::from_shape_fn((40, 40), |(r, c)| {
            #[allow(clippy::cast_precision_loss)]
            let (r, c) = (r as f64, c as f64);
            let a = (-((r - 12.0).powi(2) + (c - 12.0).powi(2)) / 30.0).exp();
            let b = (-((r - 28.0).powi(2) + (c - 28.0).powi(2)) / 30.0).exp();
            3.0 * a + 2.0 * b
        })
    }

    fn small_config() -> SegmentationConfig {
        SegmentationConfig {
            nr_sup_pix: 40,
            compactness: 5.0,
            max_rec: 2,
            ..SegmentationConfig::default()
        }
    }

    // ─────────── Typed API tests ─────────────────────────────────

    #[test]
    fn pending_exposes_raw_array() {
        let raw = two_peaks();
        let pending = Pipeline::new(raw.clone(), small_config());
        assert_eq!(pending.raw(), &raw);
    }

    #[test]
    fn stages_expose_intermediates() {
        let preprocessed = Pipeline::new(two_peaks(), small_config())
            .preprocess()
            .unwrap();
        assert_eq!(preprocessed.intensity().dimensions(), (40, 40));

        let superpixelated = preprocessed.segment_superpixels().unwrap();
        let superpixel_count = superpixelated.superpixels().distinct_count();
        assert!(superpixel_count > 1);

        let graph = superpixelated.build_rag().unwrap();
        assert_eq!(graph.rag().node_count(), superpixel_count);

        let segmented = graph.cut_all_depths().unwrap();
        assert_eq!(segmented.masks().shape(), (40, 40, 3));
        assert_eq!(
            segmented.dimensions(),
            Dimensions {
                width: 40,
                height: 40
            }
        );

        let result = segmented.into_result();
        assert_eq!(result.superpixels.distinct_count(), superpixel_count);
        assert_eq!(result.rag_nodes, superpixel_count);
    }

    #[test]
    fn invalid_config_fails_before_any_work() {
        let config = SegmentationConfig {
            nr_sup_pix: 0,
            ..small_config()
        };
        let result = Pipeline::new(two_peaks(), config).preprocess();
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn log_scaled_source_builds_single_channel_graph() {
        let config = SegmentationConfig {
            rag_source: RagSource::LogScaled,
            rag_mode: RagMode::Similarity,
            ..small_config()
        };
        let graph = Pipeline::new(two_peaks(), config)
            .preprocess()
            .unwrap()
            .segment_superpixels()
            .unwrap()
            .build_rag()
            .unwrap();
        let first = graph.rag().graph().node_weights().next().unwrap();
        assert_eq!(first.mean_color.len(), 1);
    }

    // ─────────── PipelineStage trait + Stage enum tests ───────────

    #[test]
    fn stage_loop_visits_every_stage_in_order() {
        let mut stage: Stage = Pipeline::new(two_peaks(), small_config()).into();
        let mut names = vec![stage.name()];
        loop {
            match stage.advance().unwrap() {
                Advance::Next(next) => {
                    assert_eq!(next.index(), names.len());
                    names.push(next.name());
                    stage = next;
                }
                Advance::Complete(done) => {
                    stage = done;
                    break;
                }
            }
        }
        assert_eq!(names, vec!["source", "preprocess", "superpixels", "rag", "ncut"]);
        assert_eq!(names.len(), STAGE_COUNT);
        assert!(stage.is_complete());
        let result = stage.complete().unwrap();
        assert_eq!(result.masks.depth_count(), 3);
    }

    #[test]
    fn metrics_present_after_first_stage() {
        let pending = Pipeline::new(two_peaks(), small_config());
        assert!(pending.metrics().is_none());
        let preprocessed = pending.preprocess().unwrap();
        let metrics = preprocessed.metrics();
        assert!(matches!(
            metrics,
            Some(StageMetrics::Preprocess {
                saturated_pixel_count: 1..,
                ..
            })
        ));
    }

    #[test]
    fn complete_from_any_stage_matches() {
        let from_start = Pipeline::new(two_peaks(), small_config())
            .complete()
            .unwrap();
        let from_middle = Pipeline::new(two_peaks(), small_config())
            .preprocess()
            .unwrap()
            .segment_superpixels()
            .unwrap()
            .complete()
            .unwrap();
        assert_eq!(from_start.masks, from_middle.masks);
    }
}
