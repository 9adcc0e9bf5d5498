//! ncut-pipeline: normalized graph-cut segmentation of 2D histograms
//! (sans-IO).
//!
//! Segments a 2D floating-point array through:
//! percentile clip + 8-bit rescale -> SLIC superpixels ->
//! region adjacency graph -> recursive normalized cut, once for every
//! maximum recursion depth `0..=max_rec`.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! arrays and returns a [`MaskStack`]. Reading and writing `.npy` files
//! and rendering previews lives in `ncut-export`.

pub mod blur;
pub mod diagnostics;
pub mod frames;
pub mod ncut;
pub mod pipeline;
pub mod preprocess;
pub mod rag;
pub mod superpixel;
pub mod types;

use ndarray::Array2;

pub use frames::DepthFrames;
pub use ncut::{CutParams, CutterKind, NormalizedCutter};
pub use pipeline::Pipeline;
pub use rag::{RagMode, RagSource, RegionAdjacencyGraph};
pub use superpixel::{SuperpixelGenerator, SuperpixelKind};
pub use types::{
    Dimensions, LabelMap, MaskStack, PipelineError, SegmentationConfig, StagedResult,
};

/// Segment `raw` once per recursion depth and stack the masks.
///
/// `raw` is the already log-scaled histogram. The returned stack has
/// shape `(rows, cols, config.max_rec + 1)`; slice `i` is the
/// segmentation with maximum recursion depth `i`.
///
/// # Pipeline steps
///
/// 1. Validate the configuration
/// 2. Clip at `clip_percentile`, rescale to 8 bits, replicate to RGB
/// 3. SLIC superpixels (Gaussian pre-filter, sigma 2)
/// 4. Region adjacency graph with mean-colour edge weights
/// 5. Recursive normalized cut for each depth
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for out-of-range parameters,
/// [`PipelineError::InvalidInput`] for an empty, non-finite or
/// non-positive array, and [`PipelineError::ShapeMismatch`] or
/// [`PipelineError::Computation`] if a numerical stage fails. No partial
/// stack is returned.
pub fn process(raw: &Array2<f64>, config: &SegmentationConfig) -> Result<MaskStack, PipelineError> {
    Ok(process_staged(raw, config)?.masks)
}

/// Run the full pipeline and keep every intermediate.
///
/// # Errors
///
/// See [`process`].
pub fn process_staged(
    raw: &Array2<f64>,
    config: &SegmentationConfig,
) -> Result<StagedResult, PipelineError> {
    Ok(Pipeline::new(raw.clone(), config.clone())
        .preprocess()?
        .segment_superpixels()?
        .build_rag()?
        .cut_all_depths()?
        .into_result())
}
