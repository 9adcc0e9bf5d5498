//! Shared types for the ncut segmentation pipeline.

use std::collections::BTreeSet;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::frames::DepthFrames;
use crate::ncut::CutterKind;
use crate::rag::{RagMode, RagSource};
use crate::superpixel::SuperpixelKind;

/// Re-export `RgbImage` so downstream crates can reference the
/// intensity image without depending on `image` directly.
pub use image::RgbImage;

/// Image dimensions in pixels.
///
/// `width` counts columns (array axis 1) and `height` counts rows
/// (array axis 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of a `(rows, cols)` array shape.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if either axis does not
    /// fit in a `u32`.
    pub fn from_shape(rows: usize, cols: usize) -> Result<Self, PipelineError> {
        let width = u32::try_from(cols)
            .map_err(|_| PipelineError::InvalidInput(format!("{cols} columns is too wide")))?;
        let height = u32::try_from(rows)
            .map_err(|_| PipelineError::InvalidInput(format!("{rows} rows is too tall")))?;
        Ok(Self { width, height })
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A 2D grid of integer region identifiers, indexed `[row, col]`.
///
/// Used both for superpixel partitions and for normalized-cut output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap(Array2<u32>);

impl LabelMap {
    /// Wrap an existing label array.
    #[must_use]
    pub const fn new(labels: Array2<u32>) -> Self {
        Self(labels)
    }

    /// Build a label map from row-major labels.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if `labels.len()` is not
    /// `rows * cols`.
    pub fn from_row_major(
        rows: usize,
        cols: usize,
        labels: Vec<u32>,
    ) -> Result<Self, PipelineError> {
        let actual = labels.len();
        Array2::from_shape_vec((rows, cols), labels)
            .map(Self)
            .map_err(|_| PipelineError::ShapeMismatch {
                expected: (rows, cols),
                actual: (actual, 1),
            })
    }

    /// `(rows, cols)` shape.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.0.dim()
    }

    /// The underlying label array.
    #[must_use]
    pub const fn as_array(&self) -> &Array2<u32> {
        &self.0
    }

    /// Consume the map and return the underlying label array.
    #[must_use]
    pub fn into_array(self) -> Array2<u32> {
        self.0
    }

    /// The set of distinct labels, ascending.
    #[must_use]
    pub fn distinct_labels(&self) -> BTreeSet<u32> {
        self.0.iter().copied().collect()
    }

    /// Number of distinct labels.
    #[must_use]
    pub fn distinct_count(&self) -> usize {
        self.distinct_labels().len()
    }
}

/// The recursion-indexed mask stack: shape `(rows, cols, depths)`.
///
/// Slice `i` along the last axis is the normalized-cut output computed
/// with a maximum recursion depth of `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskStack(Array3<u32>);

impl MaskStack {
    /// Stack label maps along a new trailing depth axis, in order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if `slices` is empty and
    /// [`PipelineError::ShapeMismatch`] if the slices disagree in shape.
    pub fn from_slices(slices: &[LabelMap]) -> Result<Self, PipelineError> {
        let Some(first) = slices.first() else {
            return Err(PipelineError::InvalidInput(
                "mask stack needs at least one depth slice".to_string(),
            ));
        };
        let expected = first.shape();
        if let Some(bad) = slices.iter().find(|s| s.shape() != expected) {
            return Err(PipelineError::ShapeMismatch {
                expected,
                actual: bad.shape(),
            });
        }
        let views: Vec<ArrayView2<'_, u32>> =
            slices.iter().map(|s| s.as_array().view()).collect();
        ndarray::stack(Axis(2), &views)
            .map(Self)
            .map_err(|e| PipelineError::Computation(format!("failed to stack masks: {e}")))
    }

    /// Wrap an existing `(rows, cols, depths)` array.
    #[must_use]
    pub const fn new(stack: Array3<u32>) -> Self {
        Self(stack)
    }

    /// `(rows, cols, depths)` shape.
    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        self.0.dim()
    }

    /// Number of depth slices (`max_rec + 1`).
    #[must_use]
    pub fn depth_count(&self) -> usize {
        self.0.len_of(Axis(2))
    }

    /// The mask computed with maximum recursion depth `depth`.
    #[must_use]
    pub fn slice(&self, depth: usize) -> Option<ArrayView2<'_, u32>> {
        (depth < self.depth_count()).then(|| self.0.index_axis(Axis(2), depth))
    }

    /// The final (deepest) segmentation mask.
    #[must_use]
    pub fn final_mask(&self) -> Option<ArrayView2<'_, u32>> {
        self.depth_count()
            .checked_sub(1)
            .and_then(|last| self.slice(last))
    }

    /// Number of distinct region labels in the slice at `depth`.
    #[must_use]
    pub fn distinct_count(&self, depth: usize) -> Option<usize> {
        self.slice(depth)
            .map(|s| s.iter().copied().collect::<BTreeSet<u32>>().len())
    }

    /// Iterate over the depth axis (see [`DepthFrames`]).
    #[must_use]
    pub const fn frames(&self) -> DepthFrames<'_> {
        DepthFrames::new(self)
    }

    /// The underlying array.
    #[must_use]
    pub const fn as_array(&self) -> &Array3<u32> {
        &self.0
    }

    /// Consume the stack and return the underlying array.
    #[must_use]
    pub fn into_array(self) -> Array3<u32> {
        self.0
    }
}

/// Configuration for the segmentation pipeline.
///
/// Passed by reference into the driver; nothing reads configuration
/// from global state. Defaults match the segmentator command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Approximate number of superpixels in the region adjacency graph.
    pub nr_sup_pix: u32,

    /// SLIC compactness. Higher values weigh spatial proximity more,
    /// making superpixels more square.
    pub compactness: f64,

    /// Maximum normalized-cut recursion depth. The mask stack holds one
    /// slice for every depth in `0..=max_rec`.
    pub max_rec: u32,

    /// Weight of the synthetic self-edge on every RAG node, i.e. the
    /// affinity between identical regions.
    pub max_edge: f64,

    /// Number of candidate thresholds evaluated per normalized cut.
    pub num_cuts: u32,

    /// Values above this percentile are clipped before 8-bit rescaling.
    pub clip_percentile: f64,

    /// A cut is only accepted when its normalized-cut cost is below
    /// this value.
    pub thresh: f64,

    /// Morphological closing size. Recorded for provenance; the closing
    /// step is disabled.
    pub closing_size: u32,

    /// Which superpixel algorithm to use.
    pub superpixel: SuperpixelKind,

    /// Which normalized-cut backend to use.
    pub cutter: CutterKind,

    /// How RAG edge weights are computed.
    pub rag_mode: RagMode,

    /// Which image the RAG mean colours are computed from.
    pub rag_source: RagSource,
}

impl SegmentationConfig {
    /// Default approximate superpixel count.
    pub const DEFAULT_NR_SUP_PIX: u32 = 2500;
    /// Default SLIC compactness.
    pub const DEFAULT_COMPACTNESS: f64 = 2.0;
    /// Default maximum recursion depth.
    pub const DEFAULT_MAX_REC: u32 = 8;
    /// Default self-edge weight.
    pub const DEFAULT_MAX_EDGE: f64 = 10_000_000.0;
    /// Default number of candidate cuts.
    pub const DEFAULT_NUM_CUTS: u32 = 1000;
    /// Default clip percentile.
    pub const DEFAULT_CLIP_PERCENTILE: f64 = 99.75;
    /// Default normalized-cut acceptance threshold.
    pub const DEFAULT_THRESH: f64 = 0.001;
    /// Default closing size.
    pub const DEFAULT_CLOSING_SIZE: u32 = 5;

    /// Check every parameter range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// out-of-range parameter.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.nr_sup_pix == 0 {
            return Err(PipelineError::InvalidConfig(
                "nr_sup_pix must be positive".to_string(),
            ));
        }
        if !(self.compactness.is_finite() && self.compactness > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "compactness must be positive and finite, got {}",
                self.compactness
            )));
        }
        if !(self.max_edge.is_finite() && self.max_edge > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "max_edge must be positive and finite, got {}",
                self.max_edge
            )));
        }
        if self.num_cuts == 0 {
            return Err(PipelineError::InvalidConfig(
                "num_cuts must be positive".to_string(),
            ));
        }
        if !(self.clip_percentile > 0.0 && self.clip_percentile <= 100.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "clip_percentile must be in (0, 100], got {}",
                self.clip_percentile
            )));
        }
        if !self.thresh.is_finite() {
            return Err(PipelineError::InvalidConfig(format!(
                "thresh must be finite, got {}",
                self.thresh
            )));
        }
        Ok(())
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            nr_sup_pix: Self::DEFAULT_NR_SUP_PIX,
            compactness: Self::DEFAULT_COMPACTNESS,
            max_rec: Self::DEFAULT_MAX_REC,
            max_edge: Self::DEFAULT_MAX_EDGE,
            num_cuts: Self::DEFAULT_NUM_CUTS,
            clip_percentile: Self::DEFAULT_CLIP_PERCENTILE,
            thresh: Self::DEFAULT_THRESH,
            closing_size: Self::DEFAULT_CLOSING_SIZE,
            superpixel: SuperpixelKind::default(),
            cutter: CutterKind::default(),
            rag_mode: RagMode::default(),
            rag_source: RagSource::default(),
        }
    }
}

/// Result of running the pipeline with the intermediate outputs kept.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// 8-bit intensity image fed to the superpixel generator.
    pub intensity: RgbImage,
    /// Superpixel partition.
    pub superpixels: LabelMap,
    /// Number of RAG nodes (superpixels).
    pub rag_nodes: usize,
    /// Number of RAG edges (adjacent superpixel pairs).
    pub rag_edges: usize,
    /// One normalized-cut mask per recursion depth.
    pub masks: MaskStack,
    /// Source array dimensions.
    pub dimensions: Dimensions,
}

impl StagedResult {
    /// The final (deepest) segmentation mask.
    #[must_use]
    pub fn final_mask(&self) -> Option<ArrayView2<'_, u32>> {
        self.masks.final_mask()
    }
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// The input array is degenerate (empty, non-finite, or has no
    /// positive maximum after clipping).
    #[error("invalid input array: {0}")]
    InvalidInput(String),

    /// A parameter is out of range.
    #[error("invalid segmentation configuration: {0}")]
    InvalidConfig(String),

    /// Two arrays that must share a shape do not.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected `(rows, cols)`.
        expected: (usize, usize),
        /// Actual `(rows, cols)`.
        actual: (usize, usize),
    },

    /// A numerical routine (superpixels, graph, eigensolver) failed.
    #[error("numerical computation failed: {0}")]
    Computation(String),
}

impl PipelineError {
    /// Whether this error came from a numerical backend rather than from
    /// the caller's input or parameters.
    #[must_use]
    pub const fn is_library_error(&self) -> bool {
        matches!(self, Self::ShapeMismatch { .. } | Self::Computation(_))
    }
}
