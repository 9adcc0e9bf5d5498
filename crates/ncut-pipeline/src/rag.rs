//! Region adjacency graph over superpixels.
//!
//! One node per superpixel, carrying its pixel count, mean colour and
//! centroid. Two superpixels are adjacent when any of their pixels touch
//! under 8-connectivity; the edge weight encodes how alike the two
//! regions are according to [`RagMode`].

use std::collections::{BTreeMap, BTreeSet};

use image::RgbImage;
use ndarray::Array2;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};

use crate::types::{LabelMap, PipelineError};

/// Scale of the colour similarity kernel `exp(-d² / sigma)`.
pub const SIMILARITY_SIGMA: f64 = 255.0;

/// How edge weights are derived from region statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RagMode {
    /// Euclidean distance between mean colours. Larger means less alike.
    Distance,
    /// `exp(-|Δcolour|² / 255)`.
    Similarity,
    /// Colour similarity damped by centroid distance, with the spatial
    /// scale set to twice the mean superpixel area.
    #[default]
    SimilarityAndProximity,
}

/// Which image the region mean colours are taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RagSource {
    /// The 8-bit three-channel image the superpixels were computed on.
    #[default]
    Preprocessed,
    /// The log-scaled floating-point array before clipping and rescaling.
    LogScaled,
}

/// A raster whose pixels can be summed per region.
pub trait ColorSamples {
    /// `(rows, cols)` shape.
    fn sample_shape(&self) -> (usize, usize);

    /// Number of colour channels.
    fn channels(&self) -> usize;

    /// Add the colour at `[row, col]` onto `sum` (length [`channels`](Self::channels)).
    fn accumulate(&self, row: usize, col: usize, sum: &mut [f64]);
}

impl ColorSamples for RgbImage {
    fn sample_shape(&self) -> (usize, usize) {
        (self.height() as usize, self.width() as usize)
    }

    fn channels(&self) -> usize {
        3
    }

    #[allow(clippy::cast_possible_truncation)]
    fn accumulate(&self, row: usize, col: usize, sum: &mut [f64]) {
        let px = self.get_pixel(col as u32, row as u32);
        for (s, &v) in sum.iter_mut().zip(&px.0) {
            *s += f64::from(v);
        }
    }
}

impl ColorSamples for Array2<f64> {
    fn sample_shape(&self) -> (usize, usize) {
        self.dim()
    }

    fn channels(&self) -> usize {
        1
    }

    fn accumulate(&self, row: usize, col: usize, sum: &mut [f64]) {
        sum[0] += self[[row, col]];
    }
}

/// Statistics of one superpixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Superpixel label in the label map.
    pub label: u32,
    /// Number of pixels carrying this label.
    pub pixel_count: usize,
    /// Mean colour, one entry per channel.
    pub mean_color: Vec<f64>,
    /// Mean `(row, col)` position.
    pub centroid: (f64, f64),
}

/// Undirected weighted graph of superpixels.
#[derive(Debug, Clone)]
pub struct RegionAdjacencyGraph {
    graph: UnGraph<Region, f64>,
    by_label: BTreeMap<u32, NodeIndex>,
}

impl RegionAdjacencyGraph {
    /// The underlying `petgraph` graph.
    #[must_use]
    pub const fn graph(&self) -> &UnGraph<Region, f64> {
        &self.graph
    }

    /// Number of regions.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of adjacent region pairs.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node holding superpixel `label`.
    #[must_use]
    pub fn node_for_label(&self, label: u32) -> Option<NodeIndex> {
        self.by_label.get(&label).copied()
    }

    /// Region stored at `node`.
    #[must_use]
    pub fn region(&self, node: NodeIndex) -> Option<&Region> {
        self.graph.node_weight(node)
    }

    /// Weight of the edge between two superpixel labels, if adjacent.
    #[must_use]
    pub fn edge_weight(&self, a: u32, b: u32) -> Option<f64> {
        let (na, nb) = (self.node_for_label(a)?, self.node_for_label(b)?);
        let edge = self.graph.find_edge(na, nb)?;
        self.graph.edge_weight(edge).copied()
    }
}

/// Build the region adjacency graph of `labels` with mean colours taken
/// from `image`.
///
/// Nodes are inserted in ascending label order, so node index `i` holds
/// the `i`-th smallest label.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if `image` and `labels`
/// differ in shape, and [`PipelineError::InvalidInput`] if the label map
/// is empty.
pub fn build_rag<S: ColorSamples + ?Sized>(
    image: &S,
    labels: &LabelMap,
    mode: RagMode,
) -> Result<RegionAdjacencyGraph, PipelineError> {
    let shape = labels.shape();
    if image.sample_shape() != shape {
        return Err(PipelineError::ShapeMismatch {
            expected: shape,
            actual: image.sample_shape(),
        });
    }
    let (rows, cols) = shape;
    if rows == 0 || cols == 0 {
        return Err(PipelineError::InvalidInput(
            "cannot build a graph from an empty label map".to_string(),
        ));
    }

    let channels = image.channels();
    let labels = labels.as_array();

    // label -> (pixel count, colour sum, row sum, col sum)
    let mut stats: BTreeMap<u32, (usize, Vec<f64>, f64, f64)> = BTreeMap::new();
    for ((row, col), &label) in labels.indexed_iter() {
        let entry = stats
            .entry(label)
            .or_insert_with(|| (0, vec![0.0; channels], 0.0, 0.0));
        entry.0 += 1;
        image.accumulate(row, col, &mut entry.1);
        #[allow(clippy::cast_precision_loss)]
        let (r, c) = (row as f64, col as f64);
        entry.2 += r;
        entry.3 += c;
    }

    let mut graph = UnGraph::<Region, f64>::with_capacity(stats.len(), 0);
    let mut by_label = BTreeMap::new();
    for (label, (count, color_sum, row_sum, col_sum)) in stats {
        #[allow(clippy::cast_precision_loss)]
        let n = count as f64;
        let node = graph.add_node(Region {
            label,
            pixel_count: count,
            mean_color: color_sum.into_iter().map(|s| s / n).collect(),
            centroid: (row_sum / n, col_sum / n),
        });
        by_label.insert(label, node);
    }

    let pairs = adjacent_pairs(labels);
    #[allow(clippy::cast_precision_loss)]
    let spatial_sigma = 2.0 * (rows * cols) as f64 / graph.node_count() as f64;

    for (a, b) in pairs {
        let (Some(&na), Some(&nb)) = (by_label.get(&a), by_label.get(&b)) else {
            continue;
        };
        let weight = edge_weight(&graph[na], &graph[nb], mode, spatial_sigma);
        graph.add_edge(na, nb, weight);
    }

    log::debug!(
        "rag: {} regions, {} edges ({mode:?})",
        graph.node_count(),
        graph.edge_count()
    );
    Ok(RegionAdjacencyGraph { graph, by_label })
}

/// Distinct `(smaller, larger)` label pairs that touch under
/// 8-connectivity, in ascending order.
fn adjacent_pairs(labels: &Array2<u32>) -> BTreeSet<(u32, u32)> {
    let (rows, cols) = labels.dim();
    let mut pairs = BTreeSet::new();
    for row in 0..rows {
        for col in 0..cols {
            let here = labels[[row, col]];
            let down = row + 1 < rows;
            let neighbours = [
                (col + 1 < cols).then(|| (row, col + 1)),
                down.then_some((row + 1, col)),
                (down && col + 1 < cols).then(|| (row + 1, col + 1)),
                (down && col > 0).then(|| (row + 1, col - 1)),
            ];
            for (r, c) in neighbours.into_iter().flatten() {
                let there = labels[[r, c]];
                if there != here {
                    pairs.insert((here.min(there), here.max(there)));
                }
            }
        }
    }
    pairs
}

fn edge_weight(a: &Region, b: &Region, mode: RagMode, spatial_sigma: f64) -> f64 {
    let color_sq: f64 = a
        .mean_color
        .iter()
        .zip(&b.mean_color)
        .map(|(x, y)| (x - y).powi(2))
        .sum();
    match mode {
        RagMode::Distance => color_sq.sqrt(),
        RagMode::Similarity => (-color_sq / SIMILARITY_SIGMA).exp(),
        RagMode::SimilarityAndProximity => {
            let dr = a.centroid.0 - b.centroid.0;
            let dc = a.centroid.1 - b.centroid.1;
            let spatial_sq = dr.mul_add(dr, dc * dc);
            (-color_sq / SIMILARITY_SIGMA).exp() * (-spatial_sq / spatial_sigma).exp()
        }
    }
}
