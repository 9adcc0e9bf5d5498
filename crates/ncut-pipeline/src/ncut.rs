//! Recursive two-way normalized cut over a region adjacency graph.
//!
//! This module defines the [`NormalizedCutter`] trait and the
//! [`CutterKind`] enum for selecting a backend at runtime.
//!
//! # Spectral backend
//!
//! Each sub-graph is bisected along the eigenvector of the second
//! smallest eigenvalue of the normalized Laplacian
//! `D^-1/2 (D - W) D^-1/2`, where `W` carries a synthetic self-edge of
//! weight `max_edge` on every node. The split threshold is the one among
//! `num_cuts` evenly spaced candidates that minimises
//! `cut/assoc(A) + cut/assoc(B)`. A split is accepted when that cost is
//! below `thresh`, the sub-graph has more than two nodes and the
//! recursion depth is below `max_depth`.
//!
//! Depth 0 never cuts: the whole graph is one segment. Each extra level
//! may bisect every segment once more.
//!
//! Because splitting decisions do not depend on `max_depth` except
//! through the depth test, one cut tree built to the deepest level
//! answers every shallower depth as well; [`CutterKind`] overrides
//! [`NormalizedCutter::cut_all_depths`] to exploit that.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, SymmetricEigen};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::rag::RegionAdjacencyGraph;
use crate::types::{LabelMap, PipelineError};

/// Parameters of one recursive normalized cut.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutParams {
    /// Self-edge weight added to every node.
    pub max_edge: f64,
    /// Number of candidate thresholds per bisection.
    pub num_cuts: u32,
    /// Maximum recursion depth.
    pub max_depth: u32,
    /// Acceptance threshold on the normalized-cut cost.
    pub thresh: f64,
}

/// Selects which normalized-cut backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CutterKind {
    /// Dense symmetric eigen-decomposition with `nalgebra`.
    #[default]
    Spectral,
}

/// Trait for normalized-cut strategies.
pub trait NormalizedCutter {
    /// Segment `labels` by recursively bisecting `graph`.
    ///
    /// Every pixel of the returned map carries the smallest superpixel
    /// label of the segment it ended up in.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if `labels` holds a label
    /// with no node in `graph`, [`PipelineError::InvalidConfig`] for
    /// out-of-range parameters, and [`PipelineError::Computation`] if the
    /// eigen-decomposition does not produce finite values.
    fn recursive_normalized_cut(
        &self,
        labels: &LabelMap,
        graph: &RegionAdjacencyGraph,
        params: &CutParams,
    ) -> Result<LabelMap, PipelineError>;

    /// One map per maximum depth in `0..=params.max_depth`, in order.
    ///
    /// # Errors
    ///
    /// See [`recursive_normalized_cut`](Self::recursive_normalized_cut).
    fn cut_all_depths(
        &self,
        labels: &LabelMap,
        graph: &RegionAdjacencyGraph,
        params: &CutParams,
    ) -> Result<Vec<LabelMap>, PipelineError> {
        (0..=params.max_depth)
            .map(|max_depth| {
                let at_depth = CutParams {
                    max_depth,
                    ..*params
                };
                self.recursive_normalized_cut(labels, graph, &at_depth)
            })
            .collect()
    }
}

impl NormalizedCutter for CutterKind {
    fn recursive_normalized_cut(
        &self,
        labels: &LabelMap,
        graph: &RegionAdjacencyGraph,
        params: &CutParams,
    ) -> Result<LabelMap, PipelineError> {
        let mut maps = self.cut_all_depths(labels, graph, params)?;
        maps.pop().ok_or_else(|| {
            PipelineError::Computation("cut tree produced no depth levels".to_string())
        })
    }

    fn cut_all_depths(
        &self,
        labels: &LabelMap,
        graph: &RegionAdjacencyGraph,
        params: &CutParams,
    ) -> Result<Vec<LabelMap>, PipelineError> {
        match *self {
            Self::Spectral => {
                let per_depth = spectral_cut_tree(graph, params)?;
                per_depth
                    .iter()
                    .map(|node_labels| relabel(labels, graph, node_labels))
                    .collect()
            }
        }
    }
}

/// Segment label of every graph node, for each depth `0..=max_depth`.
///
/// `result[d][node.index()]` is the label the node receives when the
/// recursion is limited to depth `d`.
fn spectral_cut_tree(
    graph: &RegionAdjacencyGraph,
    params: &CutParams,
) -> Result<Vec<Vec<u32>>, PipelineError> {
    if !(params.max_edge.is_finite() && params.max_edge > 0.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "max_edge must be positive and finite, got {}",
            params.max_edge
        )));
    }
    if params.num_cuts == 0 {
        return Err(PipelineError::InvalidConfig(
            "num_cuts must be positive".to_string(),
        ));
    }

    let levels = params.max_depth as usize + 1;
    let mut per_depth = vec![vec![0_u32; graph.node_count()]; levels];
    let all: Vec<NodeIndex> = graph.graph().node_indices().collect();
    if all.is_empty() {
        return Ok(per_depth);
    }

    // Explicit stack instead of recursion: (sub-graph nodes, depth).
    let mut pending = vec![(all, 0_usize)];
    let mut splits = 0_usize;
    while let Some((nodes, depth)) = pending.pop() {
        let bisection = if depth + 1 < levels {
            bisect(graph, &nodes, params)?
        } else {
            None
        };

        let segment_label = nodes
            .iter()
            .filter_map(|&n| graph.region(n).map(|r| r.label))
            .min()
            .unwrap_or(0);

        match bisection {
            Some((left, right)) => {
                for &n in &nodes {
                    per_depth[depth][n.index()] = segment_label;
                }
                splits += 1;
                pending.push((right, depth + 1));
                pending.push((left, depth + 1));
            }
            None => {
                for level in &mut per_depth[depth..] {
                    for &n in &nodes {
                        level[n.index()] = segment_label;
                    }
                }
            }
        }
    }

    log::debug!(
        "ncut: {} regions, {splits} accepted splits up to depth {}",
        graph.node_count(),
        params.max_depth
    );
    Ok(per_depth)
}

/// Try to split `nodes` in two. Returns `None` when the sub-graph is too
/// small, the Fiedler vector is constant, or the best cut is not below
/// `thresh`.
fn bisect(
    graph: &RegionAdjacencyGraph,
    nodes: &[NodeIndex],
    params: &CutParams,
) -> Result<Option<(Vec<NodeIndex>, Vec<NodeIndex>)>, PipelineError> {
    let m = nodes.len();
    if m <= 2 {
        return Ok(None);
    }

    let (w, d) = affinity_and_degree(graph, nodes, params.max_edge);
    let fiedler = second_eigenvector(&w, &d)?;

    let Some((mask, cost)) = min_ncut(&fiedler, &w, &d, params.num_cuts) else {
        return Ok(None);
    };
    if cost >= params.thresh {
        return Ok(None);
    }

    let (left, right): (Vec<_>, Vec<_>) = nodes
        .iter()
        .zip(&mask)
        .partition(|&(_, &in_b)| !in_b);
    Ok(Some((
        left.into_iter().map(|(&n, _)| n).collect(),
        right.into_iter().map(|(&n, _)| n).collect(),
    )))
}

/// Dense affinity matrix of the sub-graph induced by `nodes`, with
/// `max_edge` on the diagonal, and its row sums.
fn affinity_and_degree(
    graph: &RegionAdjacencyGraph,
    nodes: &[NodeIndex],
    max_edge: f64,
) -> (DMatrix<f64>, Vec<f64>) {
    let m = nodes.len();
    let position: BTreeMap<NodeIndex, usize> =
        nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();

    let mut w = DMatrix::<f64>::zeros(m, m);
    for (i, &n) in nodes.iter().enumerate() {
        w[(i, i)] = max_edge;
        for edge in graph.graph().edges(n) {
            let other = if edge.source() == n {
                edge.target()
            } else {
                edge.source()
            };
            if let Some(&j) = position.get(&other) {
                w[(i, j)] = *edge.weight();
            }
        }
    }
    let d = w.row_iter().map(|row| row.sum()).collect();
    (w, d)
}

/// Eigenvector of the second-smallest eigenvalue of
/// `L = D^-1/2 (D - W) D^-1/2`.
///
/// The smallest eigenvalue of `L` is always 0 with eigenvector
/// `u0 = D^1/2 1`. Adding `2 u0 u0ᵀ` (unit `u0`) lifts it above the rest
/// of the spectrum, which lies in `[0, 2]`, so the smallest eigenvector
/// of the shifted matrix is the one wanted. When the sub-graph falls
/// apart into disconnected pieces the zero eigenvalue repeats, and the
/// shift still picks a vector orthogonal to `u0` instead of an arbitrary
/// mix that may be nearly constant.
fn second_eigenvector(w: &DMatrix<f64>, d: &[f64]) -> Result<Vec<f64>, PipelineError> {
    if d.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
        return Err(PipelineError::Computation(
            "degree matrix has a non-positive entry".to_string(),
        ));
    }
    let m = d.len();
    let inv_sqrt: Vec<f64> = d.iter().map(|v| v.sqrt().recip()).collect();
    let total: f64 = d.iter().sum();
    let trivial: Vec<f64> = d.iter().map(|v| (v / total).sqrt()).collect();
    let shifted = DMatrix::from_fn(m, m, |i, j| {
        let degree = if i == j { d[i] } else { 0.0 };
        let laplacian = inv_sqrt[i] * (degree - w[(i, j)]) * inv_sqrt[j];
        (2.0 * trivial[i]).mul_add(trivial[j], laplacian)
    });

    let eigen = SymmetricEigen::new(shifted);
    if eigen.eigenvalues.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Computation(
            "eigen-decomposition produced non-finite eigenvalues".to_string(),
        ));
    }

    let Some(smallest) =
        (0..m).min_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]))
    else {
        return Err(PipelineError::Computation(
            "cannot bisect an empty sub-graph".to_string(),
        ));
    };

    let vector: Vec<f64> = eigen.eigenvectors.column(smallest).iter().copied().collect();
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Computation(
            "eigen-decomposition produced a non-finite eigenvector".to_string(),
        ));
    }
    Ok(vector)
}

/// Best threshold on `ev` among `num_cuts` candidates evenly spaced in
/// `[min, max)`. Returns the side mask (`true` where `ev > t`) and its
/// normalized-cut cost, or `None` if `ev` is constant.
///
/// Nodes are swept in ascending `ev` order so the cut weight and the two
/// associations are updated incrementally as the threshold rises.
fn min_ncut(
    ev: &[f64],
    w: &DMatrix<f64>,
    d: &[f64],
    num_cuts: u32,
) -> Option<(Vec<bool>, f64)> {
    let mn = ev.iter().copied().fold(f64::INFINITY, f64::min);
    let mx = ev.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if (mx - mn).abs() <= 1e-5_f64.mul_add(mx.abs(), 1e-8) {
        return None;
    }

    let m = ev.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| ev[a].total_cmp(&ev[b]));

    // All nodes start on the `ev > t` side.
    let mut in_b = vec![true; m];
    let mut cut = 0.0;
    let mut assoc_a = 0.0;
    let mut assoc_b: f64 = d.iter().sum();
    let mut moved = 0;

    let mut best: Option<(f64, f64)> = None;
    let step = (mx - mn) / f64::from(num_cuts);
    for j in 0..num_cuts {
        let t = f64::from(j).mul_add(step, mn);
        while moved < m && ev[order[moved]] <= t {
            let v = order[moved];
            for u in 0..m {
                if u == v {
                    continue;
                }
                if in_b[u] {
                    cut += w[(v, u)];
                } else {
                    cut -= w[(v, u)];
                }
            }
            in_b[v] = false;
            assoc_a += d[v];
            assoc_b -= d[v];
            moved += 1;
        }
        if moved == 0 || moved == m {
            continue;
        }
        let cost = cut / assoc_a + cut / assoc_b;
        if best.is_none_or(|(_, c)| cost < c) {
            best = Some((t, cost));
        }
    }

    best.map(|(t, cost)| (ev.iter().map(|&v| v > t).collect(), cost))
}

/// Map each pixel's superpixel label to its segment label.
fn relabel(
    labels: &LabelMap,
    graph: &RegionAdjacencyGraph,
    node_labels: &[u32],
) -> Result<LabelMap, PipelineError> {
    let mut missing = None;
    let out = labels.as_array().mapv(|label| {
        graph
            .node_for_label(label)
            .and_then(|n| node_labels.get(n.index()).copied())
            .unwrap_or_else(|| {
                if missing.is_none() {
                    missing = Some(label);
                }
                label
            })
    });
    if let Some(label) = missing {
        log::debug!("ncut: superpixel label {label} has no graph node");
        return Err(PipelineError::ShapeMismatch {
            expected: (graph.node_count(), 1),
            actual: (labels.distinct_count(), 1),
        });
    }
    Ok(LabelMap::new(out))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::RgbImage;
    use ndarray::{Array2, array};

    use super::*;
    use crate::rag::{RagMode, build_rag};

    fn params(max_depth: u32) -> CutParams {
        CutParams {
            max_edge: 10_000_000.0,
            num_cuts: 1000,
            max_depth,
            thresh: 0.001,
        }
    }

    /// 6 vertical strips, the left three dark and the right three bright.
    fn two_block_graph() -> (LabelMap, RegionAdjacencyGraph) {
        let labels = LabelMap::new(Array2::from_shape_fn((4, 12), |(_, c)| {
            u32::try_from(c / 2).unwrap()
        }));
        let img = RgbImage::from_fn(12, 4, |x, _| {
            let v = if x < 6 { 20 } else { 230 };
            image::Rgb([v, v, v])
        });
        let rag = build_rag(&img, &labels, RagMode::Similarity).unwrap();
        (labels, rag)
    }

    #[test]
    fn default_is_spectral() {
        assert_eq!(CutterKind::default(), CutterKind::Spectral);
    }

    #[test]
    fn depth_zero_is_a_single_segment() {
        let (labels, rag) = two_block_graph();
        let out = CutterKind::Spectral
            .recursive_normalized_cut(&labels, &rag, &params(0))
            .unwrap();
        assert_eq!(out.distinct_count(), 1);
        assert!(out.as_array().iter().all(|&l| l == 0));
    }

    #[test]
    fn first_cut_separates_dark_from_bright() {
        let (labels, rag) = two_block_graph();
        let out = CutterKind::Spectral
            .recursive_normalized_cut(&labels, &rag, &params(1))
            .unwrap();
        assert_eq!(out.distinct_count(), 2);
        let out = out.as_array();
        for row in 0..4 {
            assert_eq!(out[[row, 0]], 0);
            assert_eq!(out[[row, 5]], 0);
            assert_eq!(out[[row, 6]], 3);
            assert_eq!(out[[row, 11]], 3);
        }
    }

    #[test]
    fn region_count_is_monotone_and_bounded() {
        let (labels, rag) = two_block_graph();
        let maps = CutterKind::Spectral
            .cut_all_depths(&labels, &rag, &params(4))
            .unwrap();
        assert_eq!(maps.len(), 5);
        let counts: Vec<usize> = maps.iter().map(LabelMap::distinct_count).collect();
        for (depth, pair) in counts.windows(2).enumerate() {
            assert!(pair[0] <= pair[1], "depth {depth}: {counts:?}");
        }
        for (depth, &count) in counts.iter().enumerate() {
            assert!(count <= 1 << depth);
            assert!(count <= rag.node_count());
        }
    }

    #[test]
    fn all_depths_match_individual_runs() {
        let (labels, rag) = two_block_graph();
        let cutter = CutterKind::Spectral;
        let all = cutter.cut_all_depths(&labels, &rag, &params(3)).unwrap();
        for (depth, map) in all.iter().enumerate() {
            let single = cutter
                .recursive_normalized_cut(&labels, &rag, &params(u32::try_from(depth).unwrap()))
                .unwrap();
            assert_eq!(&single, map, "depth {depth}");
        }
    }

    #[test]
    fn segments_are_unions_of_superpixels() {
        let (labels, rag) = two_block_graph();
        let out = CutterKind::Spectral
            .recursive_normalized_cut(&labels, &rag, &params(3))
            .unwrap();
        // Every segment label is the smallest superpixel label it holds.
        for (sp, seg) in labels.as_array().iter().zip(out.as_array()) {
            assert!(seg <= sp);
        }
    }

    #[test]
    fn two_node_graph_is_never_split() {
        let labels = LabelMap::new(array![[0, 1]]);
        let img = RgbImage::from_fn(2, 1, |x, _| {
            let v = if x == 0 { 0 } else { 255 };
            image::Rgb([v, v, v])
        });
        let rag = build_rag(&img, &labels, RagMode::Similarity).unwrap();
        let out = CutterKind::Spectral
            .recursive_normalized_cut(&labels, &rag, &params(5))
            .unwrap();
        assert_eq!(out.distinct_count(), 1);
    }

    #[test]
    fn cutting_is_deterministic() {
        let (labels, rag) = two_block_graph();
        let a = CutterKind::Spectral
            .cut_all_depths(&labels, &rag, &params(3))
            .unwrap();
        let b = CutterKind::Spectral
            .cut_all_depths(&labels, &rag, &params(3))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_label_is_shape_mismatch() {
        let (_, rag) = two_block_graph();
        let foreign = LabelMap::new(Array2::from_elem((4, 12), 99));
        let result = CutterKind::Spectral.recursive_normalized_cut(&foreign, &rag, &params(1));
        assert!(matches!(result, Err(PipelineError::ShapeMismatch { .. })));
    }

    #[test]
    fn zero_cuts_is_invalid_config() {
        let (labels, rag) = two_block_graph();
        let bad = CutParams {
            num_cuts: 0,
            ..params(2)
        };
        let result = CutterKind::Spectral.recursive_normalized_cut(&labels, &rag, &bad);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn disconnected_pieces_get_opposite_signs() {
        // Two components with no edge between them.
        let w = DMatrix::from_row_slice(
            4,
            4,
            &[
                10.0, 1.0, 0.0, 0.0, //
                1.0, 10.0, 0.0, 0.0, //
                0.0, 0.0, 10.0, 1.0, //
                0.0, 0.0, 1.0, 10.0,
            ],
        );
        let d = vec![11.0; 4];
        let v = second_eigenvector(&w, &d).unwrap();
        assert!((v[0] - v[1]).abs() < 1e-9, "{v:?}");
        assert!((v[2] - v[3]).abs() < 1e-9, "{v:?}");
        assert!(v[0] * v[2] < 0.0, "{v:?}");
    }

    #[test]
    fn second_eigenvector_orders_a_path_graph() {
        let w = DMatrix::from_row_slice(
            4,
            4,
            &[
                1.0, 0.9, 0.0, 0.0, //
                0.9, 1.0, 0.1, 0.0, //
                0.0, 0.1, 1.0, 0.9, //
                0.0, 0.0, 0.9, 1.0,
            ],
        );
        let d: Vec<f64> = w.row_iter().map(|r| r.sum()).collect();
        let v = second_eigenvector(&w, &d).unwrap();
        // The weak middle edge separates {a, b} from {c, d}.
        assert!(v[0] * v[3] < 0.0, "{v:?}");
        assert!(v[1] * v[2] < 0.0, "{v:?}");
    }

    #[test]
    fn constant_vector_has_no_cut() {
        let w = DMatrix::from_element(3, 3, 1.0);
        let d = vec![3.0; 3];
        assert!(min_ncut(&[0.5, 0.5, 0.5], &w, &d, 10).is_none());
    }

    #[test]
    fn incremental_sweep_matches_direct_cost() {
        // Path graph a - b - c - d with a weak middle edge.
        let w = DMatrix::from_row_slice(
            4,
            4,
            &[
                1.0, 0.9, 0.0, 0.0, //
                0.9, 1.0, 0.1, 0.0, //
                0.0, 0.1, 1.0, 0.9, //
                0.0, 0.0, 0.9, 1.0,
            ],
        );
        let d: Vec<f64> = w.row_iter().map(|r| r.sum()).collect();
        let ev = [-0.5, -0.4, 0.4, 0.5];
        let (mask, cost) = min_ncut(&ev, &w, &d, 100).unwrap();
        assert_eq!(mask, vec![false, false, true, true]);
        // cut = 0.1, assoc(A) = assoc(B) = 1.9 + 2.0
        let expected = 0.1 / 3.9 + 0.1 / 3.9;
        assert!((cost - expected).abs() < 1e-12, "cost {cost}");
    }
}
