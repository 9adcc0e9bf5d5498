//! Superpixel over-segmentation of the intensity image.
//!
//! This module defines the [`SuperpixelGenerator`] trait for pluggable
//! over-segmentation algorithms and the [`SuperpixelKind`] enum for
//! selecting which algorithm to use at runtime.
//!
//! The only algorithm shipped is SLIC (simple linear iterative
//! clustering): k-means in a joint CIELAB + image-plane space, where the
//! search for each cluster is restricted to a neighbourhood of its seed.
//! Connectivity is enforced afterwards so that every label is a single
//! 4-connected region.

use std::collections::VecDeque;

use image::RgbImage;
use palette::{FromColor, Lab, LinSrgb, Srgb};
use serde::{Deserialize, Serialize};

use crate::blur::{SUPERPIXEL_SIGMA, gaussian_blur_rgb};
use crate::types::{LabelMap, PipelineError};

/// Upper bound on SLIC k-means iterations.
pub const SLIC_MAX_ITERATIONS: usize = 10;

/// Components smaller than this fraction of the mean superpixel area are
/// merged into a neighbour during connectivity enforcement.
const MIN_SEGMENT_FRACTION: f64 = 0.5;

/// Selects which superpixel algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SuperpixelKind {
    /// SLIC clustering in CIELAB + xy space with a fixed Gaussian
    /// pre-filter (sigma 2).
    #[default]
    Slic,
}

/// Trait for superpixel strategies.
///
/// Input: the three-channel intensity image.
/// Output: a label map with contiguous labels `0..k`, each label a single
/// 4-connected region.
pub trait SuperpixelGenerator {
    /// Partition `image` into roughly `target_count` superpixels.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `target_count` is zero
    /// or `compactness` is not positive, and
    /// [`PipelineError::InvalidInput`] if the image is empty.
    fn partition_into_superpixels(
        &self,
        image: &RgbImage,
        target_count: u32,
        compactness: f64,
    ) -> Result<LabelMap, PipelineError>;
}

impl SuperpixelGenerator for SuperpixelKind {
    fn partition_into_superpixels(
        &self,
        image: &RgbImage,
        target_count: u32,
        compactness: f64,
    ) -> Result<LabelMap, PipelineError> {
        match *self {
            Self::Slic => slic(image, target_count, compactness),
        }
    }
}

/// A cluster centre in joint colour + position space.
#[derive(Debug, Clone, Copy)]
struct Center {
    lab: [f64; 3],
    y: f64,
    x: f64,
}

/// SLIC superpixels.
///
/// The image is blurred with [`SUPERPIXEL_SIGMA`], converted to CIELAB,
/// and clustered with seeds on a regular grid (see [`grid_steps`]). Each
/// pixel is assigned to the nearest centre within two grid steps per axis
/// under the distance `|Δlab|² + (compactness / S)² |Δxy|²`, where `S` is
/// the larger of the two steps.
///
/// # Errors
///
/// See [`SuperpixelGenerator::partition_into_superpixels`].
pub fn slic(
    image: &RgbImage,
    target_count: u32,
    compactness: f64,
) -> Result<LabelMap, PipelineError> {
    if target_count == 0 {
        return Err(PipelineError::InvalidConfig(
            "superpixel count must be positive".to_string(),
        ));
    }
    if !(compactness.is_finite() && compactness > 0.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "compactness must be positive and finite, got {compactness}"
        )));
    }
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return Err(PipelineError::InvalidInput(
            "cannot compute superpixels of an empty image".to_string(),
        ));
    }

    let blurred = gaussian_blur_rgb(image, SUPERPIXEL_SIGMA);
    let lab = to_lab(&blurred);

    let steps = grid_steps(w, h, target_count);
    let mut centers = seed_centers(&lab, w, h, steps);
    log::debug!(
        "slic: {} seeds for target {target_count} (steps {}x{})",
        centers.len(),
        steps.0,
        steps.1,
    );

    #[allow(clippy::cast_precision_loss)]
    let spatial_weight = (compactness / steps.0.max(steps.1) as f64).powi(2);
    let mut labels = vec![u32::MAX; w * h];
    for iteration in 0..SLIC_MAX_ITERATIONS {
        let assigned = assign_pixels(&lab, w, h, &centers, steps, spatial_weight);
        let converged = assigned == labels;
        labels = assigned;
        if converged {
            log::debug!("slic: converged after {iteration} iterations");
            break;
        }
        update_centers(&lab, w, &labels, &mut centers);
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let min_size =
        ((MIN_SEGMENT_FRACTION * (w * h) as f64 / centers.len().max(1) as f64) as usize).max(1);
    let labels = enforce_connectivity(&labels, w, h, min_size);
    LabelMap::from_row_major(h, w, labels)
}

/// Convert every pixel to CIELAB (D65), row-major.
fn to_lab(image: &RgbImage) -> Vec<[f64; 3]> {
    image
        .pixels()
        .map(|p| {
            let srgb: Srgb<f32> = Srgb::new(
                f32::from(p.0[0]) / 255.0,
                f32::from(p.0[1]) / 255.0,
                f32::from(p.0[2]) / 255.0,
            );
            let lin: LinSrgb<f32> = srgb.into_linear();
            let lab: Lab = Lab::from_color(lin);
            [f64::from(lab.l), f64::from(lab.a), f64::from(lab.b)]
        })
        .collect()
}

/// Grid steps `(row_step, col_step)` spreading about `target_count` seeds
/// over a `w` by `h` image.
///
/// Both steps start at `sqrt(w·h / target_count)`. When that exceeds the
/// shorter axis, the shorter step is clamped to the axis length and the
/// longer axis alone carries `target_count` seeds, so elongated images
/// still get one seed row.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn grid_steps(w: usize, h: usize, target_count: u32) -> (usize, usize) {
    let n = f64::from(target_count);
    let square = ((w * h) as f64 / n).sqrt();
    let (short, long) = (w.min(h) as f64, w.max(h) as f64);
    let (short_step, long_step) = if square > short {
        (short, long / n)
    } else {
        (square, square)
    };
    let short_step = (short_step.round() as usize).max(1);
    let long_step = (long_step.round() as usize).max(1);
    if h <= w {
        (short_step, long_step)
    } else {
        (long_step, short_step)
    }
}

/// Place seeds on a regular grid at `step/2 + k·step` along each axis.
fn seed_centers(
    lab: &[[f64; 3]],
    w: usize,
    h: usize,
    (row_step, col_step): (usize, usize),
) -> Vec<Center> {
    let mut centers = Vec::new();
    for row in (row_step / 2..h).step_by(row_step) {
        for col in (col_step / 2..w).step_by(col_step) {
            #[allow(clippy::cast_precision_loss)]
            let (y, x) = (row as f64, col as f64);
            centers.push(Center {
                lab: lab[row * w + col],
                y,
                x,
            });
        }
    }
    centers
}

/// One assignment pass: every pixel gets the index of its nearest centre.
fn assign_pixels(
    lab: &[[f64; 3]],
    w: usize,
    h: usize,
    centers: &[Center],
    (row_step, col_step): (usize, usize),
    spatial_weight: f64,
) -> Vec<u32> {
    let mut labels = vec![u32::MAX; w * h];
    let mut best = vec![f64::INFINITY; w * h];
    #[allow(clippy::cast_precision_loss)]
    let (reach_y, reach_x) = (2.0 * row_step as f64, 2.0 * col_step as f64);

    for (k, center) in centers.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (y0, y1, x0, x1) = (
            (center.y - reach_y).floor().max(0.0) as usize,
            ((center.y + reach_y).ceil() as usize).min(h - 1),
            (center.x - reach_x).floor().max(0.0) as usize,
            ((center.x + reach_x).ceil() as usize).min(w - 1),
        );
        #[allow(clippy::cast_possible_truncation)]
        let label = k as u32;
        for row in y0..=y1 {
            for col in x0..=x1 {
                let i = row * w + col;
                let d = distance(center, lab[i], row, col, spatial_weight);
                if d < best[i] {
                    best[i] = d;
                    labels[i] = label;
                }
            }
        }
    }

    // Pixels outside every window fall back to a full scan.
    for (i, label) in labels.iter_mut().enumerate() {
        if *label != u32::MAX {
            continue;
        }
        let (row, col) = (i / w, i % w);
        let nearest = centers
            .iter()
            .map(|c| distance(c, lab[i], row, col, spatial_weight))
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(0, |(k, _)| k);
        *label = u32::try_from(nearest).unwrap_or(0);
    }
    labels
}

fn distance(center: &Center, lab: [f64; 3], row: usize, col: usize, spatial_weight: f64) -> f64 {
    let color: f64 = center
        .lab
        .iter()
        .zip(lab)
        .map(|(c, p)| (c - p).powi(2))
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let spatial = (center.y - row as f64).powi(2) + (center.x - col as f64).powi(2);
    spatial_weight.mul_add(spatial, color)
}

/// Move every centre to the mean of its members. Empty clusters keep
/// their previous centre.
fn update_centers(lab: &[[f64; 3]], w: usize, labels: &[u32], centers: &mut [Center]) {
    let mut sums = vec![[0.0_f64; 5]; centers.len()];
    let mut counts = vec![0_usize; centers.len()];
    for (i, &label) in labels.iter().enumerate() {
        let k = label as usize;
        let Some(sum) = sums.get_mut(k) else {
            continue;
        };
        #[allow(clippy::cast_precision_loss)]
        let (row, col) = ((i / w) as f64, (i % w) as f64);
        sum[0] += lab[i][0];
        sum[1] += lab[i][1];
        sum[2] += lab[i][2];
        sum[3] += row;
        sum[4] += col;
        counts[k] += 1;
    }
    for ((center, sum), &count) in centers.iter_mut().zip(&sums).zip(&counts) {
        if count == 0 {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = count as f64;
        center.lab = [sum[0] / n, sum[1] / n, sum[2] / n];
        center.y = sum[3] / n;
        center.x = sum[4] / n;
    }
}

/// Relabel 4-connected components in raster order.
///
/// A component smaller than `min_size` is merged into the already
/// relabelled left or upper neighbour of its first pixel. The returned
/// labels are contiguous from 0.
fn enforce_connectivity(labels: &[u32], w: usize, h: usize, min_size: usize) -> Vec<u32> {
    let mut out = vec![u32::MAX; labels.len()];
    let mut next_label = 0_u32;
    let mut queue = VecDeque::new();
    let mut component = Vec::new();

    for start in 0..labels.len() {
        if out[start] != u32::MAX {
            continue;
        }
        let (row, col) = (start / w, start % w);
        let adjacent = if col > 0 {
            Some(out[start - 1])
        } else if row > 0 {
            Some(out[start - w])
        } else {
            None
        };

        let old = labels[start];
        component.clear();
        out[start] = next_label;
        queue.push_back(start);
        while let Some(i) = queue.pop_front() {
            component.push(i);
            let (r, c) = (i / w, i % w);
            let neighbours = [
                (r > 0).then(|| i - w),
                (r + 1 < h).then(|| i + w),
                (c > 0).then(|| i - 1),
                (c + 1 < w).then(|| i + 1),
            ];
            for j in neighbours.into_iter().flatten() {
                if out[j] == u32::MAX && labels[j] == old {
                    out[j] = next_label;
                    queue.push_back(j);
                }
            }
        }

        match adjacent {
            Some(target) if component.len() < min_size => {
                for &i in &component {
                    out[i] = target;
                }
            }
            _ => next_label += 1,
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn gray(w: u32, h: u32, f: impl Fn(u32, u32) -> u8) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = f(x, y);
            image::Rgb([v, v, v])
        })
    }

    /// Every label must occupy exactly one 4-connected component.
    fn assert_labels_connected(map: &LabelMap) {
        let labels = map.as_array();
        let (rows, cols) = labels.dim();
        let mut seen = vec![false; rows * cols];
        let mut components_per_label = std::collections::BTreeMap::<u32, usize>::new();
        for start in 0..rows * cols {
            if seen[start] {
                continue;
            }
            let label = labels[[start / cols, start % cols]];
            *components_per_label.entry(label).or_default() += 1;
            let mut stack = vec![start];
            seen[start] = true;
            while let Some(i) = stack.pop() {
                let (r, c) = (i / cols, i % cols);
                let mut visit = |rr: usize, cc: usize| {
                    let j = rr * cols + cc;
                    if !seen[j] && labels[[rr, cc]] == label {
                        seen[j] = true;
                        stack.push(j);
                    }
                };
                if r > 0 {
                    visit(r - 1, c);
                }
                if r + 1 < rows {
                    visit(r + 1, c);
                }
                if c > 0 {
                    visit(r, c - 1);
                }
                if c + 1 < cols {
                    visit(r, c + 1);
                }
            }
        }
        for (label, count) in components_per_label {
            assert_eq!(count, 1, "label {label} split into {count} components");
        }
    }

    fn assert_contiguous(map: &LabelMap) {
        let labels = map.distinct_labels();
        let n = u32::try_from(labels.len()).unwrap();
        assert_eq!(labels, (0..n).collect::<BTreeSet<u32>>());
    }

    #[test]
    fn default_is_slic() {
        assert_eq!(SuperpixelKind::default(), SuperpixelKind::Slic);
    }

    #[test]
    fn uniform_image_splits_into_grid() {
        let img = gray(20, 20, |_, _| 100);
        let map = slic(&img, 4, 2.0).unwrap();
        assert_eq!(map.shape(), (20, 20));
        assert_eq!(map.distinct_count(), 4);
        assert_contiguous(&map);
        assert_labels_connected(&map);
    }

    #[test]
    fn single_superpixel_covers_image() {
        let img = gray(16, 12, |x, y| u8::try_from((x * 13 + y * 7) % 256).unwrap());
        let map = slic(&img, 1, 2.0).unwrap();
        assert_eq!(map.distinct_count(), 1);
        assert!(map.as_array().iter().all(|&l| l == 0));
    }

    #[test]
    fn boundary_separates_dark_and_bright_halves() {
        let img = gray(40, 20, |x, _| if x < 20 { 0 } else { 255 });
        let map = slic(&img, 2, 2.0).unwrap();
        let labels = map.as_array();
        for row in 0..20 {
            assert_ne!(labels[[row, 2]], labels[[row, 37]]);
        }
    }

    #[test]
    fn more_targets_than_pixels_is_bounded_by_pixel_count() {
        let img = gray(3, 3, |x, y| u8::try_from(x * 80 + y * 10).unwrap());
        let map = slic(&img, 100, 2.0).unwrap();
        assert!(map.distinct_count() <= 9);
        assert_contiguous(&map);
    }

    #[test]
    fn labels_are_contiguous_and_connected_on_gradient() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bump = |x: u32, y: u32| {
            let dx = f64::from(x) - 24.0;
            let dy = f64::from(y) - 16.0;
            (255.0 * (-(dx * dx + dy * dy) / 200.0).exp()) as u8
        };
        let img = gray(48, 32, bump);
        let map = slic(&img, 30, 5.0).unwrap();
        assert!(map.distinct_count() >= 2);
        assert!(map.distinct_count() <= 60);
        assert_contiguous(&map);
        assert_labels_connected(&map);
    }

    #[test]
    fn wide_strip_still_gets_seeds_along_its_length() {
        let img = gray(1000, 10, |x, _| u8::try_from(x / 4).unwrap());
        let map = slic(&img, 10, 2.0).unwrap();
        assert_eq!(map.shape(), (10, 1000));
        let count = map.distinct_count();
        assert!((5..=20).contains(&count), "got {count} superpixels");
        assert_contiguous(&map);
        assert_labels_connected(&map);
    }

    #[test]
    fn tall_strip_still_gets_seeds_along_its_length() {
        let img = gray(4, 400, |_, y| u8::try_from(y / 2).unwrap());
        let map = slic(&img, 20, 2.0).unwrap();
        let count = map.distinct_count();
        assert!((10..=40).contains(&count), "got {count} superpixels");
    }

    #[test]
    fn grid_steps_clamp_the_short_axis() {
        assert_eq!(grid_steps(20, 20, 4), (10, 10));
        assert_eq!(grid_steps(1000, 10, 10), (10, 100));
        assert_eq!(grid_steps(4, 400, 20), (20, 4));
        assert_eq!(grid_steps(3, 3, 100), (1, 1));
    }

    #[test]
    fn slic_is_deterministic() {
        let img = gray(30, 30, |x, y| u8::try_from((x * y) % 256).unwrap());
        let a = slic(&img, 25, 2.0).unwrap();
        let b = slic(&img, 25, 2.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_target_is_invalid_config() {
        let img = gray(4, 4, |_, _| 0);
        let result = SuperpixelKind::Slic.partition_into_superpixels(&img, 0, 2.0);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn empty_image_is_invalid_input() {
        let img = RgbImage::new(0, 5);
        let result = slic(&img, 4, 2.0);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn small_fragments_are_merged() {
        // A 2x1 island: after connectivity enforcement no component is
        // smaller than half the mean superpixel area.
        let labels = vec![
            0, 0, 0, 0, //
            0, 1, 1, 0, //
            0, 0, 0, 0, //
        ];
        let out = enforce_connectivity(&labels, 4, 3, 4);
        assert!(out.iter().all(|&l| l == 0));
    }

    #[test]
    fn split_label_becomes_two_components() {
        let labels = vec![
            0, 1, 0, //
            0, 1, 0, //
        ];
        let out = enforce_connectivity(&labels, 3, 2, 1);
        assert_eq!(out, vec![0, 1, 2, 0, 1, 2]);
    }
}
