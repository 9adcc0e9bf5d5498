//! Raster previews of histograms and label maps.
//!
//! ## Orientation
//!
//! Histogram arrays are indexed `[intensity_bin, gradient_bin]`. Previews
//! put axis 0 on the horizontal axis and axis 1 on the vertical axis with
//! the origin at the lower-left, so an `(rows, cols)` array renders as a
//! `rows` wide by `cols` tall image. Array element `[i, j]` lands on pixel
//! `(x = i, y = cols - 1 - j)`.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use ndarray::ArrayView2;

use crate::ExportError;

/// Alternating red, white, blue and black bands.
const FLAG: [[u8; 3]; 4] = [[255, 0, 0], [255, 255, 255], [0, 0, 255], [0, 0, 0]];

/// Twelve well-separated hues along a violet-to-red spectrum.
const SPECTRAL: [[u8; 3]; 12] = [
    [136, 0, 153],
    [0, 0, 221],
    [0, 119, 221],
    [0, 170, 170],
    [0, 153, 0],
    [0, 221, 0],
    [187, 255, 0],
    [238, 238, 0],
    [255, 153, 0],
    [255, 0, 0],
    [204, 0, 0],
    [204, 204, 204],
];

/// Anchor colours of a perceptually ordered black-purple-orange-yellow
/// ramp, evenly spaced over `[0, 1]`.
const INFERNO: [[u8; 3]; 5] = [
    [0, 0, 4],
    [87, 16, 110],
    [188, 55, 84],
    [249, 142, 9],
    [252, 255, 164],
];

/// How label values map to colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelPalette {
    /// Cycle through four high-contrast colours. Neighbouring labels are
    /// always distinguishable, which suits the depth animation.
    #[default]
    Flag,
    /// Cycle through twelve spectral hues.
    Spectral,
    /// Continuous ramp scaled to the largest label. Suits dense
    /// superpixel maps where cycling would alias.
    Inferno,
}

impl LabelPalette {
    /// Colour for `label` in a map whose largest label is `max_label`.
    #[must_use]
    pub fn color(self, label: u32, max_label: u32) -> Rgb<u8> {
        match self {
            Self::Flag => Rgb(FLAG[label as usize % FLAG.len()]),
            Self::Spectral => Rgb(SPECTRAL[label as usize % SPECTRAL.len()]),
            Self::Inferno => {
                let t = if max_label == 0 {
                    0.0
                } else {
                    f64::from(label.min(max_label)) / f64::from(max_label)
                };
                ramp(&INFERNO, t)
            }
        }
    }
}

/// Linear interpolation through evenly spaced anchors, `t` in `[0, 1]`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ramp(anchors: &[[u8; 3]], t: f64) -> Rgb<u8> {
    #[allow(clippy::cast_precision_loss)]
    let scaled = t.clamp(0.0, 1.0) * (anchors.len() - 1) as f64;
    let lower = (scaled.floor() as usize).min(anchors.len() - 2);
    let frac = scaled - lower as f64;
    let (a, b) = (anchors[lower], anchors[lower + 1]);
    Rgb(std::array::from_fn(|k| {
        (f64::from(a[k]) + (f64::from(b[k]) - f64::from(a[k])) * frac).round() as u8
    }))
}

/// Preview size `(width, height)` for an array of `shape`.
fn preview_size(shape: (usize, usize)) -> Result<(u32, u32), ExportError> {
    let (rows, cols) = shape;
    if rows == 0 || cols == 0 {
        return Err(ExportError::InvalidData(format!(
            "cannot render an empty {rows}x{cols} array"
        )));
    }
    let width = u32::try_from(rows)
        .map_err(|_| ExportError::InvalidData(format!("{rows} rows exceed image limits")))?;
    let height = u32::try_from(cols)
        .map_err(|_| ExportError::InvalidData(format!("{cols} columns exceed image limits")))?;
    Ok((width, height))
}

/// Array index shown at preview pixel `(x, y)`.
const fn source_index(x: u32, y: u32, height: u32) -> [usize; 2] {
    [x as usize, (height - 1 - y) as usize]
}

/// Colourise a label map.
///
/// # Errors
///
/// Returns [`ExportError::InvalidData`] for an empty map or one too large
/// for an image.
pub fn render_labels(
    labels: ArrayView2<'_, u32>,
    palette: LabelPalette,
) -> Result<RgbImage, ExportError> {
    let (width, height) = preview_size(labels.dim())?;
    let max_label = labels.iter().copied().max().unwrap_or(0);
    Ok(RgbImage::from_fn(width, height, |x, y| {
        palette.color(labels[source_index(x, y, height)], max_label)
    }))
}

/// Render a floating-point array as grayscale, stretched so its minimum
/// is black and its maximum white. Non-finite values render black.
///
/// # Errors
///
/// Returns [`ExportError::InvalidData`] for an empty array or one too
/// large for an image.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn render_grayscale(values: ArrayView2<'_, f64>) -> Result<GrayImage, ExportError> {
    let (width, height) = preview_size(values.dim())?;
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = hi - lo;
    Ok(GrayImage::from_fn(width, height, |x, y| {
        let v = values[source_index(x, y, height)];
        if !v.is_finite() || span <= 0.0 {
            return Luma([0]);
        }
        Luma([((v - lo) / span * 255.0).round().clamp(0.0, 255.0) as u8])
    }))
}

/// Encode an image as PNG bytes.
///
/// # Errors
///
/// Returns [`ExportError::Image`] if encoding fails.
pub fn encode_png(image: impl Into<DynamicImage>) -> Result<Vec<u8>, ExportError> {
    let mut bytes = Vec::new();
    image
        .into()
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
