//! Array preprocessing: raw floating-point histogram to 8-bit image.
//!
//! Very high values are truncated at a percentile so that the 8-bit
//! conversion keeps precision for the bulk of the distribution. The
//! clipped array is scaled so its maximum maps to 255, rounded, and
//! replicated into three identical channels because the superpixel
//! stage expects a colour image.

use image::{Rgb, RgbImage};
use ndarray::Array2;

use crate::types::{Dimensions, PipelineError};

/// Percentile of `values` using linear interpolation between the two
/// closest ranks.
///
/// `q` is in percent (`0.0..=100.0`). Returns `None` for an empty slice
/// or a `q` outside that range.
#[must_use]
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&q) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    #[allow(clippy::cast_precision_loss)]
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    #[allow(clippy::cast_precision_loss)]
    let frac = rank - lower as f64;
    Some((sorted[upper] - sorted[lower]).mul_add(frac, sorted[lower]))
}

/// Clip `raw` at its `clip_percentile` and rescale to `0..=255`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `clip_percentile` is not
/// in `(0, 100]`. Returns [`PipelineError::InvalidInput`] if the array
/// is empty, contains non-finite values, or its maximum after clipping
/// is not positive (the rescale would divide by zero).
pub fn clip_and_rescale(
    raw: &Array2<f64>,
    clip_percentile: f64,
) -> Result<Array2<u8>, PipelineError> {
    if !(clip_percentile > 0.0 && clip_percentile <= 100.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "clip_percentile must be in (0, 100], got {clip_percentile}"
        )));
    }
    if raw.is_empty() {
        return Err(PipelineError::InvalidInput("array is empty".to_string()));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::InvalidInput(
            "array contains NaN or infinite values".to_string(),
        ));
    }

    let values: Vec<f64> = raw.iter().copied().collect();
    let ceiling = percentile(&values, clip_percentile).ok_or_else(|| {
        PipelineError::InvalidInput("could not compute clip percentile".to_string())
    })?;
    let clipped = raw.mapv(|v| v.min(ceiling));

    let max = clipped.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max <= 0.0 {
        return Err(PipelineError::InvalidInput(format!(
            "maximum after clipping is {max}; cannot rescale to 8 bits"
        )));
    }

    let scale = 255.0 / max;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let scaled = clipped.mapv(|v| (scale * v).round_ties_even().clamp(0.0, 255.0) as u8);
    Ok(scaled)
}

/// Replicate a single-channel 8-bit array into an RGB image.
///
/// Array rows become image rows (`y`), columns become `x`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if an axis does not fit in a
/// `u32`.
pub fn replicate_channels(gray: &Array2<u8>) -> Result<RgbImage, PipelineError> {
    let (rows, cols) = gray.dim();
    let dims = Dimensions::from_shape(rows, cols)?;
    Ok(RgbImage::from_fn(dims.width, dims.height, |x, y| {
        let v = gray[[y as usize, x as usize]];
        Rgb([v, v, v])
    }))
}

/// Full preprocessing step: clip, rescale, and replicate to RGB.
///
/// # Errors
///
/// See [`clip_and_rescale`] and [`replicate_channels`].
pub fn to_intensity_image(
    raw: &Array2<f64>,
    clip_percentile: f64,
) -> Result<RgbImage, PipelineError> {
    let gray = clip_and_rescale(raw, clip_percentile)?;
    replicate_channels(&gray)
}
