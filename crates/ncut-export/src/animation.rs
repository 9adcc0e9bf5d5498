//! Animated GIF of the mask stack, one frame per recursion depth.

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, RgbImage};
use ncut_pipeline::MaskStack;

use crate::ExportError;
use crate::render::{LabelPalette, render_labels};

/// Time each depth stays on screen.
pub const DEFAULT_FRAME_DELAY_MS: u32 = 750;

/// Colourise every depth slice of `masks`, shallowest first.
///
/// # Errors
///
/// Propagates [`render_labels`] errors.
pub fn render_depth_frames(
    masks: &MaskStack,
    palette: LabelPalette,
) -> Result<Vec<RgbImage>, ExportError> {
    masks
        .frames()
        .map(|(_, slice)| render_labels(slice, palette))
        .collect()
}

/// Encode `frames` as a GIF that loops forever, showing each frame for
/// `delay_ms` milliseconds.
///
/// # Errors
///
/// Returns [`ExportError::InvalidData`] when `frames` is empty or the
/// frames differ in size, and [`ExportError::Image`] if encoding fails.
pub fn encode_gif(frames: &[RgbImage], delay_ms: u32) -> Result<Vec<u8>, ExportError> {
    let Some(first) = frames.first() else {
        return Err(ExportError::InvalidData(
            "animation needs at least one frame".to_owned(),
        ));
    };
    if let Some(odd) = frames.iter().find(|f| f.dimensions() != first.dimensions()) {
        let (w, h) = odd.dimensions();
        let (fw, fh) = first.dimensions();
        return Err(ExportError::InvalidData(format!(
            "frame size {w}x{h} differs from first frame {fw}x{fh}"
        )));
    }

    let delay = Delay::from_numer_denom_ms(delay_ms, 1);
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder.set_repeat(Repeat::Infinite)?;
        for frame in frames {
            let rgba = DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
            encoder.encode_frame(Frame::from_parts(rgba, 0, 0, delay))?;
        }
    }
    Ok(bytes)
}
