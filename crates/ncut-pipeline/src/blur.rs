//! Gaussian pre-filter for superpixel clustering.
//!
//! Wraps [`imageproc::filter::gaussian_blur_f32`] to smooth the
//! intensity image before SLIC, so that isolated noisy histogram bins do
//! not seed their own superpixels.
//!
//! [`gaussian_blur_rgb`] applies the same blur independently to each
//! channel of the three-channel intensity image.

use image::{GrayImage, RgbImage};

/// Fixed pre-filter sigma used by the superpixel stage.
pub const SUPERPIXEL_SIGMA: f32 = 2.0;

/// Apply Gaussian blur to an RGB image by blurring each channel
/// independently.
///
/// The image is split into three single-channel images, each is blurred
/// with `imageproc`, and the results are reassembled. Gaussian blur is a
/// linear per-channel operation, so this equals blurring in colour
/// space.
///
/// Non-positive sigma values return the image unchanged, since
/// `imageproc` panics on `sigma <= 0.0`.
#[must_use = "returns the blurred RGB image"]
pub fn gaussian_blur_rgb(image: &RgbImage, sigma: f32) -> RgbImage {
    if sigma <= 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let (w, h) = (image.width(), image.height());

    let channels: [GrayImage; 3] = std::array::from_fn(|c| {
        GrayImage::from_fn(w, h, |x, y| image::Luma([image.get_pixel(x, y).0[c]]))
    });

    let blurred: [GrayImage; 3] =
        std::array::from_fn(|c| imageproc::filter::gaussian_blur_f32(&channels[c], sigma));

    RgbImage::from_fn(w, h, |x, y| {
        image::Rgb([
            blurred[0].get_pixel(x, y).0[0],
            blurred[1].get_pixel(x, y).0[0],
            blurred[2].get_pixel(x, y).0[0],
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Intensity image with a sharp dark/bright boundary at x=5.
    fn sharp_edge_image() -> RgbImage {
        RgbImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        })
    }

    #[test]
    fn zero_sigma_returns_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur_rgb(&img, 0.0), img);
    }

    #[test]
    fn negative_sigma_returns_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur_rgb(&img, -1.0), img);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = RgbImage::new(17, 31);
        let blurred = gaussian_blur_rgb(&img, SUPERPIXEL_SIGMA);
        assert_eq!(blurred.dimensions(), (17, 31));
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let blurred = gaussian_blur_rgb(&sharp_edge_image(), SUPERPIXEL_SIGMA);
        let left = blurred.get_pixel(4, 5).0[0];
        let right = blurred.get_pixel(5, 5).0[0];
        assert!(left > 0, "expected blur to raise left-of-edge, got {left}");
        assert!(right < 255, "expected blur to lower right-of-edge, got {right}");
    }

    #[test]
    fn replicated_channels_stay_identical() {
        let img = RgbImage::from_fn(12, 9, |x, y| {
            let v = u8::try_from((x * 20 + y * 7) % 256).unwrap_or(0);
            image::Rgb([v, v, v])
        });
        let blurred = gaussian_blur_rgb(&img, SUPERPIXEL_SIGMA);
        for p in blurred.pixels() {
            assert_eq!(p.0[0], p.0[1]);
            assert_eq!(p.0[1], p.0[2]);
        }
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        let img = RgbImage::from_fn(10, 10, |_, _| image::Rgb([128, 128, 128]));
        let blurred = gaussian_blur_rgb(&img, SUPERPIXEL_SIGMA);
        for pixel in blurred.pixels() {
            let diff = i16::from(pixel.0[0]) - 128;
            assert!(diff.abs() <= 1, "expected ~128, got {}", pixel.0[0]);
        }
    }
}
