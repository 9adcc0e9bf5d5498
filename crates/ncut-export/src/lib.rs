//! ncut-export: Pure format serializers (sans-IO)
//!
//! Converts pipeline arrays into output formats and back. Every function
//! here works on in-memory buffers; the caller decides where the bytes
//! come from and where they go.
//!
//! - [`npy`]: NumPy `.npy` encode/decode
//! - [`naming`]: output file-name derivation
//! - [`render`]: label-map and histogram previews as PNG
//! - [`animation`]: animated GIF cycling through recursion depths

pub mod animation;
pub mod naming;
pub mod npy;
pub mod render;

pub use animation::{DEFAULT_FRAME_DELAY_MS, encode_gif, render_depth_frames};
pub use naming::{output_file_name, output_stem};
pub use npy::{decode_array2_f64, encode_array2, encode_array3, encode_mask_stack};
pub use render::{LabelPalette, encode_png, render_grayscale, render_labels};

/// Errors produced while serializing or parsing export formats.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The `.npy` payload could not be parsed.
    #[error("failed to read .npy data: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    /// The array could not be written as `.npy`.
    #[error("failed to write .npy data: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    /// PNG or GIF encoding failed.
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    /// The data is structurally valid but unusable (e.g. zero frames).
    #[error("invalid export data: {0}")]
    InvalidData(String),
}
