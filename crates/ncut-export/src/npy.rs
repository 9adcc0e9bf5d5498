//! NumPy `.npy` serializer.
//!
//! Histograms arrive as `.npy` files of any common numeric dtype and are
//! widened to `f64` before segmentation. Mask stacks are written back as
//! little-endian `u32` (`<u4`).

use ncut_pipeline::MaskStack;
use ndarray::{Array2, Array3, ArrayBase, Data, Dimension};
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement, WritableElement, WriteNpyExt};

use crate::ExportError;

/// Serialize any array to `.npy` bytes.
fn encode<A, S, D>(array: &ArrayBase<S, D>) -> Result<Vec<u8>, ExportError>
where
    A: WritableElement,
    S: Data<Elem = A>,
    D: Dimension,
{
    let mut bytes = Vec::new();
    array.write_npy(&mut bytes)?;
    Ok(bytes)
}

/// Serialize a 2D array to `.npy` bytes.
///
/// # Errors
///
/// Returns [`ExportError::NpyWrite`] if the header or payload cannot be
/// produced.
pub fn encode_array2<A: WritableElement>(array: &Array2<A>) -> Result<Vec<u8>, ExportError> {
    encode(array)
}

/// Serialize a 3D array to `.npy` bytes.
///
/// # Errors
///
/// Returns [`ExportError::NpyWrite`] if the header or payload cannot be
/// produced.
pub fn encode_array3<A: WritableElement>(array: &Array3<A>) -> Result<Vec<u8>, ExportError> {
    encode(array)
}

/// Serialize a mask stack as a `(rows, cols, depths)` `u32` array.
///
/// # Errors
///
/// See [`encode_array3`].
pub fn encode_mask_stack(masks: &MaskStack) -> Result<Vec<u8>, ExportError> {
    encode_array3(masks.as_array())
}

/// Element types accepted on input, widened to `f64`.
trait Widen: ReadableElement + Copy {
    fn widen(self) -> f64;
}

macro_rules! impl_widen_lossless {
    ($($t:ty),*) => {
        $(impl Widen for $t {
            fn widen(self) -> f64 {
                f64::from(self)
            }
        })*
    };
}

impl_widen_lossless!(f64, f32, i32, u32, u16, u8);

impl Widen for i64 {
    #[allow(clippy::cast_precision_loss)]
    fn widen(self) -> f64 {
        self as f64
    }
}

impl Widen for u64 {
    #[allow(clippy::cast_precision_loss)]
    fn widen(self) -> f64 {
        self as f64
    }
}

/// Try to read `bytes` as a 2D array of `A`.
///
/// `Ok(None)` means the payload has a different dtype and the next
/// candidate should be tried.
fn read_as<A: Widen>(bytes: &[u8]) -> Result<Option<Array2<f64>>, ReadNpyError> {
    match Array2::<A>::read_npy(bytes) {
        Ok(array) => Ok(Some(array.mapv(Widen::widen))),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

type Reader = fn(&[u8]) -> Result<Option<Array2<f64>>, ReadNpyError>;

const READERS: [Reader; 8] = [
    read_as::<f64>,
    read_as::<f32>,
    read_as::<i64>,
    read_as::<i32>,
    read_as::<u64>,
    read_as::<u32>,
    read_as::<u16>,
    read_as::<u8>,
];

/// Parse `.npy` bytes holding a 2D numeric array into `f64`.
///
/// Accepted dtypes: `f64`, `f32`, `i64`, `i32`, `u64`, `u32`, `u16`,
/// `u8`. 64-bit integers beyond 2^53 lose precision.
///
/// # Errors
///
/// Returns [`ExportError::NpyRead`] for a malformed file or an array that
/// is not 2D, and [`ExportError::InvalidData`] for an unsupported dtype.
pub fn decode_array2_f64(bytes: &[u8]) -> Result<Array2<f64>, ExportError> {
    for read in READERS {
        if let Some(array) = read(bytes)? {
            return Ok(array);
        }
    }
    Err(ExportError::InvalidData(
        "unsupported .npy dtype (expected f64, f32, i64, i32, u64, u32, u16 or u8)".to_owned(),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ndarray::{Array1, array};

    fn header(bytes: &[u8]) -> String {
        String::from_utf8_lossy(&bytes[..bytes.len().min(128)]).into_owned()
    }

    #[test]
    fn mask_stack_header_is_little_endian_u32() {
        let masks = MaskStack::new(Array3::from_shape_fn((2, 3, 4), |(r, c, d)| {
            u32::try_from(r + c + d).unwrap()
        }));
        let bytes = encode_mask_stack(&masks).unwrap();
        assert!(bytes.starts_with(b"\x93NUMPY"));
        let header = header(&bytes);
        assert!(header.contains("'descr': '<u4'"), "{header}");
        assert!(header.contains("(2, 3, 4)"), "{header}");
    }

    #[test]
    fn decode_widens_integer_counts() {
        let counts: Array2<u8> = array![[0, 1, 2], [250, 251, 255]];
        let bytes = encode_array2(&counts).unwrap();
        let decoded = decode_array2_f64(&bytes).unwrap();
        assert_eq!(decoded, counts.mapv(f64::from));
    }

    #[test]
    fn decode_widens_f32() {
        let values: Array2<f32> = array![[0.5, 1.25], [3.0, -2.0]];
        let bytes = encode_array2(&values).unwrap();
        let decoded = decode_array2_f64(&bytes).unwrap();
        assert_eq!(decoded, values.mapv(f64::from));
    }

    #[test]
    fn decode_i64_histogram() {
        let counts: Array2<i64> = array![[7, 0], [0, 1_000_000]];
        let bytes = encode_array2(&counts).unwrap();
        let decoded = decode_array2_f64(&bytes).unwrap();
        assert!((decoded[[1, 1]] - 1_000_000.0).abs() < f64::EPSILON);
        assert_eq!(decoded.dim(), (2, 2));
    }

    #[test]
    fn decode_rejects_one_dimensional_array() {
        let line = Array1::<f64>::zeros(5);
        let mut bytes = Vec::new();
        line.write_npy(&mut bytes).unwrap();
        let result = decode_array2_f64(&bytes);
        assert!(matches!(result, Err(ExportError::NpyRead(_))));
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = decode_array2_f64(b"not an npy file");
        assert!(matches!(result, Err(ExportError::NpyRead(_))));
    }

    #[test]
    fn decode_rejects_unsupported_dtype() {
        let flags = array![[true, false], [false, true]];
        let bytes = encode_array2(&flags).unwrap();
        let result = decode_array2_f64(&bytes);
        assert!(matches!(result, Err(ExportError::InvalidData(_))));
    }
}
