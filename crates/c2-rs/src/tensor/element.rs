//! Scalar element trait implemented by every type a tensor can hold.

use std::fmt;

use half::f16;

use super::dtype::DataType;

/// Maps a Rust scalar onto its [`DataType`] tag and reinterprets raw tensor bytes as `Self`.
///
/// Host buffers are 8-byte aligned, so the casts only fail when the byte length is not a
/// multiple of the element size or (for `bool`) when a byte holds something other than 0/1.
pub trait TensorElement: Copy + Default + PartialEq + Send + Sync + fmt::Debug + 'static {
    const DTYPE: DataType;

    fn cast_slice(bytes: &[u8]) -> Option<&[Self]>;

    fn cast_slice_mut(bytes: &mut [u8]) -> Option<&mut [Self]>;
}

macro_rules! pod_element {
    ($($ty:ty => $dtype:ident),+ $(,)?) => {
        $(
            impl TensorElement for $ty {
                const DTYPE: DataType = DataType::$dtype;

                fn cast_slice(bytes: &[u8]) -> Option<&[Self]> {
                    bytemuck::try_cast_slice(bytes).ok()
                }

                fn cast_slice_mut(bytes: &mut [u8]) -> Option<&mut [Self]> {
                    bytemuck::try_cast_slice_mut(bytes).ok()
                }
            }
        )+
    };
}

pod_element!(
    f32 => Float,
    f64 => Double,
    f16 => Float16,
    i32 => Int32,
    i64 => Int64,
    i16 => Int16,
    i8 => Int8,
    u16 => Uint16,
    u8 => Uint8,
);

impl TensorElement for bool {
    const DTYPE: DataType = DataType::Bool;

    fn cast_slice(bytes: &[u8]) -> Option<&[Self]> {
        bytemuck::checked::try_cast_slice(bytes).ok()
    }

    fn cast_slice_mut(bytes: &mut [u8]) -> Option<&mut [Self]> {
        bytemuck::checked::try_cast_slice_mut(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_rejects_invalid_bytes() {
        let bytes = [0u8, 1, 2];
        assert!(bool::cast_slice(&bytes).is_none());
        assert_eq!(bool::cast_slice(&bytes[..2]), Some(&[false, true][..]));
    }
}
