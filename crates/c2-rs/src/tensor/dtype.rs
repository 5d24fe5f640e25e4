//! Enumerates the element types a tensor can declare.

use serde::{Deserialize, Serialize};

/// Element type tag shared by tensors and the serialized schema.
///
/// Discriminants match the `TensorProto.DataType` numbering so tags survive a trip through the
/// C entry points unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    Undefined = 0,
    #[default]
    Float = 1,
    Int32 = 2,
    Byte = 3,
    String = 4,
    Bool = 5,
    Uint8 = 6,
    Int8 = 7,
    Uint16 = 8,
    Int16 = 9,
    Int64 = 10,
    Float16 = 12,
    Double = 13,
}

impl DataType {
    /// Bytes per element. `None` for `Undefined` and `String`, which have no fixed width.
    pub fn size_in_bytes(self) -> Option<usize> {
        match self {
            DataType::Undefined | DataType::String => None,
            DataType::Byte | DataType::Bool | DataType::Uint8 | DataType::Int8 => Some(1),
            DataType::Uint16 | DataType::Int16 | DataType::Float16 => Some(2),
            DataType::Float | DataType::Int32 => Some(4),
            DataType::Int64 | DataType::Double => Some(8),
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float | DataType::Float16 | DataType::Double)
    }

    /// Stable integer tag used by the schema and the C entry points.
    pub fn tag(self) -> i32 {
        self as i32
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        let dtype = match tag {
            0 => DataType::Undefined,
            1 => DataType::Float,
            2 => DataType::Int32,
            3 => DataType::Byte,
            4 => DataType::String,
            5 => DataType::Bool,
            6 => DataType::Uint8,
            7 => DataType::Int8,
            8 => DataType::Uint16,
            9 => DataType::Int16,
            10 => DataType::Int64,
            12 => DataType::Float16,
            13 => DataType::Double,
            _ => return None,
        };
        Some(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for tag in 0..16 {
            if let Some(dtype) = DataType::from_tag(tag) {
                assert_eq!(dtype.tag(), tag);
            }
        }
        assert_eq!(DataType::from_tag(11), None);
    }

    #[test]
    fn string_has_no_fixed_width() {
        assert_eq!(DataType::String.size_in_bytes(), None);
        assert_eq!(DataType::Float16.size_in_bytes(), Some(2));
    }
}
