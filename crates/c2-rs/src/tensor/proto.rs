//! Conversion between host tensors and [`TensorProto`].

use half::f16;

use super::dense::{checked_numel, Tensor};
use super::dtype::DataType;
use super::element::TensorElement;
use crate::error::{C2Error, C2Result};
use crate::proto::TensorProto;

impl Tensor {
    /// Serializes a host tensor. Device tensors must be copied to the host first.
    pub fn to_proto(&self, name: &str) -> C2Result<TensorProto> {
        let mut proto = TensorProto {
            name: name.to_string(),
            dims: self.dims().iter().map(|&d| d as i64).collect(),
            data_type: self.dtype(),
            ..Default::default()
        };
        match self.dtype() {
            DataType::Float => proto.float_data = self.to_vec::<f32>()?,
            DataType::Double => proto.double_data = self.to_vec::<f64>()?,
            DataType::Int64 => proto.int64_data = self.to_vec::<i64>()?,
            DataType::Int32 => proto.int32_data = self.to_vec::<i32>()?,
            DataType::Int16 => proto.int32_data = widen::<i16>(self)?,
            DataType::Uint16 => proto.int32_data = widen::<u16>(self)?,
            DataType::Int8 => proto.int32_data = widen::<i8>(self)?,
            DataType::Uint8 => proto.int32_data = widen::<u8>(self)?,
            DataType::Bool => {
                proto.int32_data = self.data::<bool>()?.iter().map(|&b| b as i32).collect()
            }
            DataType::Float16 => {
                proto.int32_data = self
                    .data::<f16>()?
                    .iter()
                    .map(|v| v.to_bits() as i32)
                    .collect()
            }
            DataType::Byte => proto.byte_data = self.raw_data()?.to_vec(),
            DataType::Undefined | DataType::String => {
                return Err(C2Error::type_mismatch(format!(
                    "cannot serialize a tensor of type {:?}",
                    self.dtype()
                )))
            }
        }
        Ok(proto)
    }

    /// Builds a host tensor from its serialized form. `BYTE` payloads load as `Uint8`.
    pub fn from_proto(proto: &TensorProto) -> C2Result<Tensor> {
        let dims = proto
            .dims
            .iter()
            .map(|&d| {
                usize::try_from(d)
                    .map_err(|_| C2Error::shape_mismatch(format!("negative dimension {d}")))
            })
            .collect::<C2Result<Vec<_>>>()?;
        checked_numel(&dims)?;
        match proto.data_type {
            DataType::Float => Tensor::from_slice(&dims, &proto.float_data),
            DataType::Double => Tensor::from_slice(&dims, &proto.double_data),
            DataType::Int64 => Tensor::from_slice(&dims, &proto.int64_data),
            DataType::Int32 => Tensor::from_slice(&dims, &proto.int32_data),
            DataType::Int16 => narrow::<i16>(&dims, &proto.int32_data),
            DataType::Uint16 => narrow::<u16>(&dims, &proto.int32_data),
            DataType::Int8 => narrow::<i8>(&dims, &proto.int32_data),
            DataType::Uint8 => narrow::<u8>(&dims, &proto.int32_data),
            DataType::Bool => {
                let values: Vec<bool> = proto.int32_data.iter().map(|&v| v != 0).collect();
                Tensor::from_vec(&dims, values)
            }
            DataType::Float16 => {
                let values: Vec<f16> = proto
                    .int32_data
                    .iter()
                    .map(|&v| f16::from_bits(v as u16))
                    .collect();
                Tensor::from_vec(&dims, values)
            }
            DataType::Byte => Tensor::from_slice(&dims, &proto.byte_data),
            DataType::String | DataType::Undefined => Err(C2Error::type_mismatch(format!(
                "tensor proto '{}' of type {:?} cannot become a dense tensor",
                proto.name, proto.data_type
            ))),
        }
    }
}

fn widen<T>(tensor: &Tensor) -> C2Result<Vec<i32>>
where
    T: TensorElement + Into<i32>,
{
    Ok(tensor.data::<T>()?.iter().map(|&v| v.into()).collect())
}

fn narrow<T>(dims: &[usize], values: &[i32]) -> C2Result<Tensor>
where
    T: TensorElement + TryFrom<i32>,
{
    let narrowed = values
        .iter()
        .map(|&v| {
            T::try_from(v).map_err(|_| {
                C2Error::type_mismatch(format!("value {v} does not fit in {:?}", T::DTYPE))
            })
        })
        .collect::<C2Result<Vec<T>>>()?;
    Tensor::from_vec(dims, narrowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn narrow_types_travel_through_int32_data() {
        let tensor = Tensor::from_vec(&[3], vec![-1i8, 0, 7]).unwrap();
        let proto = tensor.to_proto("x").unwrap();
        assert_eq!(proto.int32_data, vec![-1, 0, 7]);
        let back = Tensor::from_proto(&proto).unwrap();
        assert_eq!(back.data::<i8>().unwrap(), &[-1, 0, 7]);
    }

    #[test]
    fn byte_payload_loads_as_uint8() {
        let proto = TensorProto {
            dims: vec![2],
            data_type: DataType::Byte,
            byte_data: vec![9, 8],
            ..Default::default()
        };
        let tensor = Tensor::from_proto(&proto).unwrap();
        assert_eq!(tensor.dtype(), DataType::Uint8);
        assert_eq!(tensor.data::<u8>().unwrap(), &[9, 8]);
    }

    #[test]
    fn string_tensors_are_rejected() {
        let proto = TensorProto {
            dims: vec![1],
            data_type: DataType::String,
            string_data: vec![b"hi".to_vec()],
            ..Default::default()
        };
        let err = Tensor::from_proto(&proto).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn overflowing_dims_are_rejected() {
        let proto = TensorProto {
            dims: vec![i64::MAX, 4],
            data_type: DataType::Float,
            ..Default::default()
        };
        let err = Tensor::from_proto(&proto).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    }

    #[test]
    fn payload_length_must_match_dims() {
        let proto = TensorProto {
            dims: vec![2, 2],
            float_data: vec![1.0; 3],
            ..Default::default()
        };
        let err = Tensor::from_proto(&proto).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    }
}
