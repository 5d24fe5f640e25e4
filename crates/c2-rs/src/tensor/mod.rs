//! Dense tensors, their element types and backing buffers.
//!
//! A [`Tensor`] keeps an allocator handle for its device so operators can resize outputs and let
//! the tensor grow its buffer lazily. Host tensors are readable through typed slices; device
//! tensors expose typed addresses for kernels via [`Tensor::device_ptr`].

mod dense;
pub mod dtype;
mod element;
mod proto;
pub mod storage;

pub use dense::{checked_numel, DataPtr, Dims, Tensor};
pub use dtype::DataType;
pub use element::TensorElement;
pub use storage::{Buffer, DeviceAllocation, HostBuffer};
