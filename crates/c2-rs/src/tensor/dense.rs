//! Typed, shaped, contiguous tensor owning a buffer on one device.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::SmallVec;

use super::dtype::DataType;
use super::element::TensorElement;
use super::storage::Buffer;
use crate::context::{cpu_allocator, CopyKind, Device, DeviceAllocator, DeviceContext};
use crate::error::{C2Error, C2Result};

pub type Dims = SmallVec<[usize; 4]>;

/// Element count of `dims`, or `ShapeMismatch` when the product does not fit in `usize`.
pub fn checked_numel(dims: &[usize]) -> C2Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| {
            C2Error::shape_mismatch(format!("element count of dims {dims:?} overflows"))
        })
}

fn checked_nbytes(dims: &[usize], dtype: DataType) -> C2Result<usize> {
    checked_numel(dims)?
        .checked_mul(dtype.size_in_bytes().unwrap_or(0))
        .ok_or_else(|| C2Error::shape_mismatch(format!("byte size of dims {dims:?} overflows")))
}

/// Typed address of tensor memory, handed to kernels.
///
/// For host tensors `addr` is a host pointer; for device tensors it is the backend's device
/// address. `len` counts elements, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPtr<T> {
    pub addr: u64,
    pub len: usize,
    pub device: Device,
    _marker: PhantomData<T>,
}

/// Dense tensor.
///
/// Capacity is sticky: [`Tensor::resize`] only changes the logical shape, and memory is
/// (re)allocated lazily by [`Tensor::mutable_data`] when the new byte size exceeds what the
/// current buffer holds. Shrinking never frees.
pub struct Tensor {
    dtype: DataType,
    dims: Dims,
    buffer: Option<Buffer>,
    allocator: Arc<dyn DeviceAllocator>,
}

impl Tensor {
    /// Empty tensor (`dims == [0]`, undefined element type) allocating through `allocator`.
    pub fn new(allocator: Arc<dyn DeviceAllocator>) -> Self {
        Tensor {
            dtype: DataType::Undefined,
            dims: SmallVec::from_slice(&[0]),
            buffer: None,
            allocator,
        }
    }

    /// Empty host tensor.
    pub fn cpu() -> Self {
        Tensor::new(cpu_allocator())
    }

    /// Host tensor holding `data` with shape `dims`.
    pub fn from_vec<T: TensorElement>(dims: &[usize], data: Vec<T>) -> C2Result<Self> {
        Tensor::from_slice(dims, &data)
    }

    pub fn from_slice<T: TensorElement>(dims: &[usize], data: &[T]) -> C2Result<Self> {
        let numel = checked_numel(dims)?;
        if numel != data.len() {
            return Err(C2Error::shape_mismatch(format!(
                "{} values do not fill dims {:?}",
                data.len(),
                dims
            )));
        }
        let mut tensor = Tensor::cpu();
        tensor.resize_with_dtype(dims, T::DTYPE)?;
        tensor.mutable_data::<T>()?.copy_from_slice(data);
        Ok(tensor)
    }

    /// Rank-0 host tensor.
    pub fn scalar<T: TensorElement>(value: T) -> C2Result<Self> {
        Tensor::from_slice(&[], &[value])
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Size of axis `axis`, failing for out-of-range axes.
    pub fn dim(&self, axis: usize) -> C2Result<usize> {
        self.dims.get(axis).copied().ok_or_else(|| {
            C2Error::shape_mismatch(format!(
                "axis {axis} out of range for tensor of rank {}",
                self.dims.len()
            ))
        })
    }

    /// Number of elements; a rank-0 tensor holds one.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Logical byte size, `numel * element size`.
    pub fn nbytes(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes().unwrap_or(0)
    }

    /// Bytes held by the current buffer, which can exceed [`nbytes`](Self::nbytes).
    pub fn capacity_bytes(&self) -> usize {
        self.buffer.as_ref().map(Buffer::len).unwrap_or(0)
    }

    pub fn device(&self) -> Device {
        self.allocator.device()
    }

    pub fn allocator(&self) -> &Arc<dyn DeviceAllocator> {
        &self.allocator
    }

    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    /// Backing buffer sized for the current shape, allocated on first use. Lets backends hand
    /// device memory to their own routines without a typed view.
    pub fn buffer_mut(&mut self) -> C2Result<&mut Buffer> {
        if self.dtype.size_in_bytes().is_none() {
            return Err(C2Error::type_mismatch(
                "tensor element type must be declared before allocating",
            ));
        }
        self.ensure_capacity()?;
        self.buffer
            .as_mut()
            .ok_or_else(|| C2Error::execution("tensor has no elements to allocate"))
    }

    /// Changes the logical shape. The buffer is dropped only when it is too small for the new
    /// shape; the next `mutable_data` call reallocates. Shapes whose byte size overflows are
    /// rejected and leave the tensor unchanged.
    pub fn resize(&mut self, dims: &[usize]) -> C2Result<()> {
        let needed = checked_nbytes(dims, self.dtype)?;
        self.dims = SmallVec::from_slice(dims);
        if self.capacity_bytes() < needed {
            self.buffer = None;
        }
        Ok(())
    }

    /// Re-declares the element type and resizes. Existing capacity is reused when it suffices.
    pub fn resize_with_dtype(&mut self, dims: &[usize], dtype: DataType) -> C2Result<()> {
        if dtype.size_in_bytes().is_none() {
            return Err(C2Error::type_mismatch(format!(
                "{dtype:?} cannot be stored in a dense tensor"
            )));
        }
        checked_nbytes(dims, dtype)?;
        self.dtype = dtype;
        self.resize(dims)
    }

    /// Changes the shape without changing the element count.
    pub fn reshape(&mut self, dims: &[usize]) -> C2Result<()> {
        let numel = checked_numel(dims)?;
        if numel != self.numel() {
            return Err(C2Error::shape_mismatch(format!(
                "cannot reshape {:?} into {:?}",
                self.dims.as_slice(),
                dims
            )));
        }
        self.dims = SmallVec::from_slice(dims);
        Ok(())
    }

    /// Read-only typed view of a host-resident tensor.
    pub fn data<T: TensorElement>(&self) -> C2Result<&[T]> {
        self.check_type::<T>()?;
        let bytes = self.raw_data()?;
        T::cast_slice(bytes).ok_or_else(|| {
            C2Error::execution(format!("tensor bytes are not valid {:?} values", T::DTYPE))
        })
    }

    /// Writable typed view, allocating on first use. A tensor whose type is still undefined
    /// adopts `T`.
    pub fn mutable_data<T: TensorElement>(&mut self) -> C2Result<&mut [T]> {
        if self.dtype == DataType::Undefined {
            self.dtype = T::DTYPE;
        }
        self.check_type::<T>()?;
        let bytes = self.raw_mutable_data()?;
        T::cast_slice_mut(bytes).ok_or_else(|| {
            C2Error::execution(format!("tensor bytes are not valid {:?} values", T::DTYPE))
        })
    }

    pub fn raw_data(&self) -> C2Result<&[u8]> {
        let nbytes = self.nbytes();
        if nbytes == 0 {
            return Ok(&[]);
        }
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| C2Error::execution("tensor data read before it was allocated"))?;
        let bytes = buffer.host_bytes().ok_or_else(|| {
            C2Error::execution(format!(
                "tensor lives on {}; host view unavailable",
                buffer.device()
            ))
        })?;
        Ok(&bytes[..nbytes])
    }

    pub fn raw_mutable_data(&mut self) -> C2Result<&mut [u8]> {
        if self.dtype.size_in_bytes().is_none() {
            return Err(C2Error::type_mismatch(
                "tensor element type must be declared before writing",
            ));
        }
        let nbytes = self.nbytes();
        if nbytes == 0 {
            return Ok(&mut []);
        }
        self.ensure_capacity()?;
        let device = self.device();
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| C2Error::execution("tensor allocation vanished"))?;
        let bytes = buffer.host_bytes_mut().ok_or_else(|| {
            C2Error::execution(format!("tensor lives on {device}; host view unavailable"))
        })?;
        Ok(&mut bytes[..nbytes])
    }

    /// Typed address of the tensor's memory for kernel launches.
    pub fn device_ptr<T: TensorElement>(&self) -> C2Result<DataPtr<T>> {
        self.check_type::<T>()?;
        let len = self.numel();
        let addr = match self.buffer.as_ref() {
            Some(Buffer::Host(host)) => host.as_bytes().as_ptr() as u64,
            Some(Buffer::Device(alloc)) => alloc.device_addr(),
            None if len == 0 => 0,
            None => return Err(C2Error::execution("tensor data read before it was allocated")),
        };
        Ok(DataPtr {
            addr,
            len,
            device: self.device(),
            _marker: PhantomData,
        })
    }

    /// Like [`device_ptr`](Self::device_ptr) but allocates first and adopts `T` when undefined.
    pub fn mutable_device_ptr<T: TensorElement>(&mut self) -> C2Result<DataPtr<T>> {
        if self.dtype == DataType::Undefined {
            self.dtype = T::DTYPE;
        }
        self.check_type::<T>()?;
        self.ensure_capacity()?;
        self.device_ptr::<T>()
    }

    /// Fills every element with `value`.
    pub fn fill<T: TensorElement>(&mut self, value: T) -> C2Result<()> {
        self.mutable_data::<T>()?.fill(value);
        Ok(())
    }

    pub fn to_vec<T: TensorElement>(&self) -> C2Result<Vec<T>> {
        Ok(self.data::<T>()?.to_vec())
    }

    /// Makes `self` a copy of `src` (shape, type and contents) using `ctx` to move the bytes.
    /// Copies between devices are enqueued on `ctx`'s stream; call `ctx.synchronize()` before
    /// reading the destination from another context.
    pub fn copy_from(&mut self, src: &Tensor, ctx: &dyn DeviceContext) -> C2Result<()> {
        self.resize_with_dtype(src.dims(), src.dtype())?;
        let nbytes = self.nbytes();
        if nbytes == 0 {
            return Ok(());
        }
        let src_buffer = src
            .buffer
            .as_ref()
            .ok_or_else(|| C2Error::execution("copy source has not been allocated"))?;
        self.ensure_capacity()?;
        let kind = CopyKind::between(src.device(), self.device());
        let dst_buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| C2Error::execution("tensor allocation vanished"))?;
        ctx.copy_async(src_buffer, dst_buffer, nbytes, kind)
    }

    fn check_type<T: TensorElement>(&self) -> C2Result<()> {
        if self.dtype != T::DTYPE {
            return Err(C2Error::type_mismatch(format!(
                "tensor holds {:?}, requested {:?}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(())
    }

    fn ensure_capacity(&mut self) -> C2Result<()> {
        let needed = self.nbytes();
        if needed == 0 || self.capacity_bytes() >= needed {
            return Ok(());
        }
        self.buffer = None;
        self.buffer = Some(self.allocator.allocate(needed)?);
        Ok(())
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor::cpu()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("dtype", &self.dtype)
            .field("dims", &self.dims.as_slice())
            .field("device", &self.device())
            .field("capacity_bytes", &self.capacity_bytes())
            .finish()
    }
}
