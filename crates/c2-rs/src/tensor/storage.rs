//! Owning memory buffers backing tensors.
//!
//! A [`Buffer`] is either host memory (directly addressable from Rust) or an opaque device
//! allocation handed out by a backend's allocator. Device allocations release themselves on drop.

use std::any::Any;
use std::fmt;

use crate::context::Device;
use crate::error::{C2Error, C2Result};

/// Device-resident allocation produced by a backend allocator.
pub trait DeviceAllocation: Send + Sync + fmt::Debug {
    /// Size of the allocation in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn device(&self) -> Device;

    /// Raw device address, meaningful only to the owning backend and its kernels.
    fn device_addr(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
}

/// 8-byte aligned host memory.
#[derive(Clone, Default)]
pub struct HostBuffer {
    words: Vec<u64>,
    len: usize,
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer").field("len", &self.len).finish()
    }
}

impl HostBuffer {
    /// Allocates `len` zeroed bytes, reporting allocator refusal instead of aborting.
    pub fn try_zeroed(len: usize) -> C2Result<Self> {
        let word_count = len.div_ceil(8);
        let mut words = Vec::new();
        words.try_reserve_exact(word_count).map_err(|err| {
            C2Error::resource_exhausted(Device::CPU, len, err.to_string())
        })?;
        words.resize(word_count, 0);
        Ok(HostBuffer { words, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

/// Backing storage of a tensor.
#[derive(Debug)]
pub enum Buffer {
    Host(HostBuffer),
    Device(Box<dyn DeviceAllocation>),
}

impl Buffer {
    pub fn len(&self) -> usize {
        match self {
            Buffer::Host(host) => host.len(),
            Buffer::Device(alloc) => alloc.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn device(&self) -> Device {
        match self {
            Buffer::Host(_) => Device::CPU,
            Buffer::Device(alloc) => alloc.device(),
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Buffer::Host(_))
    }

    pub fn host_bytes(&self) -> Option<&[u8]> {
        match self {
            Buffer::Host(host) => Some(host.as_bytes()),
            Buffer::Device(_) => None,
        }
    }

    pub fn host_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Buffer::Host(host) => Some(host.as_bytes_mut()),
            Buffer::Device(_) => None,
        }
    }

    pub fn device_addr(&self) -> Option<u64> {
        match self {
            Buffer::Host(_) => None,
            Buffer::Device(alloc) => Some(alloc.device_addr()),
        }
    }

    /// Downcasts a device allocation to the backend's concrete type.
    pub fn downcast_device<T: 'static>(&self) -> Option<&T> {
        match self {
            Buffer::Device(alloc) => alloc.as_any().downcast_ref::<T>(),
            Buffer::Host(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_buffer_is_zeroed_and_exact_length() {
        let mut buffer = HostBuffer::try_zeroed(13).unwrap();
        assert_eq!(buffer.len(), 13);
        assert!(buffer.as_bytes().iter().all(|b| *b == 0));
        buffer.as_bytes_mut()[12] = 7;
        assert_eq!(buffer.as_bytes()[12], 7);
    }

    #[test]
    fn absurd_allocation_is_resource_exhausted() {
        let err = HostBuffer::try_zeroed(usize::MAX - 7).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ResourceExhausted);
    }
}
