use std::any::Any;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::{check_copy, CopyKind, Device, DeviceAllocator, DeviceContext, StreamHandle};
use crate::error::{C2Error, C2Result};
use crate::proto::DeviceOption;
use crate::tensor::{Buffer, HostBuffer};

static CPU_ALLOCATOR: Lazy<Arc<CpuAllocator>> = Lazy::new(|| Arc::new(CpuAllocator));

/// Shared host allocator.
pub fn cpu_allocator() -> Arc<dyn DeviceAllocator> {
    CPU_ALLOCATOR.clone()
}

#[derive(Debug, Default)]
pub struct CpuAllocator;

impl DeviceAllocator for CpuAllocator {
    fn device(&self) -> Device {
        Device::CPU
    }

    fn allocate(&self, bytes: usize) -> C2Result<Buffer> {
        HostBuffer::try_zeroed(bytes).map(Buffer::Host)
    }
}

/// Host execution context. Work runs inline, so the stream is always drained.
#[derive(Debug, Clone)]
pub struct CpuContext {
    random_seed: Option<u32>,
}

impl CpuContext {
    pub fn new() -> Self {
        CpuContext { random_seed: None }
    }

    pub fn from_option(option: Option<&DeviceOption>) -> Self {
        CpuContext {
            random_seed: option.and_then(|o| o.random_seed),
        }
    }

    /// Seed requested by the operator's device option, if any.
    pub fn random_seed(&self) -> Option<u32> {
        self.random_seed
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceContext for CpuContext {
    fn device(&self) -> Device {
        Device::CPU
    }

    fn allocator(&self) -> Arc<dyn DeviceAllocator> {
        cpu_allocator()
    }

    fn copy_async(
        &self,
        src: &Buffer,
        dst: &mut Buffer,
        bytes: usize,
        kind: CopyKind,
    ) -> C2Result<()> {
        if kind != CopyKind::HostToHost {
            return Err(C2Error::execution(format!(
                "cpu context cannot perform a {kind:?} copy"
            )));
        }
        check_copy(src, dst, bytes, kind)?;
        let (Some(src), Some(dst)) = (src.host_bytes(), dst.host_bytes_mut()) else {
            return Err(C2Error::execution("host copy on non-host buffers"));
        };
        dst[..bytes].copy_from_slice(&src[..bytes]);
        Ok(())
    }

    fn synchronize(&self) -> C2Result<()> {
        Ok(())
    }

    fn stream(&self) -> StreamHandle {
        StreamHandle::new(Device::CPU, 0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
