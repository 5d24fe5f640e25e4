//! HIP device memory and execution context.
//!
//! Every [`HipContext`] owns its own stream, so work from different contexts on the same device
//! is unordered until one of them synchronizes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use c2_rs::context::{
    check_copy, CopyKind, Device, DeviceAllocator, DeviceContext, DeviceType, StreamHandle,
};
use c2_rs::error::{C2Error, C2Result};
use c2_rs::proto::DeviceOption;
use c2_rs::tensor::{Buffer, DeviceAllocation};
use tracing::warn;

use crate::driver::{self, HipRuntime};

/// One `hipMalloc` allocation, freed on drop.
pub struct HipAllocation {
    runtime: Arc<HipRuntime>,
    device: Device,
    ptr: u64,
    bytes: usize,
}

impl fmt::Debug for HipAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HipAllocation")
            .field("device", &self.device)
            .field("ptr", &self.ptr)
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl DeviceAllocation for HipAllocation {
    fn len(&self) -> usize {
        self.bytes
    }

    fn device(&self) -> Device {
        self.device
    }

    fn device_addr(&self) -> u64 {
        self.ptr
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for HipAllocation {
    fn drop(&mut self) {
        if let Err(err) = self.runtime.free(self.device, self.ptr) {
            warn!(
                device = %self.device,
                bytes = self.bytes,
                "failed to free HIP allocation: {err}"
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct HipAllocator {
    runtime: Arc<HipRuntime>,
    device: Device,
}

impl HipAllocator {
    pub fn new(device: Device) -> C2Result<Self> {
        let runtime = driver::runtime()?;
        runtime.check_device(device)?;
        Ok(HipAllocator { runtime, device })
    }
}

impl DeviceAllocator for HipAllocator {
    fn device(&self) -> Device {
        self.device
    }

    fn allocate(&self, bytes: usize) -> C2Result<Buffer> {
        let ptr = self.runtime.malloc(self.device, bytes)?;
        Ok(Buffer::Device(Box::new(HipAllocation {
            runtime: Arc::clone(&self.runtime),
            device: self.device,
            ptr,
            bytes,
        })))
    }
}

/// Execution context bound to one HIP device and a private stream.
pub struct HipContext {
    runtime: Arc<HipRuntime>,
    allocator: Arc<HipAllocator>,
    device: Device,
    stream: usize,
    random_seed: Option<u32>,
}

impl fmt::Debug for HipContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HipContext")
            .field("device", &self.device)
            .field("stream", &self.stream)
            .finish()
    }
}

impl HipContext {
    pub fn new(gpu_id: i32) -> C2Result<Self> {
        Self::on_device(Device::new(DeviceType::Hip, gpu_id), None)
    }

    /// Context for the device an operator's option names. A missing option means HIP device 0.
    pub fn from_option(option: Option<&DeviceOption>) -> C2Result<Self> {
        let device = match option {
            Some(option) => Device::from_option(option)?,
            None => Device::new(DeviceType::Hip, 0),
        };
        if device.kind != DeviceType::Hip {
            return Err(C2Error::configuration(format!(
                "HIP context requested for {device}"
            )));
        }
        Self::on_device(device, option.and_then(|o| o.random_seed))
    }

    fn on_device(device: Device, random_seed: Option<u32>) -> C2Result<Self> {
        let allocator = Arc::new(HipAllocator::new(device)?);
        let runtime = Arc::clone(&allocator.runtime);
        let stream = runtime.stream_create(device)?;
        Ok(HipContext {
            runtime,
            allocator,
            device,
            stream,
            random_seed,
        })
    }

    pub fn random_seed(&self) -> Option<u32> {
        self.random_seed
    }

    /// Enqueues a byte fill of the first `bytes` bytes of a device buffer.
    pub fn memset_async(&self, dst: &mut Buffer, value: u8, bytes: usize) -> C2Result<()> {
        let addr = dst
            .device_addr()
            .ok_or_else(|| C2Error::execution("memset target is not device memory"))?;
        if bytes > dst.len() {
            return Err(C2Error::execution(format!(
                "memset of {bytes} bytes exceeds a {}-byte buffer",
                dst.len()
            )));
        }
        // SAFETY: `addr` is a live device allocation of at least `bytes` bytes.
        unsafe { self.runtime.memset_async(addr, value, bytes, self.stream) }
    }
}

fn buffer_addr(buffer: &Buffer) -> u64 {
    match buffer.host_bytes() {
        Some(bytes) => bytes.as_ptr() as u64,
        None => buffer.device_addr().unwrap_or(0),
    }
}

impl DeviceContext for HipContext {
    fn device(&self) -> Device {
        self.device
    }

    fn allocator(&self) -> Arc<dyn DeviceAllocator> {
        self.allocator.clone()
    }

    fn copy_async(
        &self,
        src: &Buffer,
        dst: &mut Buffer,
        bytes: usize,
        kind: CopyKind,
    ) -> C2Result<()> {
        check_copy(src, dst, bytes, kind)?;
        if bytes == 0 {
            return Ok(());
        }
        for device in [src.device(), dst.device()] {
            if !device.is_host() && device.kind != DeviceType::Hip {
                return Err(C2Error::execution(format!(
                    "HIP context cannot copy {device} memory"
                )));
            }
        }
        let dst_addr = match dst.host_bytes_mut() {
            Some(bytes) => bytes.as_mut_ptr() as u64,
            None => buffer_addr(dst),
        };
        // SAFETY: both ranges were validated by `check_copy`; callers keep host buffers alive
        // until the stream is synchronized.
        unsafe {
            self.runtime
                .memcpy_async(dst_addr, buffer_addr(src), bytes, kind, self.stream)
        }
    }

    fn synchronize(&self) -> C2Result<()> {
        self.runtime.stream_synchronize(self.stream)
    }

    fn stream(&self) -> StreamHandle {
        StreamHandle::new(self.device, self.stream)
    }

    fn switch_to_device(&self) -> C2Result<()> {
        self.runtime.set_device(self.device)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for HipContext {
    fn drop(&mut self) {
        let result = self
            .synchronize()
            .and_then(|_| self.runtime.stream_destroy(self.stream));
        if let Err(err) = result {
            warn!(device = %self.device, "failed to release HIP stream: {err}");
        }
    }
}
