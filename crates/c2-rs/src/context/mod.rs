//! Device identity and the execution-context contract.
//!
//! A [`DeviceContext`] owns an ordering queue (stream) on one device. Work submitted through a
//! context runs in submission order; ordering across contexts needs an explicit
//! [`DeviceContext::synchronize`]. Allocation goes through a [`DeviceAllocator`], which tensors
//! keep so they can grow their buffers later without holding on to the whole context.

mod cpu;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{C2Error, C2Result};
use crate::proto::DeviceOption;
use crate::tensor::Buffer;

pub use cpu::{cpu_allocator, CpuAllocator, CpuContext};

/// Device families known to the schema. Discriminants are the `DeviceOption.device_type` ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceType {
    Cpu = 0,
    Cuda = 1,
    Mkldnn = 2,
    OpenGl = 3,
    OpenCl = 4,
    Ideep = 5,
    Hip = 6,
}

impl DeviceType {
    pub fn from_proto(id: i32) -> Option<Self> {
        let kind = match id {
            0 => DeviceType::Cpu,
            1 => DeviceType::Cuda,
            2 => DeviceType::Mkldnn,
            3 => DeviceType::OpenGl,
            4 => DeviceType::OpenCl,
            5 => DeviceType::Ideep,
            6 => DeviceType::Hip,
            _ => return None,
        };
        Some(kind)
    }

    pub fn proto_id(self) -> i32 {
        self as i32
    }

    /// Lowercase name used in logs and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Cpu => "cpu",
            DeviceType::Cuda => "cuda",
            DeviceType::Mkldnn => "mkldnn",
            DeviceType::OpenGl => "opengl",
            DeviceType::OpenCl => "opencl",
            DeviceType::Ideep => "ideep",
            DeviceType::Hip => "hip",
        }
    }
}

/// A concrete device: family plus ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub kind: DeviceType,
    pub id: i32,
}

impl Device {
    pub const CPU: Device = Device {
        kind: DeviceType::Cpu,
        id: 0,
    };

    pub fn new(kind: DeviceType, id: i32) -> Self {
        Device { kind, id }
    }

    /// Resolves the device an option points at. The ordinal comes from the family-specific id
    /// field; CPU always has ordinal 0.
    pub fn from_option(option: &DeviceOption) -> C2Result<Self> {
        let kind = DeviceType::from_proto(option.device_type).ok_or_else(|| {
            C2Error::configuration(format!("unknown device_type {}", option.device_type))
        })?;
        let id = match kind {
            DeviceType::Cuda => option.cuda_gpu_id,
            DeviceType::Hip => option.hip_gpu_id,
            _ => 0,
        };
        if id < 0 {
            return Err(C2Error::configuration(format!(
                "negative device ordinal {id} for {}",
                kind.as_str()
            )));
        }
        Ok(Device { kind, id })
    }

    pub fn is_host(self) -> bool {
        self.kind == DeviceType::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "cpu")
        } else {
            write!(f, "{}:{}", self.kind.as_str(), self.id)
        }
    }
}

/// Direction of a buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl CopyKind {
    pub fn between(src: Device, dst: Device) -> Self {
        match (src.is_host(), dst.is_host()) {
            (true, true) => CopyKind::HostToHost,
            (true, false) => CopyKind::HostToDevice,
            (false, true) => CopyKind::DeviceToHost,
            (false, false) => CopyKind::DeviceToDevice,
        }
    }
}

/// Opaque handle naming the ordering queue of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    device: Device,
    raw: usize,
}

impl StreamHandle {
    pub fn new(device: Device, raw: usize) -> Self {
        StreamHandle { device, raw }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Backend-specific stream value (for example a `hipStream_t` address). Zero means the
    /// device's default stream.
    pub fn raw(&self) -> usize {
        self.raw
    }
}

/// Hands out buffers on one device.
pub trait DeviceAllocator: Send + Sync + fmt::Debug {
    fn device(&self) -> Device;

    /// Allocates `bytes` bytes. Device out-of-memory surfaces as `ResourceExhausted`.
    fn allocate(&self, bytes: usize) -> C2Result<Buffer>;
}

/// Execution context for one device and one stream.
pub trait DeviceContext: Send + Sync + fmt::Debug {
    fn device(&self) -> Device;

    fn allocator(&self) -> Arc<dyn DeviceAllocator>;

    fn allocate(&self, bytes: usize) -> C2Result<Buffer> {
        self.allocator().allocate(bytes)
    }

    /// Enqueues a copy of the first `bytes` bytes of `src` into `dst` on this context's stream.
    /// Host memory involved must stay alive until the next [`synchronize`](Self::synchronize).
    fn copy_async(&self, src: &Buffer, dst: &mut Buffer, bytes: usize, kind: CopyKind)
        -> C2Result<()>;

    /// Blocks until all work previously submitted on this context's stream has completed.
    fn synchronize(&self) -> C2Result<()>;

    fn stream(&self) -> StreamHandle;

    /// Makes this context's device current for the calling thread.
    fn switch_to_device(&self) -> C2Result<()> {
        Ok(())
    }

    /// Called after every operator run.
    fn finish_device_computation(&self) -> C2Result<()> {
        self.synchronize()
    }

    fn as_any(&self) -> &dyn Any;
}

/// Validates the byte range and kind of a copy before a backend issues it.
pub fn check_copy(src: &Buffer, dst: &Buffer, bytes: usize, kind: CopyKind) -> C2Result<()> {
    if bytes > src.len() || bytes > dst.len() {
        return Err(C2Error::execution(format!(
            "copy of {bytes} bytes exceeds buffer sizes (src {}, dst {})",
            src.len(),
            dst.len()
        )));
    }
    let actual = CopyKind::between(src.device(), dst.device());
    if actual != kind {
        return Err(C2Error::execution(format!(
            "copy requested as {kind:?} but buffers are {actual:?} ({} -> {})",
            src.device(),
            dst.device()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_from_option_uses_family_ordinal() {
        let option = DeviceOption::hip(3);
        let device = Device::from_option(&option).unwrap();
        assert_eq!(device, Device::new(DeviceType::Hip, 3));
        assert_eq!(device.to_string(), "hip:3");

        let cpu = Device::from_option(&DeviceOption {
            hip_gpu_id: 5,
            ..DeviceOption::cpu()
        })
        .unwrap();
        assert_eq!(cpu, Device::CPU);
    }

    #[test]
    fn unknown_device_type_is_configuration_error() {
        let option = DeviceOption {
            device_type: 42,
            ..DeviceOption::default()
        };
        let err = Device::from_option(&option).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
