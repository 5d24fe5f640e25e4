use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::sync::{Arc, OnceLock};

use c2_rs::context::{CopyKind, Device, DeviceType};
use c2_rs::env;
use c2_rs::error::{C2Error, C2Result};
use libloading::Library;
use tracing::{debug, info};

type HipError = i32;
type HipStream = *mut c_void;

const HIP_SUCCESS: HipError = 0;
const HIP_ERROR_OUT_OF_MEMORY: HipError = 2;

const HIP_MEMCPY_HOST_TO_HOST: i32 = 0;
const HIP_MEMCPY_HOST_TO_DEVICE: i32 = 1;
const HIP_MEMCPY_DEVICE_TO_HOST: i32 = 2;
const HIP_MEMCPY_DEVICE_TO_DEVICE: i32 = 3;

type HipInitFn = unsafe extern "C" fn(flags: u32) -> HipError;
type HipGetDeviceCountFn = unsafe extern "C" fn(count: *mut i32) -> HipError;
type HipSetDeviceFn = unsafe extern "C" fn(device: i32) -> HipError;
type HipMallocFn = unsafe extern "C" fn(ptr: *mut *mut c_void, bytes: usize) -> HipError;
type HipFreeFn = unsafe extern "C" fn(ptr: *mut c_void) -> HipError;
type HipMemcpyAsyncFn = unsafe extern "C" fn(
    dst: *mut c_void,
    src: *const c_void,
    bytes: usize,
    kind: i32,
    stream: HipStream,
) -> HipError;
type HipMemsetAsyncFn =
    unsafe extern "C" fn(dst: *mut c_void, value: i32, bytes: usize, stream: HipStream) -> HipError;
type HipStreamCreateFn = unsafe extern "C" fn(stream: *mut HipStream) -> HipError;
type HipStreamDestroyFn = unsafe extern "C" fn(stream: HipStream) -> HipError;
type HipStreamSynchronizeFn = unsafe extern "C" fn(stream: HipStream) -> HipError;
type HipGetErrorStringFn = unsafe extern "C" fn(code: HipError) -> *const c_char;

struct RuntimeFns {
    hip_init: HipInitFn,
    hip_get_device_count: HipGetDeviceCountFn,
    hip_set_device: HipSetDeviceFn,
    hip_malloc: HipMallocFn,
    hip_free: HipFreeFn,
    hip_memcpy_async: HipMemcpyAsyncFn,
    hip_memset_async: HipMemsetAsyncFn,
    hip_stream_create: HipStreamCreateFn,
    hip_stream_destroy: HipStreamDestroyFn,
    hip_stream_synchronize: HipStreamSynchronizeFn,
    hip_get_error_string: HipGetErrorStringFn,
}

/// The HIP runtime library, loaded once per process.
///
/// Device addresses and stream handles cross this API as integers so that the types holding
/// them stay `Send + Sync`.
pub struct HipRuntime {
    _lib: Library,
    fns: RuntimeFns,
    device_count: i32,
}

impl fmt::Debug for HipRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HipRuntime")
            .field("device_count", &self.device_count)
            .finish()
    }
}

static HIP_RUNTIME: OnceLock<Result<Arc<HipRuntime>, String>> = OnceLock::new();

/// Whether a HIP runtime with at least one device could be loaded.
pub fn is_available() -> bool {
    runtime().is_ok()
}

pub fn runtime() -> C2Result<Arc<HipRuntime>> {
    let init = HIP_RUNTIME.get_or_init(|| {
        if env::hip_disabled() {
            return Err("disabled by C2RS_HIP_DISABLE".to_string());
        }
        match HipRuntime::load() {
            Ok(runtime) => Ok(Arc::new(runtime)),
            Err(err) => Err(err.to_string()),
        }
    });
    match init {
        Ok(runtime) => Ok(Arc::clone(runtime)),
        Err(msg) => Err(C2Error::execution(format!("HIP runtime unavailable: {msg}"))),
    }
}

impl HipRuntime {
    fn load() -> C2Result<Self> {
        let lib = load_hip_library()?;
        let fns = RuntimeFns {
            hip_init: load_symbol(&lib, b"hipInit\0")?,
            hip_get_device_count: load_symbol(&lib, b"hipGetDeviceCount\0")?,
            hip_set_device: load_symbol(&lib, b"hipSetDevice\0")?,
            hip_malloc: load_symbol(&lib, b"hipMalloc\0")?,
            hip_free: load_symbol(&lib, b"hipFree\0")?,
            hip_memcpy_async: load_symbol(&lib, b"hipMemcpyAsync\0")?,
            hip_memset_async: load_symbol(&lib, b"hipMemsetAsync\0")?,
            hip_stream_create: load_symbol(&lib, b"hipStreamCreate\0")?,
            hip_stream_destroy: load_symbol(&lib, b"hipStreamDestroy\0")?,
            hip_stream_synchronize: load_symbol(&lib, b"hipStreamSynchronize\0")?,
            hip_get_error_string: load_symbol(&lib, b"hipGetErrorString\0")?,
        };

        let mut device_count = 0i32;
        // SAFETY: plain initialization calls with a valid out pointer.
        unsafe {
            let code = (fns.hip_init)(0);
            if code != HIP_SUCCESS {
                return Err(C2Error::execution(format!("hipInit failed with code {code}")));
            }
            let code = (fns.hip_get_device_count)(&mut device_count as *mut i32);
            if code != HIP_SUCCESS {
                return Err(C2Error::execution(format!(
                    "hipGetDeviceCount failed with code {code}"
                )));
            }
        }
        if device_count == 0 {
            return Err(C2Error::execution("no HIP devices visible"));
        }
        info!(device_count, "loaded HIP runtime");
        Ok(HipRuntime {
            _lib: lib,
            fns,
            device_count,
        })
    }

    pub fn device_count(&self) -> i32 {
        self.device_count
    }

    /// Fails unless `device` is a HIP device this runtime can see.
    pub fn check_device(&self, device: Device) -> C2Result<()> {
        if device.kind != DeviceType::Hip || device.id < 0 || device.id >= self.device_count {
            return Err(C2Error::configuration(format!(
                "{device} is not one of the {} visible HIP devices",
                self.device_count
            )));
        }
        Ok(())
    }

    pub fn set_device(&self, device: Device) -> C2Result<()> {
        // SAFETY: ordinal validated by callers through `check_device`.
        let code = unsafe { (self.fns.hip_set_device)(device.id) };
        self.check(code, "hipSetDevice")
    }

    /// Allocates `bytes` on `device`. Out-of-memory becomes `ResourceExhausted`.
    pub fn malloc(&self, device: Device, bytes: usize) -> C2Result<u64> {
        self.set_device(device)?;
        let mut ptr: *mut c_void = std::ptr::null_mut();
        // SAFETY: `ptr` is a valid out pointer.
        let code = unsafe { (self.fns.hip_malloc)(&mut ptr as *mut *mut c_void, bytes) };
        if code == HIP_ERROR_OUT_OF_MEMORY {
            return Err(C2Error::resource_exhausted(
                device,
                bytes,
                self.error_string(code),
            ));
        }
        self.check(code, "hipMalloc")?;
        Ok(ptr as u64)
    }

    pub fn free(&self, device: Device, ptr: u64) -> C2Result<()> {
        if ptr == 0 {
            return Ok(());
        }
        self.set_device(device)?;
        // SAFETY: `ptr` came from `malloc` and is released once by its owner.
        let code = unsafe { (self.fns.hip_free)(ptr as *mut c_void) };
        self.check(code, "hipFree")
    }

    pub fn stream_create(&self, device: Device) -> C2Result<usize> {
        self.set_device(device)?;
        let mut stream: HipStream = std::ptr::null_mut();
        // SAFETY: `stream` is a valid out pointer.
        let code = unsafe { (self.fns.hip_stream_create)(&mut stream as *mut HipStream) };
        self.check(code, "hipStreamCreate")?;
        Ok(stream as usize)
    }

    pub fn stream_destroy(&self, stream: usize) -> C2Result<()> {
        // SAFETY: the stream was created by `stream_create` and is destroyed once.
        let code = unsafe { (self.fns.hip_stream_destroy)(stream as HipStream) };
        self.check(code, "hipStreamDestroy")
    }

    pub fn stream_synchronize(&self, stream: usize) -> C2Result<()> {
        // SAFETY: stream handle owned by a live context.
        let code = unsafe { (self.fns.hip_stream_synchronize)(stream as HipStream) };
        self.check(code, "hipStreamSynchronize")
    }

    /// Enqueues a copy on `stream`.
    ///
    /// # Safety
    ///
    /// `dst` and `src` must be valid for `bytes` bytes on the sides `kind` names, and host memory
    /// must stay alive until the stream is synchronized.
    pub unsafe fn memcpy_async(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        kind: CopyKind,
        stream: usize,
    ) -> C2Result<()> {
        let kind = match kind {
            CopyKind::HostToHost => HIP_MEMCPY_HOST_TO_HOST,
            CopyKind::HostToDevice => HIP_MEMCPY_HOST_TO_DEVICE,
            CopyKind::DeviceToHost => HIP_MEMCPY_DEVICE_TO_HOST,
            CopyKind::DeviceToDevice => HIP_MEMCPY_DEVICE_TO_DEVICE,
        };
        let code = (self.fns.hip_memcpy_async)(
            dst as *mut c_void,
            src as *const c_void,
            bytes,
            kind,
            stream as HipStream,
        );
        self.check(code, "hipMemcpyAsync")
    }

    /// Enqueues a byte fill of device memory on `stream`.
    ///
    /// # Safety
    ///
    /// `dst` must be a device allocation of at least `bytes` bytes.
    pub unsafe fn memset_async(
        &self,
        dst: u64,
        value: u8,
        bytes: usize,
        stream: usize,
    ) -> C2Result<()> {
        let code = (self.fns.hip_memset_async)(
            dst as *mut c_void,
            i32::from(value),
            bytes,
            stream as HipStream,
        );
        self.check(code, "hipMemsetAsync")
    }

    fn check(&self, code: HipError, op: &str) -> C2Result<()> {
        if code == HIP_SUCCESS {
            Ok(())
        } else {
            Err(C2Error::execution(format!(
                "HIP call {op} failed with code {code}: {}",
                self.error_string(code)
            )))
        }
    }

    fn error_string(&self, code: HipError) -> String {
        // SAFETY: hipGetErrorString returns a static NUL-terminated string or null.
        unsafe {
            let ptr = (self.fns.hip_get_error_string)(code);
            if ptr.is_null() {
                return "unknown HIP error".to_string();
            }
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

fn load_hip_library() -> C2Result<Library> {
    let mut candidates: Vec<String> = env::hip_library().into_iter().collect();
    candidates.extend(
        ["libamdhip64.so", "libamdhip64.so.6", "libamdhip64.so.5", "amdhip64.dll"]
            .into_iter()
            .map(str::to_string),
    );

    for candidate in &candidates {
        // SAFETY: dynamic library probe only; no symbols are invoked at this stage.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            debug!(library = %candidate, "opened HIP runtime library");
            return Ok(lib);
        }
    }

    Err(C2Error::execution(format!(
        "failed to load the HIP runtime library (tried {})",
        candidates.join(", ")
    )))
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> C2Result<T> {
    // SAFETY: caller provides the symbol type declared by the HIP runtime API.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|err| {
        C2Error::execution(format!(
            "failed to resolve HIP symbol {}: {err}",
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name))
        ))
    })?;
    Ok(*sym)
}
