//! Registering C math kernels.
//!
//! A registered function is called once per operator run with an opaque [`C2rsKernelCall`]. It
//! queries inputs, sizes and obtains outputs, and enqueues work on the stream returned by
//! [`c2rs_kernel_stream`]. The runtime synchronizes the stream after the function returns.

use std::os::raw::{c_char, c_int, c_void};
use std::sync::Arc;

use c2_rs::context::{DeviceContext, DeviceType};
use c2_rs::error::{C2Error, C2Result};
use c2_rs::kernel::{register_kernel, Kernel, KernelIo};
use c2_rs::tensor::{Buffer, Tensor};
use c2_rs::DataType;

use crate::{c_str, invalid_argument, report, C2RS_OK};

/// Kernel entry point. Returns 0 on success; any other value fails the operator.
pub type C2rsKernelFn =
    unsafe extern "C" fn(user_data: *mut c_void, call: *mut C2rsKernelCall) -> c_int;

/// Opaque per-launch state handed to a kernel.
#[repr(C)]
pub struct C2rsKernelCall {
    _private: [u8; 0],
}

/// Borrowed view of a tensor for the duration of one launch. `data` is a host pointer for CPU
/// kernels and a device address otherwise; it is null for empty tensors.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct C2rsTensorView {
    pub dtype: i32,
    pub rank: usize,
    pub dims: *const i64,
    pub data: *mut c_void,
}

struct CKernel {
    name: String,
    func: C2rsKernelFn,
    user_data: usize,
}

struct KernelCall<'a, 'b> {
    ctx: &'a dyn DeviceContext,
    io: &'a mut KernelIo<'b>,
    dims: Vec<Box<[i64]>>,
}

impl KernelCall<'_, '_> {
    /// Keeps a copy of `dims` alive until the launch ends and returns its address.
    fn stash_dims(&mut self, dims: &[usize]) -> *const i64 {
        let dims: Box<[i64]> = dims.iter().map(|&d| d as i64).collect();
        let ptr = dims.as_ptr();
        self.dims.push(dims);
        ptr
    }
}

fn data_addr(buffer: Option<&Buffer>) -> *mut c_void {
    match buffer {
        Some(buffer) => match buffer.host_bytes() {
            Some(bytes) => bytes.as_ptr() as *mut c_void,
            None => buffer.device_addr().unwrap_or(0) as *mut c_void,
        },
        None => std::ptr::null_mut(),
    }
}

fn view(tensor: &Tensor, dims: *const i64) -> C2rsTensorView {
    C2rsTensorView {
        dtype: tensor.dtype().tag(),
        rank: tensor.ndim(),
        dims,
        data: if tensor.numel() == 0 {
            std::ptr::null_mut()
        } else {
            data_addr(tensor.buffer())
        },
    }
}

impl Kernel for CKernel {
    fn launch(&self, ctx: &dyn DeviceContext, io: &mut KernelIo<'_>) -> C2Result<()> {
        let mut call = KernelCall {
            ctx,
            io,
            dims: Vec::new(),
        };
        let handle = &mut call as *mut KernelCall as *mut C2rsKernelCall;
        // SAFETY: the registrant promised `func` is safe to call with its own user data, and
        // `handle` stays valid for the duration of the call.
        let code = unsafe { (self.func)(self.user_data as *mut c_void, handle) };
        if code != C2RS_OK {
            return Err(C2Error::execution(format!(
                "kernel '{}' returned {code}",
                self.name
            )));
        }
        Ok(())
    }
}

/// # Safety
/// `call` must be the handle passed to the currently running kernel.
unsafe fn call_mut<'a>(call: *mut C2rsKernelCall) -> Option<&'a mut KernelCall<'a, 'a>> {
    if call.is_null() {
        None
    } else {
        Some(unsafe { &mut *(call as *mut KernelCall) })
    }
}

#[no_mangle]
/// Registers `func` as kernel `name` for `device_type` (the `DeviceOption` id). Operators created
/// after this call can bind to it.
///
/// # Safety
/// `name` must be a NUL-terminated string. `func` must be callable from any thread with
/// `user_data` for as long as the process runs.
pub unsafe extern "C" fn c2rs_register_kernel(
    name: *const c_char,
    device_type: c_int,
    func: Option<C2rsKernelFn>,
    user_data: *mut c_void,
) -> c_int {
    let Some(name) = (unsafe { c_str(name) }) else {
        return invalid_argument("kernel name is null or not UTF-8");
    };
    let Some(func) = func else {
        return invalid_argument("null kernel function");
    };
    let Some(device) = DeviceType::from_proto(device_type) else {
        return invalid_argument("unknown device type");
    };
    let kernel = CKernel {
        name: name.to_string(),
        func,
        user_data: user_data as usize,
    };
    report(register_kernel(name, device, Arc::new(kernel)))
}

#[no_mangle]
/// # Safety
/// `call` must be the handle passed to the running kernel.
pub unsafe extern "C" fn c2rs_kernel_input_count(call: *mut C2rsKernelCall) -> usize {
    unsafe { call_mut(call) }.map_or(0, |call| call.io.input_count())
}

#[no_mangle]
/// # Safety
/// `call` must be the handle passed to the running kernel.
pub unsafe extern "C" fn c2rs_kernel_output_count(call: *mut C2rsKernelCall) -> usize {
    unsafe { call_mut(call) }.map_or(0, |call| call.io.output_count())
}

#[no_mangle]
/// Raw stream handle of the operator's context (for example a `hipStream_t`), 0 for CPU.
///
/// # Safety
/// `call` must be the handle passed to the running kernel.
pub unsafe extern "C" fn c2rs_kernel_stream(call: *mut C2rsKernelCall) -> usize {
    unsafe { call_mut(call) }.map_or(0, |call| call.ctx.stream().raw())
}

#[no_mangle]
/// Fills `out` with a view of input `index`.
///
/// # Safety
/// `call` must be the handle passed to the running kernel and `out` a valid pointer.
pub unsafe extern "C" fn c2rs_kernel_input(
    call: *mut C2rsKernelCall,
    index: usize,
    out: *mut C2rsTensorView,
) -> c_int {
    let (Some(call), false) = (unsafe { call_mut(call) }, out.is_null()) else {
        return invalid_argument("null kernel call or view pointer");
    };
    report((|| {
        let dims = call.io.input(index)?.dims().to_vec();
        let dims_ptr = call.stash_dims(&dims);
        let tensor = call.io.input(index)?;
        unsafe { *out = view(tensor, dims_ptr) };
        Ok(())
    })())
}

#[no_mangle]
/// Resizes output `index` to `dims` with element type `dtype`, allocates it on the operator's
/// device and fills `out` with a writable view.
///
/// # Safety
/// `call` must be the handle passed to the running kernel, `dims` readable for `rank` values and
/// `out` a valid pointer.
pub unsafe extern "C" fn c2rs_kernel_output(
    call: *mut C2rsKernelCall,
    index: usize,
    dtype: i32,
    dims: *const i64,
    rank: usize,
    out: *mut C2rsTensorView,
) -> c_int {
    let (Some(call), false) = (unsafe { call_mut(call) }, out.is_null()) else {
        return invalid_argument("null kernel call or view pointer");
    };
    if rank > 0 && dims.is_null() {
        return invalid_argument("null dims");
    }
    let dims = if rank == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(dims, rank) }
    };
    report((|| {
        let dtype = DataType::from_tag(dtype)
            .ok_or_else(|| C2Error::type_mismatch(format!("unknown dtype tag {dtype}")))?;
        let dims = dims
            .iter()
            .map(|&d| {
                usize::try_from(d)
                    .map_err(|_| C2Error::shape_mismatch(format!("negative dimension {d}")))
            })
            .collect::<C2Result<Vec<usize>>>()?;
        let dims_ptr = call.stash_dims(&dims);
        let tensor = call.io.output(index)?;
        tensor.resize_with_dtype(&dims, dtype)?;
        if tensor.numel() > 0 {
            tensor.buffer_mut()?;
        }
        unsafe { *out = view(tensor, dims_ptr) };
        Ok(())
    })())
}

#[no_mangle]
/// Reads float argument `name`, or `default` when absent.
///
/// # Safety
/// `call` must be the handle passed to the running kernel, `name` a NUL-terminated string and
/// `out` a valid pointer.
pub unsafe extern "C" fn c2rs_kernel_arg_f32(
    call: *mut C2rsKernelCall,
    name: *const c_char,
    default: f32,
    out: *mut f32,
) -> c_int {
    let (Some(call), Some(name), false) =
        (unsafe { call_mut(call) }, unsafe { c_str(name) }, out.is_null())
    else {
        return invalid_argument("null kernel call, argument name or output pointer");
    };
    report(
        call.io
            .args()
            .single_arg_or(name, default)
            .map(|value| unsafe { *out = value }),
    )
}

#[no_mangle]
/// Reads integer argument `name`, or `default` when absent.
///
/// # Safety
/// Same as [`c2rs_kernel_arg_f32`].
pub unsafe extern "C" fn c2rs_kernel_arg_i64(
    call: *mut C2rsKernelCall,
    name: *const c_char,
    default: i64,
    out: *mut i64,
) -> c_int {
    let (Some(call), Some(name), false) =
        (unsafe { call_mut(call) }, unsafe { c_str(name) }, out.is_null())
    else {
        return invalid_argument("null kernel call, argument name or output pointer");
    };
    report(
        call.io
            .args()
            .single_arg_or(name, default)
            .map(|value| unsafe { *out = value }),
    )
}
