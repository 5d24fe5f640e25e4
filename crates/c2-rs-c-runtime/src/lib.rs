//! C entry points for embedding c2-rs.
//!
//! Every function returns `C2RS_OK` (0) on success or a negative code naming the error kind.
//! The message of the last failure on the calling thread is available from [`c2rs_last_error`].
//! Handles returned here are owned by the caller and released with the matching `*_destroy`.

mod kernel;

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::sync::Arc;

use c2_rs::error::{C2Error, C2Result, ErrorKind};
use c2_rs::operator::{create_operator, Operator};
use c2_rs::proto::{OperatorDef, ProtoMessage};
use c2_rs::tensor::checked_numel;
use c2_rs::{Tensor, Workspace};

pub use kernel::{
    c2rs_kernel_arg_f32, c2rs_kernel_arg_i64, c2rs_kernel_input, c2rs_kernel_input_count,
    c2rs_kernel_output, c2rs_kernel_output_count, c2rs_kernel_stream, c2rs_register_kernel,
    C2rsKernelCall, C2rsKernelFn, C2rsTensorView,
};

pub const C2RS_OK: c_int = 0;
pub const C2RS_ERR_INVALID_ARGUMENT: c_int = -1;
pub const C2RS_ERR_CONFIGURATION: c_int = -2;
pub const C2RS_ERR_OPERATOR_NOT_FOUND: c_int = -3;
pub const C2RS_ERR_SHAPE_MISMATCH: c_int = -4;
pub const C2RS_ERR_TYPE_MISMATCH: c_int = -5;
pub const C2RS_ERR_RESOURCE_EXHAUSTED: c_int = -6;
pub const C2RS_ERR_EXECUTION: c_int = -7;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: String) {
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

fn error_code(kind: ErrorKind) -> c_int {
    match kind {
        ErrorKind::Configuration => C2RS_ERR_CONFIGURATION,
        ErrorKind::OperatorNotFound => C2RS_ERR_OPERATOR_NOT_FOUND,
        ErrorKind::ShapeMismatch => C2RS_ERR_SHAPE_MISMATCH,
        ErrorKind::TypeMismatch => C2RS_ERR_TYPE_MISMATCH,
        ErrorKind::ResourceExhausted => C2RS_ERR_RESOURCE_EXHAUSTED,
        ErrorKind::Execution => C2RS_ERR_EXECUTION,
    }
}

/// Records `result`'s error (if any) and maps it to a return code.
pub(crate) fn report(result: C2Result<()>) -> c_int {
    match result {
        Ok(()) => C2RS_OK,
        Err(err) => {
            let code = error_code(err.kind());
            set_last_error(err.to_string());
            code
        }
    }
}

pub(crate) fn invalid_argument(message: &str) -> c_int {
    set_last_error(message.to_string());
    C2RS_ERR_INVALID_ARGUMENT
}

/// Reads a NUL-terminated UTF-8 string.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Opaque workspace handle.
pub struct C2rsWorkspace {
    ws: Arc<Workspace>,
}

/// Opaque operator handle. Keeps its workspace alive.
pub struct C2rsOperator {
    op: Box<dyn Operator>,
    _ws: Arc<Workspace>,
}

/// Message of the last failed call on this thread, or null. Valid until the next failing call on
/// the same thread.
#[no_mangle]
pub extern "C" fn c2rs_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |message| message.as_ptr())
    })
}

#[no_mangle]
pub extern "C" fn c2rs_workspace_create() -> *mut C2rsWorkspace {
    c2_rs_backend_ref_cpu::init();
    c2_rs_backend_hip::init();
    Box::into_raw(Box::new(C2rsWorkspace {
        ws: Workspace::new(),
    }))
}

#[no_mangle]
/// # Safety
/// `ws` must be null or a handle from [`c2rs_workspace_create`] not yet destroyed.
pub unsafe extern "C" fn c2rs_workspace_destroy(ws: *mut C2rsWorkspace) {
    if !ws.is_null() {
        drop(unsafe { Box::from_raw(ws) });
    }
}

fn checked_dims(dims: &[i64]) -> C2Result<(Vec<usize>, usize)> {
    let dims = dims
        .iter()
        .map(|&d| {
            usize::try_from(d)
                .map_err(|_| C2Error::shape_mismatch(format!("negative dimension {d}")))
        })
        .collect::<C2Result<Vec<_>>>()?;
    let numel = checked_numel(&dims)?;
    Ok((dims, numel))
}

#[no_mangle]
/// Stores a host float tensor under `name`.
///
/// # Safety
/// `dims` must hold `rank` values and `data` the product of those values in floats.
pub unsafe extern "C" fn c2rs_workspace_feed_f32(
    ws: *mut C2rsWorkspace,
    name: *const c_char,
    dims: *const i64,
    rank: usize,
    data: *const f32,
) -> c_int {
    if ws.is_null() || (rank > 0 && dims.is_null()) {
        return invalid_argument("null workspace or dims");
    }
    let Some(name) = (unsafe { c_str(name) }) else {
        return invalid_argument("blob name is null or not UTF-8");
    };
    let ws = unsafe { &*ws };
    let dims = if rank == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(dims, rank) }
    };
    report((|| {
        let (dims, numel) = checked_dims(dims)?;
        if numel > 0 && data.is_null() {
            return Err(C2Error::configuration("null data for a non-empty tensor"));
        }
        let values = if numel == 0 {
            &[][..]
        } else {
            unsafe { std::slice::from_raw_parts(data, numel) }
        };
        ws.ws.feed_tensor(name, Tensor::from_slice(&dims, values)?)
    })())
}

#[no_mangle]
/// Copies the float tensor stored under `name` into `out`.
///
/// `*out_len` always receives the element count. When `capacity` is too small nothing is copied
/// and `C2RS_ERR_SHAPE_MISMATCH` is returned, so callers can size a buffer and retry.
///
/// # Safety
/// `out` must be writable for `capacity` floats and `out_len` must be a valid pointer.
pub unsafe extern "C" fn c2rs_workspace_fetch_f32(
    ws: *const C2rsWorkspace,
    name: *const c_char,
    out: *mut f32,
    capacity: usize,
    out_len: *mut usize,
) -> c_int {
    if ws.is_null() || out_len.is_null() {
        return invalid_argument("null workspace or length pointer");
    }
    let Some(name) = (unsafe { c_str(name) }) else {
        return invalid_argument("blob name is null or not UTF-8");
    };
    let ws = unsafe { &*ws };
    report(ws.ws.with_tensor(name, |tensor| {
        let values = tensor.data::<f32>()?;
        unsafe { *out_len = values.len() };
        if values.len() > capacity {
            return Err(C2Error::shape_mismatch(format!(
                "blob '{name}' has {} elements, buffer holds {capacity}",
                values.len()
            )));
        }
        if !values.is_empty() {
            if out.is_null() {
                return Err(C2Error::configuration("null output buffer"));
            }
            unsafe { std::ptr::copy_nonoverlapping(values.as_ptr(), out, values.len()) };
        }
        Ok(())
    }))
}

#[no_mangle]
/// Builds an operator from a binary (`bincode`) `OperatorDef` bound to `ws`.
///
/// # Safety
/// `def_bytes` must be readable for `len` bytes and `out` must be a valid pointer.
pub unsafe extern "C" fn c2rs_create_operator(
    ws: *mut C2rsWorkspace,
    def_bytes: *const u8,
    len: usize,
    out: *mut *mut C2rsOperator,
) -> c_int {
    if ws.is_null() || def_bytes.is_null() || out.is_null() {
        return invalid_argument("null workspace, definition or output pointer");
    }
    let ws = unsafe { &*ws };
    let bytes = unsafe { std::slice::from_raw_parts(def_bytes, len) };
    let created = OperatorDef::from_bytes(bytes)
        .map_err(C2Error::from)
        .and_then(|def| create_operator(&def, &ws.ws));
    match created {
        Ok(op) => {
            let handle = Box::new(C2rsOperator {
                op,
                _ws: Arc::clone(&ws.ws),
            });
            unsafe { *out = Box::into_raw(handle) };
            C2RS_OK
        }
        Err(err) => report(Err(err)),
    }
}

#[no_mangle]
/// # Safety
/// `op` must be a live handle from [`c2rs_create_operator`], not used concurrently.
pub unsafe extern "C" fn c2rs_operator_run(op: *mut C2rsOperator) -> c_int {
    if op.is_null() {
        return invalid_argument("null operator");
    }
    let op = unsafe { &mut *op };
    report(op.op.run())
}

#[no_mangle]
/// # Safety
/// `op` must be null or a handle from [`c2rs_create_operator`] not yet destroyed.
pub unsafe extern "C" fn c2rs_operator_destroy(op: *mut C2rsOperator) {
    if !op.is_null() {
        drop(unsafe { Box::from_raw(op) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c2_rs::proto::Argument;

    fn last_error() -> String {
        let ptr = c2rs_last_error();
        assert!(!ptr.is_null());
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    #[test]
    fn scale_through_the_c_surface() {
        let ws = c2rs_workspace_create();
        let name = CString::new("X").unwrap();
        let out_name = CString::new("Y").unwrap();
        let dims = [2i64, 2];
        let data = [1.0f32, 2.0, 3.0, 4.0];
        unsafe {
            assert_eq!(
                c2rs_workspace_feed_f32(ws, name.as_ptr(), dims.as_ptr(), 2, data.as_ptr()),
                C2RS_OK
            );
            let def = OperatorDef::new("Scale", ["X"], ["Y"])
                .with_arg(Argument::float("scale", 2.0))
                .to_bytes()
                .unwrap();
            let mut op = std::ptr::null_mut();
            assert_eq!(c2rs_create_operator(ws, def.as_ptr(), def.len(), &mut op), C2RS_OK);
            assert_eq!(c2rs_operator_run(op), C2RS_OK);

            let mut len = 0usize;
            let mut small = [0.0f32; 2];
            assert_eq!(
                c2rs_workspace_fetch_f32(ws, out_name.as_ptr(), small.as_mut_ptr(), 2, &mut len),
                C2RS_ERR_SHAPE_MISMATCH
            );
            assert_eq!(len, 4);
            let mut out = [0.0f32; 4];
            assert_eq!(
                c2rs_workspace_fetch_f32(ws, out_name.as_ptr(), out.as_mut_ptr(), 4, &mut len),
                C2RS_OK
            );
            assert_eq!(out, [2.0, 4.0, 6.0, 8.0]);

            c2rs_operator_destroy(op);
            c2rs_workspace_destroy(ws);
        }
    }

    #[test]
    fn unknown_operator_reports_kind_and_message() {
        let ws = c2rs_workspace_create();
        let def = OperatorDef::new("DoesNotExist", Vec::<String>::new(), ["Y"])
            .to_bytes()
            .unwrap();
        let mut op = std::ptr::null_mut();
        let code = unsafe { c2rs_create_operator(ws, def.as_ptr(), def.len(), &mut op) };
        assert_eq!(code, C2RS_ERR_OPERATOR_NOT_FOUND);
        assert!(op.is_null());
        assert!(last_error().contains("DoesNotExist"));
        unsafe { c2rs_workspace_destroy(ws) };
    }

    #[test]
    fn garbage_definition_is_a_configuration_error() {
        let ws = c2rs_workspace_create();
        let bytes = [0xffu8; 3];
        let mut op = std::ptr::null_mut();
        let code = unsafe { c2rs_create_operator(ws, bytes.as_ptr(), bytes.len(), &mut op) };
        assert_eq!(code, C2RS_ERR_CONFIGURATION);
        unsafe { c2rs_workspace_destroy(ws) };
    }
}
