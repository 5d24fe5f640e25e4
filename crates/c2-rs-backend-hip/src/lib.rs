//! HIP backend for c2-rs.
//!
//! The HIP runtime (`libamdhip64`) is opened at first use with `libloading`; nothing links
//! against it at build time, so the crate builds and its operators register on machines without
//! ROCm. Creating a HIP operator on such a machine fails with an execution error.
//!
//! Set `C2RS_HIP_LIBRARY` to point at a specific runtime library or `C2RS_HIP_DISABLE=1` to skip
//! loading it.

mod context;
mod driver;
mod ops;

pub use context::{HipAllocation, HipAllocator, HipContext};
pub use driver::{is_available, runtime, HipRuntime};
pub use ops::{register_hip_operators, HipConstantFill, HipCopyOp, KERNEL_OPERATORS};

use c2_rs::operator::OperatorRegistrar;

#[c2_rs::linkme::distributed_slice(c2_rs::operator::OPERATOR_REGISTRARS)]
static REGISTER_HIP_OPERATORS: OperatorRegistrar = register_hip_operators;

/// Keeps the registrar linked into binaries that never name this crate otherwise.
pub fn init() {
    let _ = std::hint::black_box(&REGISTER_HIP_OPERATORS);
}
