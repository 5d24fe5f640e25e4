//! Operator execution and dispatch runtime.
//!
//! Tensors live in named blobs inside a [`Workspace`]. Operators are created from serialized
//! definitions through a registry keyed by operator type, device type and engine, grouped into
//! nets, and driven by plans made of execution steps. Device backends plug in device contexts,
//! operator registrations and kernels.

pub use linkme;

pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod kernel;
pub mod muji;
pub mod net;
pub mod operator;
pub mod plan;
pub mod proto;
pub mod tensor;
pub mod workspace;

pub use context::{Device, DeviceContext, DeviceType};
pub use error::{C2Error, C2Result, ErrorKind};
pub use operator::{Operator, OperatorBase};
pub use tensor::{DataType, Tensor};
pub use workspace::{Blob, Workspace};
