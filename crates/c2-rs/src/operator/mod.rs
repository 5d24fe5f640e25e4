//! Operator contract.
//!
//! An operator is built once from an [`OperatorDef`] against a [`Workspace`]: its input blobs
//! must already exist, its output blobs are created, and all of them are cached as handles so a
//! run never looks names up again. Each run locks the blobs it touches through [`OpIo`], which
//! acquires the locks in ascending blob address order. Operators running concurrently therefore
//! cannot deadlock, and a blob used both as input and output is locked once, for writing.

mod args;
mod registry;

use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use crate::context::{CpuContext, Device, DeviceAllocator, DeviceContext};
use crate::error::{C2Error, C2Result};
use crate::proto::OperatorDef;
use crate::tensor::Tensor;
use crate::workspace::{Blob, BlobHandle, Workspace};

pub use args::{ArgValue, ArgumentHelper};
pub use registry::{
    create_operator, global_registry, operator_factory, registered_operators, OperatorFactory,
    OperatorKey, OperatorRegistrar, OperatorRegistry, OPERATOR_REGISTRARS,
};

/// Matches a [`DataType`](crate::tensor::DataType) against the listed variants, binding the
/// given identifier to the matching Rust type inside `$body`. Other types yield `TypeMismatch`.
///
/// ```ignore
/// dispatch_dtype!(x.dtype(), [Float => f32, Int64 => i64], T => add::<T>(x, y, out))
/// ```
#[macro_export]
macro_rules! dispatch_dtype {
    ($dtype:expr, [$($variant:ident => $ty:ty),+ $(,)?], $T:ident => $body:expr) => {
        match $dtype {
            $(
                $crate::tensor::DataType::$variant => {
                    #[allow(dead_code)]
                    type $T = $ty;
                    $body
                }
            )+
            other => Err($crate::error::C2Error::type_mismatch(format!(
                "unsupported element type {other:?}"
            ))),
        }
    };
}

/// Runtime unit: reads its input blobs and writes its output blobs.
pub trait Operator: Send {
    fn base(&self) -> &OperatorBase;

    /// Device-specific body. Outputs are written by resize-then-fill, so running twice with
    /// unchanged inputs produces identical outputs.
    fn run_on_device(&mut self) -> C2Result<()>;

    /// Makes the device current, runs the body and waits for the device work it enqueued.
    /// Errors carry the operator's name.
    fn run(&mut self) -> C2Result<()> {
        let result = self
            .base()
            .context()
            .switch_to_device()
            .and_then(|_| self.run_on_device())
            .and_then(|_| self.base().context().finish_device_computation());
        result.map_err(|err| err.in_operator(self.base().display_name()))
    }
}

/// State shared by every operator implementation.
#[derive(Debug)]
pub struct OperatorBase {
    def: OperatorDef,
    context: Box<dyn DeviceContext>,
    args: ArgumentHelper,
    inputs: Vec<BlobHandle>,
    outputs: Vec<BlobHandle>,
}

impl OperatorBase {
    pub fn new(
        def: &OperatorDef,
        ws: &Workspace,
        context: Box<dyn DeviceContext>,
    ) -> C2Result<Self> {
        let args = ArgumentHelper::new(&def.arg)?;
        let inputs = def
            .input
            .iter()
            .map(|name| {
                ws.get_blob(name)?.ok_or_else(|| {
                    C2Error::configuration(format!(
                        "input blob '{name}' of operator '{}' does not exist",
                        def.display_name()
                    ))
                })
            })
            .collect::<C2Result<Vec<_>>>()?;
        let outputs = def
            .output
            .iter()
            .map(|name| ws.create_blob(name))
            .collect::<C2Result<Vec<_>>>()?;
        Ok(OperatorBase {
            def: def.clone(),
            context,
            args,
            inputs,
            outputs,
        })
    }

    /// Base bound to a host context seeded from the definition's device option.
    pub fn cpu(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let context = CpuContext::from_option(def.device_option.as_ref());
        OperatorBase::new(def, ws, Box::new(context))
    }

    pub fn def(&self) -> &OperatorDef {
        &self.def
    }

    pub fn op_type(&self) -> &str {
        &self.def.op_type
    }

    pub fn display_name(&self) -> &str {
        self.def.display_name()
    }

    pub fn device(&self) -> Device {
        self.context.device()
    }

    pub fn context(&self) -> &dyn DeviceContext {
        self.context.as_ref()
    }

    pub fn allocator(&self) -> Arc<dyn DeviceAllocator> {
        self.context.allocator()
    }

    pub fn args(&self) -> &ArgumentHelper {
        &self.args
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_handle(&self, index: usize) -> Option<&BlobHandle> {
        self.inputs.get(index)
    }

    pub fn output_handle(&self, index: usize) -> Option<&BlobHandle> {
        self.outputs.get(index)
    }

    /// Fails unless the definition lists between `min` and `max` inputs.
    pub fn expect_inputs(&self, min: usize, max: usize) -> C2Result<()> {
        expect_count("inputs", self.inputs.len(), min, max)
    }

    pub fn expect_outputs(&self, min: usize, max: usize) -> C2Result<()> {
        expect_count("outputs", self.outputs.len(), min, max)
    }

    /// Locks every input and output blob for one run.
    pub fn lock_io(&self) -> C2Result<OpIo<'_>> {
        OpIo::lock(&self.inputs, &self.outputs)
    }
}

fn expect_count(what: &str, actual: usize, min: usize, max: usize) -> C2Result<()> {
    if actual < min || actual > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {min}")
        } else {
            format!("{min}..={max}")
        };
        return Err(C2Error::configuration(format!(
            "expected {expected} {what}, got {actual}"
        )));
    }
    Ok(())
}

enum Guard<'a> {
    Read(RwLockReadGuard<'a, Blob>),
    Write(RwLockWriteGuard<'a, Blob>),
}

impl Guard<'_> {
    fn blob(&self) -> &Blob {
        match self {
            Guard::Read(guard) => &**guard,
            Guard::Write(guard) => &**guard,
        }
    }
}

/// Blob locks held for the duration of one operator run.
pub struct OpIo<'a> {
    guards: Vec<Guard<'a>>,
    input_slots: Vec<usize>,
    output_slots: Vec<usize>,
}

impl<'a> OpIo<'a> {
    fn lock(inputs: &'a [BlobHandle], outputs: &'a [BlobHandle]) -> C2Result<Self> {
        let mut unique: Vec<(usize, &'a BlobHandle, bool)> = inputs
            .iter()
            .map(|handle| (blob_addr(handle), handle, false))
            .chain(outputs.iter().map(|handle| (blob_addr(handle), handle, true)))
            .collect();
        unique.sort_by_key(|(addr, _, _)| *addr);
        unique.dedup_by(|later, earlier| {
            if later.0 == earlier.0 {
                earlier.2 |= later.2;
                true
            } else {
                false
            }
        });

        let mut guards = Vec::with_capacity(unique.len());
        for &(_, handle, write) in &unique {
            let guard = if write {
                Guard::Write(handle.write()?)
            } else {
                Guard::Read(handle.read()?)
            };
            guards.push(guard);
        }

        let slot = |handle: &BlobHandle| {
            let addr = blob_addr(handle);
            unique.partition_point(|(a, _, _)| *a < addr)
        };
        let input_slots = inputs.iter().map(slot).collect();
        let output_slots = outputs.iter().map(slot).collect();
        Ok(OpIo {
            guards,
            input_slots,
            output_slots,
        })
    }

    pub fn input_count(&self) -> usize {
        self.input_slots.len()
    }

    pub fn output_count(&self) -> usize {
        self.output_slots.len()
    }

    /// Whether input `input` and output `output` name the same blob.
    pub fn is_in_place(&self, input: usize, output: usize) -> bool {
        matches!(
            (self.input_slots.get(input), self.output_slots.get(output)),
            (Some(a), Some(b)) if a == b
        )
    }

    pub fn input(&self, index: usize) -> C2Result<&Blob> {
        let slot = *self
            .input_slots
            .get(index)
            .ok_or_else(|| C2Error::configuration(format!("operator has no input {index}")))?;
        Ok(self.guards[slot].blob())
    }

    pub fn input_tensor(&self, index: usize) -> C2Result<&Tensor> {
        self.input(index)?.tensor()
    }

    pub fn output(&mut self, index: usize) -> C2Result<&mut Blob> {
        let slot = *self
            .output_slots
            .get(index)
            .ok_or_else(|| C2Error::configuration(format!("operator has no output {index}")))?;
        match &mut self.guards[slot] {
            Guard::Write(guard) => Ok(&mut **guard),
            Guard::Read(_) => Err(C2Error::execution("output blob locked read-only")),
        }
    }

    /// Output tensor allocated through `allocator`, see [`Blob::tensor_mut_on`].
    pub fn output_tensor(
        &mut self,
        index: usize,
        allocator: &Arc<dyn DeviceAllocator>,
    ) -> C2Result<&mut Tensor> {
        Ok(self.output(index)?.tensor_mut_on(allocator))
    }

    /// Splits into read views of the inputs and write views of the outputs. Fails for in-place
    /// operators (an input that is also an output) and for outputs listed twice; those read and
    /// write through [`output`](Self::output) instead.
    pub fn split(&mut self) -> C2Result<(Vec<&Blob>, Vec<&mut Blob>)> {
        let mut shared: Vec<Option<&Blob>> = Vec::with_capacity(self.guards.len());
        let mut exclusive: Vec<Option<&mut Blob>> = Vec::with_capacity(self.guards.len());
        for guard in self.guards.iter_mut() {
            match guard {
                Guard::Read(guard) => {
                    shared.push(Some(&**guard));
                    exclusive.push(None);
                }
                Guard::Write(guard) => {
                    shared.push(None);
                    exclusive.push(Some(&mut **guard));
                }
            }
        }
        let inputs = self
            .input_slots
            .iter()
            .map(|&slot| {
                shared[slot].ok_or_else(|| {
                    C2Error::configuration("input is also an output; run the operator in place")
                })
            })
            .collect::<C2Result<Vec<_>>>()?;
        let outputs = self
            .output_slots
            .iter()
            .map(|&slot| {
                exclusive[slot]
                    .take()
                    .ok_or_else(|| C2Error::configuration("output blob listed more than once"))
            })
            .collect::<C2Result<Vec<_>>>()?;
        Ok((inputs, outputs))
    }
}

fn blob_addr(handle: &BlobHandle) -> usize {
    Arc::as_ptr(handle) as usize
}

/// Name of the gradient operator type paired with `op_type`.
pub fn gradient_op_type(op_type: &str) -> String {
    format!("{op_type}Gradient")
}
