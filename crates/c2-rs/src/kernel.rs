//! Device kernel capability.
//!
//! Math kernels are supplied from outside the runtime, per device type, under a kernel name.
//! [`KernelOperator`] is the generic operator that binds to one of them at construction time and
//! launches it on its device context. The kernel table is append-only and may grow while the
//! process runs, so kernels registered through the C entry points become visible to operators
//! created afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::context::{DeviceAllocator, DeviceContext, DeviceType};
use crate::error::{C2Error, C2Result};
use crate::operator::{ArgumentHelper, OpIo, Operator, OperatorBase};
use crate::proto::OperatorDef;
use crate::tensor::Tensor;
use crate::workspace::Workspace;

/// A device kernel.
pub trait Kernel: Send + Sync {
    /// Enqueues the computation on `ctx`'s stream. The operator synchronizes afterwards.
    fn launch(&self, ctx: &dyn DeviceContext, io: &mut KernelIo<'_>) -> C2Result<()>;
}

impl<F> Kernel for F
where
    F: Fn(&dyn DeviceContext, &mut KernelIo<'_>) -> C2Result<()> + Send + Sync,
{
    fn launch(&self, ctx: &dyn DeviceContext, io: &mut KernelIo<'_>) -> C2Result<()> {
        self(ctx, io)
    }
}

/// Tensors and arguments handed to a kernel for one launch.
pub struct KernelIo<'a> {
    io: OpIo<'a>,
    allocator: Arc<dyn DeviceAllocator>,
    def: &'a OperatorDef,
    args: &'a ArgumentHelper,
}

impl<'a> KernelIo<'a> {
    pub fn new(
        io: OpIo<'a>,
        allocator: Arc<dyn DeviceAllocator>,
        def: &'a OperatorDef,
        args: &'a ArgumentHelper,
    ) -> Self {
        KernelIo {
            io,
            allocator,
            def,
            args,
        }
    }

    pub fn def(&self) -> &OperatorDef {
        self.def
    }

    pub fn args(&self) -> &ArgumentHelper {
        self.args
    }

    pub fn input_count(&self) -> usize {
        self.io.input_count()
    }

    pub fn output_count(&self) -> usize {
        self.io.output_count()
    }

    pub fn input(&self, index: usize) -> C2Result<&Tensor> {
        self.io.input_tensor(index)
    }

    /// Output tensor on the operator's device. In-place outputs alias their input.
    pub fn output(&mut self, index: usize) -> C2Result<&mut Tensor> {
        self.io.output_tensor(index, &self.allocator)
    }

    pub fn is_in_place(&self, input: usize, output: usize) -> bool {
        self.io.is_in_place(input, output)
    }

    /// Read views of every input and write views of every output. Fails for in-place launches.
    pub fn tensors(&mut self) -> C2Result<(Vec<&Tensor>, Vec<&mut Tensor>)> {
        let allocator = Arc::clone(&self.allocator);
        let (inputs, outputs) = self.io.split()?;
        let inputs = inputs
            .into_iter()
            .map(|blob| blob.tensor())
            .collect::<C2Result<Vec<_>>>()?;
        let outputs = outputs
            .into_iter()
            .map(|blob| blob.tensor_mut_on(&allocator))
            .collect();
        Ok((inputs, outputs))
    }
}

type KernelTable = HashMap<(String, DeviceType), Arc<dyn Kernel>>;

static KERNELS: Lazy<RwLock<KernelTable>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers `kernel` under `(name, device)`. A second registration of the same key fails.
pub fn register_kernel(
    name: impl Into<String>,
    device: DeviceType,
    kernel: Arc<dyn Kernel>,
) -> C2Result<()> {
    let name = name.into();
    let mut table = KERNELS.write()?;
    let key = (name, device);
    if table.contains_key(&key) {
        return Err(C2Error::configuration(format!(
            "kernel '{}' already registered for {}",
            key.0,
            device.as_str()
        )));
    }
    debug!(kernel = %key.0, device = device.as_str(), "registered kernel");
    table.insert(key, kernel);
    Ok(())
}

pub fn lookup_kernel(name: &str, device: DeviceType) -> C2Result<Option<Arc<dyn Kernel>>> {
    Ok(KERNELS.read()?.get(&(name.to_string(), device)).cloned())
}

/// Registered `(name, device)` pairs, sorted.
pub fn registered_kernels() -> C2Result<Vec<(String, DeviceType)>> {
    let mut keys: Vec<_> = KERNELS.read()?.keys().cloned().collect();
    keys.sort();
    Ok(keys)
}

/// Operator whose body is a registered kernel.
pub struct KernelOperator {
    base: OperatorBase,
    kernel_name: String,
    kernel: Arc<dyn Kernel>,
}

impl fmt::Debug for KernelOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelOperator")
            .field("base", &self.base)
            .field("kernel", &self.kernel_name)
            .finish()
    }
}

impl KernelOperator {
    /// Binds `def` to the kernel named `kernel_name` for the context's device type. A missing
    /// kernel is reported as `OperatorNotFound` naming the kernel.
    pub fn new(
        def: &OperatorDef,
        ws: &Workspace,
        context: Box<dyn DeviceContext>,
        kernel_name: &str,
    ) -> C2Result<Self> {
        let device = context.device().kind;
        let kernel = lookup_kernel(kernel_name, device)?
            .ok_or_else(|| C2Error::operator_not_found(kernel_name, device, None))?;
        let base = OperatorBase::new(def, ws, context)?;
        Ok(KernelOperator {
            base,
            kernel_name: kernel_name.to_string(),
            kernel,
        })
    }

    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }
}

impl Operator for KernelOperator {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let base = &self.base;
        let mut io = KernelIo::new(base.lock_io()?, base.allocator(), base.def(), base.args());
        self.kernel.launch(base.context(), &mut io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CpuContext;
    use crate::error::ErrorKind;

    fn double(_ctx: &dyn DeviceContext, io: &mut KernelIo<'_>) -> C2Result<()> {
        let (inputs, mut outputs) = io.tensors()?;
        let x = inputs[0].data::<f32>()?;
        let y = &mut outputs[0];
        y.resize_with_dtype(inputs[0].dims(), inputs[0].dtype())?;
        for (out, v) in y.mutable_data::<f32>()?.iter_mut().zip(x) {
            *out = v * 2.0;
        }
        Ok(())
    }

    #[test]
    fn kernel_operator_launches_registered_kernel() {
        register_kernel("KernelTestDouble", DeviceType::Cpu, Arc::new(double)).unwrap();
        let ws = Workspace::new();
        ws.feed_tensor("X", Tensor::from_vec(&[3], vec![1.0f32, 2.0, 3.0]).unwrap())
            .unwrap();
        let def = OperatorDef::new("Double", ["X"], ["Y"]);
        let mut op = KernelOperator::new(
            &def,
            &ws,
            Box::new(CpuContext::new()),
            "KernelTestDouble",
        )
        .unwrap();
        op.run().unwrap();
        assert_eq!(ws.fetch_vec::<f32>("Y").unwrap(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn missing_kernel_is_operator_not_found() {
        let ws = Workspace::new();
        let def = OperatorDef::new("Nope", Vec::<String>::new(), ["Y"]);
        let err = KernelOperator::new(&def, &ws, Box::new(CpuContext::new()), "KernelTestNope")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperatorNotFound);
        assert!(err.to_string().contains("KernelTestNope"));
    }

    #[test]
    fn duplicate_kernel_is_rejected() {
        register_kernel("KernelTestDup", DeviceType::Hip, Arc::new(double)).unwrap();
        let err = register_kernel("KernelTestDup", DeviceType::Hip, Arc::new(double)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
