//! Operators registered for `DeviceType::Hip`.
//!
//! Data movement (`Copy*`) and fills are implemented here on top of the HIP runtime. The math
//! operators bind to externally supplied kernels through [`KernelOperator`].

use std::sync::Arc;

use c2_rs::context::{cpu_allocator, DeviceAllocator, DeviceContext, DeviceType};
use c2_rs::error::{C2Error, C2Result};
use c2_rs::kernel::KernelOperator;
use c2_rs::operator::{operator_factory, Operator, OperatorBase, OperatorRegistry};
use c2_rs::proto::OperatorDef;
use c2_rs::{dispatch_dtype, DataType, Tensor, Workspace};

use crate::context::HipContext;

/// Kernel-backed operator types: `(op_type, engine, kernel name)`.
pub const KERNEL_OPERATORS: &[(&str, &str, &str)] = &[
    ("Glu", "", "Glu"),
    ("Accuracy", "", "Accuracy"),
    ("Summarize", "", "Summarize"),
    ("MaxPoolWithIndex", "", "MaxPoolWithIndex"),
    ("MaxPoolWithIndexGradient", "", "MaxPoolWithIndexGradient"),
    ("Adam", "", "Adam"),
    ("SparseAdam", "", "SparseAdam"),
    ("AddPadding", "", "AddPadding"),
    ("RemovePadding", "", "RemovePadding"),
    ("GatherPadding", "", "GatherPadding"),
    ("Softmax", "MIOPEN", "MIOPEN:Softmax"),
    ("SoftmaxGradient", "MIOPEN", "MIOPEN:SoftmaxGradient"),
];

fn hip_base(def: &OperatorDef, ws: &Workspace) -> C2Result<OperatorBase> {
    let context = HipContext::from_option(def.device_option.as_ref())?;
    OperatorBase::new(def, ws, Box::new(context))
}

/// Which side of the host/device boundary each end of a copy lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyDirection {
    CpuToGpu,
    GpuToCpu,
    GpuToGpu,
}

impl CopyDirection {
    fn source_on_host(self) -> bool {
        self == CopyDirection::CpuToGpu
    }
}

/// `CopyCPUToGPU`, `CopyGPUToCPU` and the device-to-device `Copy`.
pub struct HipCopyOp {
    base: OperatorBase,
    direction: CopyDirection,
    output_allocator: Arc<dyn DeviceAllocator>,
}

impl HipCopyOp {
    fn new(def: &OperatorDef, ws: &Workspace, direction: CopyDirection) -> C2Result<Self> {
        let base = hip_base(def, ws)?;
        base.expect_inputs(1, 1)?;
        base.expect_outputs(1, 1)?;
        let output_allocator = if direction == CopyDirection::GpuToCpu {
            cpu_allocator()
        } else {
            base.allocator()
        };
        Ok(HipCopyOp {
            base,
            direction,
            output_allocator,
        })
    }

    pub fn cpu_to_gpu(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        Self::new(def, ws, CopyDirection::CpuToGpu)
    }

    pub fn gpu_to_cpu(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        Self::new(def, ws, CopyDirection::GpuToCpu)
    }

    pub fn gpu_to_gpu(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        Self::new(def, ws, CopyDirection::GpuToGpu)
    }
}

impl Operator for HipCopyOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let mut io = self.base.lock_io()?;
        if io.is_in_place(0, 0) {
            return Ok(());
        }
        let (inputs, mut outputs) = io.split()?;
        let src = inputs[0].tensor()?;
        if src.device().is_host() != self.direction.source_on_host() {
            return Err(C2Error::execution(format!(
                "{} expects its input {}, found it on {}",
                self.base.op_type(),
                if self.direction.source_on_host() {
                    "in host memory"
                } else {
                    "on a HIP device"
                },
                src.device()
            )));
        }
        let dst = outputs[0].tensor_mut_on(&self.output_allocator);
        let ctx = self.base.context();
        dst.copy_from(src, ctx)?;
        // Host memory must not change under the copy once the blob locks drop.
        if self.direction != CopyDirection::GpuToGpu {
            ctx.synchronize()?;
        }
        Ok(())
    }
}

/// `ConstantFill` on a HIP device.
///
/// Zero fills are a device memset. Other values are staged in a host tensor owned by the operator
/// and uploaded, so the staging memory outlives the asynchronous copy.
pub struct HipConstantFill {
    base: OperatorBase,
    dtype: DataType,
    value: f64,
    shape: Vec<usize>,
    staging: Tensor,
}

impl HipConstantFill {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = hip_base(def, ws)?;
        base.expect_inputs(0, 1)?;
        base.expect_outputs(1, 1)?;
        let args = base.args();
        if base.input_count() == 1 && args.has_arg("shape") {
            return Err(C2Error::configuration(
                "cannot set both the 'shape' argument and an input shape",
            ));
        }
        let tag: i32 = args.single_arg_or("dtype", DataType::Float.tag())?;
        let dtype = match DataType::from_tag(tag) {
            Some(
                dtype @ (DataType::Float | DataType::Double | DataType::Int32 | DataType::Int64),
            ) => dtype,
            _ => {
                return Err(C2Error::type_mismatch(format!(
                    "HIP ConstantFill does not support dtype tag {tag}"
                )))
            }
        };
        let value = match args.get("value") {
            Some(arg) => arg.f.map(f64::from).or(arg.i.map(|i| i as f64)).unwrap_or(0.0),
            None => 0.0,
        };
        let shape = args.repeated_arg("shape")?;
        Ok(HipConstantFill {
            base,
            dtype,
            value,
            shape,
            staging: Tensor::cpu(),
        })
    }
}

impl Operator for HipConstantFill {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let dims = if io.input_count() == 1 {
            io.input_tensor(0)?.dims().to_vec()
        } else {
            self.shape.clone()
        };
        let out = io.output_tensor(0, &allocator)?;
        out.resize_with_dtype(&dims, self.dtype)?;
        let nbytes = out.nbytes();
        if nbytes == 0 {
            return Ok(());
        }

        let ctx = self
            .base
            .context()
            .as_any()
            .downcast_ref::<HipContext>()
            .ok_or_else(|| C2Error::execution("HIP ConstantFill bound to a non-HIP context"))?;
        if self.value == 0.0 {
            return ctx.memset_async(out.buffer_mut()?, 0, nbytes);
        }

        self.staging.resize_with_dtype(&dims, self.dtype)?;
        let value = self.value;
        dispatch_dtype!(
            self.dtype,
            [Float => f32, Double => f64, Int32 => i32, Int64 => i64],
            T => self.staging.fill(value as T)
        )?;
        out.copy_from(&self.staging, ctx)
    }
}

fn kernel_factory(
    kernel_name: &'static str,
) -> impl Fn(&OperatorDef, &Workspace) -> C2Result<Box<dyn Operator>> + Send + Sync + 'static {
    move |def, ws| {
        let context = HipContext::from_option(def.device_option.as_ref())?;
        let op = KernelOperator::new(def, ws, Box::new(context), kernel_name)?;
        Ok(Box::new(op) as Box<dyn Operator>)
    }
}

/// Adds the HIP operators to `registry`.
pub fn register_hip_operators(registry: &mut OperatorRegistry) -> C2Result<()> {
    let hip = DeviceType::Hip;
    registry.register_default("CopyCPUToGPU", hip, operator_factory(HipCopyOp::cpu_to_gpu))?;
    registry.register_default("CopyGPUToCPU", hip, operator_factory(HipCopyOp::gpu_to_cpu))?;
    registry.register_default("Copy", hip, operator_factory(HipCopyOp::gpu_to_gpu))?;
    registry.register_default("ConstantFill", hip, operator_factory(HipConstantFill::new))?;
    for &(op_type, engine, kernel) in KERNEL_OPERATORS {
        registry.register(op_type, hip, engine, kernel_factory(kernel))?;
    }
    Ok(())
}
