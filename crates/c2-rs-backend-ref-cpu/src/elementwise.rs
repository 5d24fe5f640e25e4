//! Element-wise arithmetic: `Add`, `Sum`, `Scale`, plus the host `Copy`.
//!
//! Results are computed into a scratch vector before the output is touched, so every operator
//! here may run in place.

use std::ops::Add;

use c2_rs::error::{C2Error, C2Result};
use c2_rs::operator::{OpIo, Operator, OperatorBase};
use c2_rs::proto::OperatorDef;
use c2_rs::tensor::TensorElement;
use c2_rs::{dispatch_dtype, DataType, Workspace};

trait Numeric: TensorElement + Add<Output = Self> {}

impl<T: TensorElement + Add<Output = T>> Numeric for T {}

fn write_output<T: TensorElement>(
    base: &OperatorBase,
    io: &mut OpIo<'_>,
    dims: &[usize],
    values: &[T],
) -> C2Result<()> {
    let out = io.output_tensor(0, &base.allocator())?;
    out.resize_with_dtype(dims, T::DTYPE)?;
    out.mutable_data::<T>()?.copy_from_slice(values);
    Ok(())
}

/// `C = A + B`. With `broadcast` set, `B`'s dims must equal the trailing dims of `A`.
pub struct AddOp {
    base: OperatorBase,
    broadcast: bool,
}

impl AddOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(2, 2)?;
        base.expect_outputs(1, 1)?;
        let broadcast = base.args().single_arg_or("broadcast", false)?;
        Ok(AddOp { base, broadcast })
    }

    fn compute<T: Numeric>(&self, io: &mut OpIo<'_>) -> C2Result<()> {
        let (dims, values) = {
            let a = io.input_tensor(0)?;
            let b = io.input_tensor(1)?;
            let suffix_ok = self.broadcast
                && b.ndim() <= a.ndim()
                && a.dims()[a.ndim() - b.ndim()..] == *b.dims();
            if a.dims() != b.dims() && !suffix_ok {
                return Err(C2Error::shape_mismatch(format!(
                    "Add operands have dims {:?} and {:?}",
                    a.dims(),
                    b.dims()
                )));
            }
            let a_data = a.data::<T>()?;
            let b_data = b.data::<T>()?;
            let values: Vec<T> = if b_data.is_empty() {
                Vec::new()
            } else {
                a_data
                    .iter()
                    .enumerate()
                    .map(|(i, &x)| x + b_data[i % b_data.len()])
                    .collect()
            };
            (a.dims().to_vec(), values)
        };
        write_output(&self.base, io, &dims, &values)
    }
}

impl Operator for AddOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let mut io = self.base.lock_io()?;
        let dtype = io.input_tensor(0)?.dtype();
        if io.input_tensor(1)?.dtype() != dtype {
            return Err(C2Error::type_mismatch("Add operands differ in element type"));
        }
        dispatch_dtype!(
            dtype,
            [Float => f32, Double => f64, Int32 => i32, Int64 => i64],
            T => self.compute::<T>(&mut io)
        )
    }
}

/// Element-wise sum of one or more same-shaped inputs.
pub struct SumOp {
    base: OperatorBase,
}

impl SumOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(1, usize::MAX)?;
        base.expect_outputs(1, 1)?;
        Ok(SumOp { base })
    }

    fn compute<T: Numeric>(&self, io: &mut OpIo<'_>) -> C2Result<()> {
        let (dims, values) = {
            let first = io.input_tensor(0)?;
            let mut acc = first.to_vec::<T>()?;
            for index in 1..io.input_count() {
                let next = io.input_tensor(index)?;
                if next.dims() != first.dims() {
                    return Err(C2Error::shape_mismatch(format!(
                        "Sum input {index} has dims {:?}, expected {:?}",
                        next.dims(),
                        first.dims()
                    )));
                }
                for (total, &v) in acc.iter_mut().zip(next.data::<T>()?) {
                    *total = *total + v;
                }
            }
            (first.dims().to_vec(), acc)
        };
        write_output(&self.base, io, &dims, &values)
    }
}

impl Operator for SumOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let mut io = self.base.lock_io()?;
        let dtype = io.input_tensor(0)?.dtype();
        dispatch_dtype!(
            dtype,
            [Float => f32, Double => f64, Int32 => i32, Int64 => i64],
            T => self.compute::<T>(&mut io)
        )
    }
}

/// `Y = scale * X` over floats.
pub struct ScaleOp {
    base: OperatorBase,
    scale: f32,
}

impl ScaleOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(1, 1)?;
        base.expect_outputs(1, 1)?;
        let scale = base.args().single_arg_or("scale", 1.0f32)?;
        Ok(ScaleOp { base, scale })
    }
}

impl Operator for ScaleOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let mut io = self.base.lock_io()?;
        let (dims, values) = {
            let x = io.input_tensor(0)?;
            if x.dtype() != DataType::Float {
                return Err(C2Error::type_mismatch(format!(
                    "Scale expects Float input, got {:?}",
                    x.dtype()
                )));
            }
            let values: Vec<f32> = x.data::<f32>()?.iter().map(|v| v * self.scale).collect();
            (x.dims().to_vec(), values)
        };
        write_output(&self.base, &mut io, &dims, &values)
    }
}

/// Copies a tensor within host memory. Copying a blob onto itself is a no-op.
pub struct CopyOp {
    base: OperatorBase,
}

impl CopyOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(1, 1)?;
        base.expect_outputs(1, 1)?;
        Ok(CopyOp { base })
    }
}

impl Operator for CopyOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        if io.is_in_place(0, 0) {
            return Ok(());
        }
        let (inputs, mut outputs) = io.split()?;
        let src = inputs[0].tensor()?;
        let dst = outputs[0].tensor_mut_on(&allocator);
        dst.copy_from(src, self.base.context())
    }
}
