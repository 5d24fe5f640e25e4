//! Gated linear unit and its gradient.
//!
//! The input is split into halves `a` and `b` along `dim` (default: the last axis), and
//! `Y = a * sigmoid(b)`.

use c2_rs::error::{C2Error, C2Result};
use c2_rs::operator::{Operator, OperatorBase};
use c2_rs::proto::OperatorDef;
use c2_rs::{DataType, Workspace};

/// `(outer, half, inner)` extents of a split along `dim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GluSplit {
    pub outer: usize,
    pub half: usize,
    pub inner: usize,
}

impl GluSplit {
    pub(crate) fn new(dims: &[usize], dim: i64) -> C2Result<(Self, usize)> {
        let rank = dims.len() as i64;
        let axis = if dim < 0 { dim + rank } else { dim };
        if axis < 0 || axis >= rank {
            return Err(C2Error::configuration(format!(
                "dim {dim} out of range for a {rank}-D input"
            )));
        }
        let axis = axis as usize;
        if dims[axis] % 2 != 0 {
            return Err(C2Error::shape_mismatch(format!(
                "split dimension {axis} has odd size {}",
                dims[axis]
            )));
        }
        let split = GluSplit {
            outer: dims[..axis].iter().product(),
            half: dims[axis] / 2,
            inner: dims[axis + 1..].iter().product(),
        };
        Ok((split, axis))
    }

    /// Flat indices of `(a, b)` in the input for flat output index `index`.
    fn source(&self, index: usize) -> (usize, usize) {
        let i = index / (self.half * self.inner);
        let j = index / self.inner % self.half;
        let k = index % self.inner;
        let a = i * 2 * self.half * self.inner + j * self.inner + k;
        (a, a + self.half * self.inner)
    }

    fn output_len(&self) -> usize {
        self.outer * self.half * self.inner
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub struct GluOp {
    base: OperatorBase,
    dim: i64,
}

impl GluOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(1, 1)?;
        base.expect_outputs(1, 1)?;
        let dim = base.args().single_arg_or("dim", -1i64)?;
        Ok(GluOp { base, dim })
    }
}

impl Operator for GluOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let (dims, values) = {
            let x = io.input_tensor(0)?;
            let (split, axis) = GluSplit::new(x.dims(), self.dim)?;
            let x = x.data::<f32>()?;
            let values: Vec<f32> = (0..split.output_len())
                .map(|index| {
                    let (a, b) = split.source(index);
                    x[a] * sigmoid(x[b])
                })
                .collect();
            let mut dims = io.input_tensor(0)?.dims().to_vec();
            dims[axis] /= 2;
            (dims, values)
        };
        let out = io.output_tensor(0, &allocator)?;
        out.resize_with_dtype(&dims, DataType::Float)?;
        out.mutable_data::<f32>()?.copy_from_slice(&values);
        Ok(())
    }
}

/// Inputs `dY`, `X`; output `dX` shaped like `X`.
pub struct GluGradientOp {
    base: OperatorBase,
    dim: i64,
}

impl GluGradientOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(2, 2)?;
        base.expect_outputs(1, 1)?;
        let dim = base.args().single_arg_or("dim", -1i64)?;
        Ok(GluGradientOp { base, dim })
    }
}

impl Operator for GluGradientOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let (dims, grad) = {
            let dy = io.input_tensor(0)?;
            let x = io.input_tensor(1)?;
            let (split, _) = GluSplit::new(x.dims(), self.dim)?;
            if dy.numel() != split.output_len() {
                return Err(C2Error::shape_mismatch(format!(
                    "gradient has {} elements, expected {}",
                    dy.numel(),
                    split.output_len()
                )));
            }
            let dy = dy.data::<f32>()?;
            let xs = x.data::<f32>()?;
            let mut grad = vec![0.0f32; xs.len()];
            for (index, &g) in dy.iter().enumerate() {
                let (a, b) = split.source(index);
                let gate = sigmoid(xs[b]);
                grad[a] = g * gate;
                grad[b] = g * xs[a] * gate * (1.0 - gate);
            }
            (x.dims().to_vec(), grad)
        };
        let out = io.output_tensor(0, &allocator)?;
        out.resize_with_dtype(&dims, DataType::Float)?;
        out.mutable_data::<f32>()?.copy_from_slice(&grad);
        Ok(())
    }
}
