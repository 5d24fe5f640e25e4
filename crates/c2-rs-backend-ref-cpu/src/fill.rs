//! Fill operators: `ConstantFill` and `UniformFill`.
//!
//! Both take their output shape from one of three places: the `shape` argument, the shape of an
//! optional input, or (with `input_as_shape`) the int64 contents of that input. `extra_shape`
//! dims are appended to an input-derived shape.

use half::f16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use c2_rs::context::CpuContext;
use c2_rs::error::{C2Error, C2Result};
use c2_rs::operator::{OpIo, Operator, OperatorBase};
use c2_rs::proto::OperatorDef;
use c2_rs::{dispatch_dtype, DataType, Workspace};

#[derive(Debug, Clone)]
struct FillShape {
    shape: Vec<usize>,
    extra_shape: Vec<usize>,
    input_as_shape: bool,
}

impl FillShape {
    fn from_base(base: &OperatorBase) -> C2Result<Self> {
        base.expect_inputs(0, 1)?;
        base.expect_outputs(1, 1)?;
        let args = base.args();
        let shape = args.repeated_arg("shape")?;
        let extra_shape = args.repeated_arg("extra_shape")?;
        let input_as_shape = args.single_arg_or("input_as_shape", false)?;
        let has_input = base.input_count() == 1;
        if has_input && args.has_arg("shape") {
            return Err(C2Error::configuration(
                "cannot set both the 'shape' argument and an input shape",
            ));
        }
        if !has_input && (input_as_shape || !extra_shape.is_empty()) {
            return Err(C2Error::configuration(
                "'input_as_shape' and 'extra_shape' need an input",
            ));
        }
        Ok(FillShape {
            shape,
            extra_shape,
            input_as_shape,
        })
    }

    fn dims(&self, io: &OpIo<'_>) -> C2Result<Vec<usize>> {
        if io.input_count() == 0 {
            return Ok(self.shape.clone());
        }
        let input = io.input_tensor(0)?;
        let mut dims = if self.input_as_shape {
            if input.ndim() != 1 {
                return Err(C2Error::shape_mismatch(format!(
                    "shape input must be 1-D, got {} dims",
                    input.ndim()
                )));
            }
            input
                .data::<i64>()?
                .iter()
                .map(|&d| {
                    usize::try_from(d).map_err(|_| {
                        C2Error::shape_mismatch(format!("negative dimension {d} in shape input"))
                    })
                })
                .collect::<C2Result<Vec<_>>>()?
        } else {
            input.dims().to_vec()
        };
        dims.extend_from_slice(&self.extra_shape);
        Ok(dims)
    }
}

/// Scalar types a fill value can be converted into.
trait FillScalar: Sized {
    fn from_f64(value: f64) -> Self;
}

macro_rules! fill_scalar {
    ($($ty:ty),+) => {
        $(
            impl FillScalar for $ty {
                fn from_f64(value: f64) -> Self {
                    value as $ty
                }
            }
        )+
    };
}

fill_scalar!(f32, f64, i8, i16, i32, i64, u8, u16);

impl FillScalar for f16 {
    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }
}

impl FillScalar for bool {
    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
}

fn dtype_arg(base: &OperatorBase) -> C2Result<DataType> {
    let tag: i32 = base
        .args()
        .single_arg_or("dtype", DataType::Float.tag())?;
    match DataType::from_tag(tag) {
        Some(DataType::Undefined | DataType::String) | None => Err(C2Error::configuration(
            format!("unsupported fill dtype tag {tag}"),
        )),
        Some(dtype) => Ok(dtype),
    }
}

/// Fills the output with `value` (read from a float or integer argument).
pub struct ConstantFill {
    base: OperatorBase,
    shape: FillShape,
    dtype: DataType,
    value: f64,
}

impl ConstantFill {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        let shape = FillShape::from_base(&base)?;
        let dtype = dtype_arg(&base)?;
        let value = match base.args().get("value") {
            Some(arg) => arg.f.map(f64::from).or(arg.i.map(|i| i as f64)).unwrap_or(0.0),
            None => 0.0,
        };
        Ok(ConstantFill {
            base,
            shape,
            dtype,
            value,
        })
    }
}

impl Operator for ConstantFill {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let dims = self.shape.dims(&io)?;
        let out = io.output_tensor(0, &allocator)?;
        out.resize_with_dtype(&dims, self.dtype)?;
        let value = self.value;
        dispatch_dtype!(
            self.dtype,
            [
                Float => f32,
                Double => f64,
                Float16 => f16,
                Int8 => i8,
                Int16 => i16,
                Int32 => i32,
                Int64 => i64,
                Uint8 => u8,
                Uint16 => u16,
                Bool => bool,
            ],
            T => out.fill(<T as FillScalar>::from_f64(value))
        )
    }
}

/// Samples floats uniformly from `[min, max)`. A `random_seed` on the device option makes the
/// sequence reproducible across instances, though each run continues the same stream.
pub struct UniformFill {
    base: OperatorBase,
    shape: FillShape,
    min: f32,
    max: f32,
    rng: StdRng,
}

impl UniformFill {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let context = CpuContext::from_option(def.device_option.as_ref());
        let rng = match context.random_seed() {
            Some(seed) => StdRng::seed_from_u64(u64::from(seed)),
            None => StdRng::from_entropy(),
        };
        let base = OperatorBase::new(def, ws, Box::new(context))?;
        let shape = FillShape::from_base(&base)?;
        let min = base.args().single_arg_or("min", 0.0f32)?;
        let max = base.args().single_arg_or("max", 1.0f32)?;
        if min >= max {
            return Err(C2Error::configuration(format!(
                "UniformFill needs min < max, got [{min}, {max})"
            )));
        }
        Ok(UniformFill {
            base,
            shape,
            min,
            max,
            rng,
        })
    }
}

impl Operator for UniformFill {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let dims = self.shape.dims(&io)?;
        let out = io.output_tensor(0, &allocator)?;
        out.resize_with_dtype(&dims, DataType::Float)?;
        for value in out.mutable_data::<f32>()? {
            *value = self.rng.gen_range(self.min..self.max);
        }
        Ok(())
    }
}
