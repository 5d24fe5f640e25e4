//! Test-only CPU operators registered into the process-wide registry.

#![allow(dead_code)]

use std::thread;
use std::time::Duration;

use c2_rs::context::DeviceType;
use c2_rs::error::{C2Error, C2Result};
use c2_rs::operator::{
    operator_factory, Operator, OperatorBase, OperatorRegistry, OPERATOR_REGISTRARS,
};
use c2_rs::proto::OperatorDef;
use c2_rs::tensor::DataType;
use c2_rs::workspace::Workspace;
use c2_rs::Tensor;

#[c2_rs::linkme::distributed_slice(OPERATOR_REGISTRARS)]
static REGISTER_TEST_OPERATORS: c2_rs::operator::OperatorRegistrar = register_test_operators;

fn register_test_operators(registry: &mut OperatorRegistry) -> C2Result<()> {
    let cpu = DeviceType::Cpu;
    registry.register_default("TestFill", cpu, operator_factory(TestFill::new))?;
    registry.register_default("TestAddOne", cpu, operator_factory(TestAddOne::new))?;
    registry.register_default("TestIncrement", cpu, operator_factory(TestIncrement::new))?;
    registry.register_default("TestCountDown", cpu, operator_factory(TestCountDown::new))?;
    registry.register_default("TestFail", cpu, operator_factory(TestFail::new))?;
    registry.register_default("TestPanic", cpu, operator_factory(TestPanic::new))?;
    registry.register_default("Foo", DeviceType::Cuda, operator_factory(TestFail::new))?;
    registry.register("TestFill", cpu, "SLOW", operator_factory(SlowFill::new))?;
    Ok(())
}

/// Writes `value` into a float tensor of shape `shape`.
pub struct TestFill {
    base: OperatorBase,
    shape: Vec<usize>,
    value: f32,
}

impl TestFill {
    fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        let shape = base.args().repeated_arg("shape")?;
        let value = base.args().single_arg_or("value", 0.0f32)?;
        Ok(TestFill { base, shape, value })
    }
}

impl Operator for TestFill {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let out = io.output_tensor(0, &allocator)?;
        out.resize_with_dtype(&self.shape, DataType::Float)?;
        out.fill(self.value)
    }
}

/// Same as `TestFill` after sleeping `sleep_ms`.
pub struct SlowFill {
    inner: TestFill,
    sleep: Duration,
}

impl SlowFill {
    fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let inner = TestFill::new(def, ws)?;
        let sleep_ms: u64 = inner.base.args().single_arg_or("sleep_ms", 50i64)? as u64;
        Ok(SlowFill {
            inner,
            sleep: Duration::from_millis(sleep_ms),
        })
    }
}

impl Operator for SlowFill {
    fn base(&self) -> &OperatorBase {
        self.inner.base()
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        thread::sleep(self.sleep);
        self.inner.run_on_device()
    }
}

/// `Y = X + 1` over floats.
pub struct TestAddOne {
    base: OperatorBase,
}

impl TestAddOne {
    fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        Ok(TestAddOne {
            base: OperatorBase::cpu(def, ws)?,
        })
    }
}

impl Operator for TestAddOne {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let (inputs, mut outputs) = io.split()?;
        let x = inputs[0].tensor()?;
        let y = outputs[0].tensor_mut_on(&allocator);
        y.resize_with_dtype(x.dims(), DataType::Float)?;
        for (out, v) in y.mutable_data::<f32>()?.iter_mut().zip(x.data::<f32>()?) {
            *out = v + 1.0;
        }
        Ok(())
    }
}

/// In-place `X += 1` over a scalar int64 counter, created at zero when empty.
pub struct TestIncrement {
    base: OperatorBase,
}

impl TestIncrement {
    fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        Ok(TestIncrement {
            base: OperatorBase::cpu(def, ws)?,
        })
    }
}

impl Operator for TestIncrement {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let counter = io.output_tensor(0, &allocator)?;
        if counter.dtype() != DataType::Int64 {
            counter.resize_with_dtype(&[], DataType::Int64)?;
            counter.fill(0i64)?;
        }
        counter.mutable_data::<i64>()?[0] += 1;
        Ok(())
    }
}

/// Decrements the int64 counter in input 0 (in place) and writes `counter <= 0` to output 1.
pub struct TestCountDown {
    base: OperatorBase,
}

impl TestCountDown {
    fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(1, 1)?;
        base.expect_outputs(2, 2)?;
        Ok(TestCountDown { base })
    }
}

impl Operator for TestCountDown {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let remaining = {
            let counter = io.output_tensor(0, &allocator)?;
            let value = &mut counter.mutable_data::<i64>()?[0];
            *value -= 1;
            *value
        };
        let done = io.output_tensor(1, &allocator)?;
        done.resize_with_dtype(&[], DataType::Bool)?;
        done.fill(remaining <= 0)
    }
}

/// Always fails with an execution error.
pub struct TestFail {
    base: OperatorBase,
}

impl TestFail {
    fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        Ok(TestFail {
            base: OperatorBase::cpu(def, ws)?,
        })
    }
}

impl Operator for TestFail {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        Err(C2Error::execution("deliberate failure"))
    }
}

/// Panics instead of returning an error.
pub struct TestPanic {
    base: OperatorBase,
}

impl TestPanic {
    fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        Ok(TestPanic {
            base: OperatorBase::cpu(def, ws)?,
        })
    }
}

impl Operator for TestPanic {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        panic!("operator blew up");
    }
}

pub fn fill(output: &str, shape: &[i64], value: f32) -> OperatorDef {
    OperatorDef::new("TestFill", Vec::<String>::new(), [output])
        .with_arg(c2_rs::proto::Argument::ints("shape", shape.iter().copied()))
        .with_arg(c2_rs::proto::Argument::float("value", value))
}

pub fn counter(ws: &Workspace, name: &str, value: i64) -> C2Result<()> {
    ws.feed_tensor(name, Tensor::scalar(value)?)
}
