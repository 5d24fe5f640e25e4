//! Reference host implementations of the standard operators.
//!
//! Everything here registers for [`DeviceType::Cpu`] with the default engine. Linking the crate
//! is enough to make the operators visible to the process-wide registry; [`init`] exists for
//! binaries that would otherwise not reference anything from it.

mod counter;
mod elementwise;
mod fill;
mod glu;
mod metrics;

use c2_rs::context::DeviceType;
use c2_rs::error::C2Result;
use c2_rs::operator::{operator_factory, OperatorRegistrar, OperatorRegistry};

pub use counter::{Counter, CounterQueryOp, CreateCounterOp, IterOp, ResetCounterOp};
pub use elementwise::{AddOp, CopyOp, ScaleOp, SumOp};
pub use fill::{ConstantFill, UniformFill};
pub use glu::{GluGradientOp, GluOp};
pub use metrics::{AccuracyOp, SummarizeOp, SummaryStats};

/// Adds every reference operator to `registry`.
pub fn register_cpu_operators(registry: &mut OperatorRegistry) -> C2Result<()> {
    let cpu = DeviceType::Cpu;
    registry.register_default("ConstantFill", cpu, operator_factory(ConstantFill::new))?;
    registry.register_default("UniformFill", cpu, operator_factory(UniformFill::new))?;
    registry.register_default("Copy", cpu, operator_factory(CopyOp::new))?;
    registry.register_default("Add", cpu, operator_factory(AddOp::new))?;
    registry.register_default("Sum", cpu, operator_factory(SumOp::new))?;
    registry.register_default("Scale", cpu, operator_factory(ScaleOp::new))?;
    registry.register_default("Accuracy", cpu, operator_factory(AccuracyOp::new))?;
    registry.register_default("Summarize", cpu, operator_factory(SummarizeOp::new))?;
    registry.register_default("Glu", cpu, operator_factory(GluOp::new))?;
    registry.register_default("GluGradient", cpu, operator_factory(GluGradientOp::new))?;
    registry.register_default("CreateCounter", cpu, operator_factory(CreateCounterOp::new))?;
    registry.register_default("ResetCounter", cpu, operator_factory(ResetCounterOp::new))?;
    registry.register_default("CountDown", cpu, operator_factory(CounterQueryOp::count_down))?;
    registry.register_default(
        "CheckCounterDone",
        cpu,
        operator_factory(CounterQueryOp::check_done),
    )?;
    registry.register_default("RetrieveCount", cpu, operator_factory(CounterQueryOp::retrieve))?;
    registry.register_default("Iter", cpu, operator_factory(IterOp::new))?;
    Ok(())
}

#[c2_rs::linkme::distributed_slice(c2_rs::operator::OPERATOR_REGISTRARS)]
static REGISTER_CPU_OPERATORS: OperatorRegistrar = register_cpu_operators;

/// Keeps the registrar linked into binaries that never name this crate otherwise.
pub fn init() {
    let _ = std::hint::black_box(&REGISTER_CPU_OPERATORS);
}
