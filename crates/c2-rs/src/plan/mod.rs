//! Plan execution: instantiate a plan's nets, then drive its tree of execution steps.
//!
//! Leaf steps run their nets in order once per iteration. Composite steps run their sub-steps,
//! in order or each on its own thread. Sub-steps with `run_every_ms` run as periodic background
//! tasks beside their siblings. A step's stop blob is read after every iteration and after every
//! sequential sub-step; when it reads true the step ends and its parent carries on.

mod step;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::info;

use crate::error::{C2Error, C2Result};
use crate::proto::{ExecutionStep, NetDef, PlanDef};
use crate::workspace::Workspace;

use step::run_step;

/// How a step execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Ran every iteration it was asked to.
    Finished,
    /// The stop blob ended it before its iterations or sub-steps were exhausted.
    StoppedEarly,
}

/// Diagnostics for one step, aggregated over every time it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub iterations: u64,
    pub outcome: StepOutcome,
    pub substeps: Vec<StepReport>,
}

impl StepReport {
    fn new(name: &str) -> Self {
        StepReport {
            name: name.to_string(),
            iterations: 0,
            outcome: StepOutcome::Finished,
            substeps: Vec::new(),
        }
    }

    /// Folds a later execution of the same step into this report.
    fn absorb(&mut self, other: StepReport) {
        self.iterations += other.iterations;
        self.outcome = other.outcome;
        if self.substeps.len() != other.substeps.len() {
            self.substeps = other.substeps;
            return;
        }
        for (mine, theirs) in self.substeps.iter_mut().zip(other.substeps) {
            mine.absorb(theirs);
        }
    }

    /// Depth-first search for a step report by name.
    pub fn find(&self, name: &str) -> Option<&StepReport> {
        if self.name == name {
            return Some(self);
        }
        self.substeps.iter().find_map(|sub| sub.find(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanReport {
    pub plan: String,
    pub steps: Vec<StepReport>,
}

impl PlanReport {
    pub fn find(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find_map(|step| step.find(name))
    }
}

/// Net definitions a plan's steps may refer to.
pub(crate) struct PlanNets<'p> {
    defs: HashMap<&'p str, &'p NetDef>,
}

impl<'p> PlanNets<'p> {
    fn new(plan: &'p PlanDef) -> Self {
        PlanNets {
            defs: plan
                .network
                .iter()
                .map(|net| (net.name.as_str(), net))
                .collect(),
        }
    }

    pub(crate) fn get(&self, name: &str) -> C2Result<&'p NetDef> {
        self.defs
            .get(name)
            .copied()
            .ok_or_else(|| C2Error::configuration(format!("plan has no net named '{name}'")))
    }
}

/// Validates `plan`, instantiates its nets in `ws` and runs its top-level steps in order.
pub fn run_plan(ws: &Arc<Workspace>, plan: &PlanDef) -> C2Result<PlanReport> {
    info!(
        plan = %plan.name,
        nets = plan.network.len(),
        steps = plan.execution_step.len(),
        "running plan"
    );
    validate_plan(plan, ws)?;
    for net in &plan.network {
        ws.create_net(net)?;
    }

    let nets = PlanNets::new(plan);
    let mut report = PlanReport {
        plan: plan.name.clone(),
        steps: Vec::with_capacity(plan.execution_step.len()),
    };
    for step in &plan.execution_step {
        report.steps.push(run_step(ws, step, &nets)?);
    }
    info!(plan = %plan.name, "plan finished");
    Ok(report)
}

/// Checks a plan before anything runs: net names are unique and non-empty, every net a step
/// names exists, step fields are in range, and each net's external inputs come from an earlier
/// net or already exist in `ws`.
pub fn validate_plan(plan: &PlanDef, ws: &Workspace) -> C2Result<()> {
    let mut names = HashSet::new();
    let mut produced: HashSet<&str> = HashSet::new();
    for net in &plan.network {
        if net.name.is_empty() {
            return Err(C2Error::configuration("plan contains a net without a name"));
        }
        if !names.insert(net.name.as_str()) {
            return Err(C2Error::configuration(format!(
                "plan defines net '{}' twice",
                net.name
            )));
        }
        for input in &net.external_input {
            if !produced.contains(input.as_str()) && !ws.has_blob(input) {
                return Err(C2Error::configuration(format!(
                    "external input '{input}' of net '{}' is not produced by an earlier net",
                    net.name
                )));
            }
        }
        produced.extend(net.external_output.iter().map(String::as_str));
        produced.extend(
            net.op
                .iter()
                .flat_map(|op| op.output.iter().map(String::as_str)),
        );
    }
    for step in &plan.execution_step {
        validate_step(step, &names)?;
    }
    Ok(())
}

fn validate_step(step: &ExecutionStep, nets: &HashSet<&str>) -> C2Result<()> {
    let fail = |message: String| -> C2Result<()> {
        Err(C2Error::configuration(message).in_step(&step.name))
    };
    if !step.network.is_empty() && !step.substep.is_empty() {
        return fail("a step lists both networks and sub-steps".to_string());
    }
    if let Some(missing) = step.network.iter().find(|net| !nets.contains(net.as_str())) {
        return fail(format!("plan has no net named '{missing}'"));
    }
    if step.num_iter.is_some_and(|n| n < 0) {
        return fail(format!("negative num_iter {:?}", step.num_iter));
    }
    if step.run_every_ms.is_some_and(|ms| ms <= 0) {
        return fail(format!("run_every_ms must be positive, got {:?}", step.run_every_ms));
    }
    if step.num_concurrent_instances.is_some_and(|n| n < 1) {
        return fail(format!(
            "num_concurrent_instances must be at least 1, got {:?}",
            step.num_concurrent_instances
        ));
    }
    for sub in &step.substep {
        validate_step(sub, nets).map_err(|err| err.in_step(&step.name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::proto::OperatorDef;

    #[test]
    fn unknown_net_reference_is_rejected() {
        let plan = PlanDef::new("p")
            .with_network(NetDef::new("init"))
            .with_step(ExecutionStep::new("s").with_network("train"));
        let err = validate_plan(&plan, &Workspace::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("train"));
    }

    #[test]
    fn nets_must_be_topologically_consistent() {
        let init = NetDef::new("init")
            .with_op(OperatorDef::new("ConstantFill", Vec::<String>::new(), ["W"]));
        let train = NetDef::new("train").with_external_input("W");
        let ok = PlanDef::new("p")
            .with_network(init.clone())
            .with_network(train.clone());
        validate_plan(&ok, &Workspace::new()).unwrap();

        let reversed = PlanDef::new("p").with_network(train).with_network(init);
        assert!(validate_plan(&reversed, &Workspace::new()).is_err());
    }

    #[test]
    fn step_fields_are_range_checked() {
        let mut step = ExecutionStep::new("periodic").with_network("n");
        step.run_every_ms = Some(0);
        let plan = PlanDef::new("p")
            .with_network(NetDef::new("n"))
            .with_step(ExecutionStep::new("outer").with_substep(step));
        let err = validate_plan(&plan, &Workspace::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn reports_absorb_later_runs() {
        let mut report = StepReport::new("s");
        let mut later = StepReport::new("s");
        later.iterations = 2;
        later.outcome = StepOutcome::StoppedEarly;
        report.absorb(later.clone());
        report.absorb(later);
        assert_eq!(report.iterations, 4);
        assert_eq!(report.outcome, StepOutcome::StoppedEarly);
    }
}
