use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::{PlanNets, StepOutcome, StepReport};
use crate::error::{C2Error, C2Result};
use crate::net::Net;
use crate::proto::ExecutionStep;
use crate::tensor::DataType;
use crate::workspace::Workspace;

/// Runs one execution step (all of its concurrent instances) in `ws`.
pub(crate) fn run_step(
    ws: &Arc<Workspace>,
    step: &ExecutionStep,
    nets: &PlanNets<'_>,
) -> C2Result<StepReport> {
    let instances = step.num_concurrent_instances.unwrap_or(1).max(1) as usize;
    let result = if instances == 1 {
        run_instance(ws, step, nets)
    } else {
        run_instances(ws, step, nets, instances)
    };
    result.map_err(|err| err.in_step(&step.name))
}

fn run_instances(
    ws: &Arc<Workspace>,
    step: &ExecutionStep,
    nets: &PlanNets<'_>,
    instances: usize,
) -> C2Result<StepReport> {
    debug!(step = %step.name, instances, "running concurrent instances");
    let results: Vec<C2Result<StepReport>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..instances)
            .map(|_| scope.spawn(|| run_instance(ws, step, nets)))
            .collect();
        handles.into_iter().map(join_step).collect()
    });

    let mut report = StepReport::new(&step.name);
    for (index, result) in results.into_iter().enumerate() {
        let mut instance = result?;
        instance.name = format!("{}[{index}]", step.name);
        report.iterations += instance.iterations;
        if instance.outcome == StepOutcome::StoppedEarly {
            report.outcome = StepOutcome::StoppedEarly;
        }
        report.substeps.push(instance);
    }
    Ok(report)
}

fn run_instance(
    ws: &Arc<Workspace>,
    step: &ExecutionStep,
    nets: &PlanNets<'_>,
) -> C2Result<StepReport> {
    let ws = if step.create_workspace {
        ws.fork()
    } else {
        Arc::clone(ws)
    };
    let leaf_nets = step
        .network
        .iter()
        .map(|name| net_in(&ws, name, nets))
        .collect::<C2Result<Vec<_>>>()?;

    let max_iterations = if step.only_once {
        Some(1)
    } else {
        match (step.num_iter, &step.should_stop_blob) {
            (Some(n), _) => Some(n.max(0) as u64),
            (None, Some(_)) => None,
            (None, None) => Some(1),
        }
    };

    let mut report = StepReport::new(&step.name);
    while max_iterations.map_or(true, |max| report.iterations < max) {
        report.iterations += 1;
        if step.substep.is_empty() {
            for net in &leaf_nets {
                net.run_once()?;
            }
        } else {
            let (stopped, substeps) = run_substeps(&ws, step, nets)?;
            merge_substeps(&mut report, substeps);
            if stopped {
                report.outcome = StepOutcome::StoppedEarly;
                break;
            }
        }
        debug!(step = %step.name, iteration = report.iterations, "step iteration done");

        if should_stop(&ws, step)? {
            let more_left = max_iterations.map_or(true, |max| report.iterations < max);
            if more_left {
                warn!(
                    step = %step.name,
                    iteration = report.iterations,
                    "stop blob set, ending step early"
                );
                report.outcome = StepOutcome::StoppedEarly;
            }
            break;
        }
    }
    Ok(report)
}

fn merge_substeps(report: &mut StepReport, substeps: Vec<StepReport>) {
    if report.substeps.is_empty() {
        report.substeps = substeps;
        return;
    }
    for report_sub in substeps {
        match report
            .substeps
            .iter_mut()
            .find(|existing| existing.name == report_sub.name)
        {
            Some(existing) => existing.absorb(report_sub),
            None => report.substeps.push(report_sub),
        }
    }
}

/// Runs one iteration's worth of sub-steps. Returns whether the stop blob ended the iteration.
fn run_substeps(
    ws: &Arc<Workspace>,
    step: &ExecutionStep,
    nets: &PlanNets<'_>,
) -> C2Result<(bool, Vec<StepReport>)> {
    let (periodic, regular): (Vec<&ExecutionStep>, Vec<&ExecutionStep>) = step
        .substep
        .iter()
        .partition(|sub| sub.run_every_ms.is_some());

    let done = PeriodicSignal::default();
    thread::scope(|scope| {
        let periodic_handles: Vec<_> = periodic
            .iter()
            .map(|&sub| {
                let done = &done;
                scope.spawn(move || run_periodic(ws, sub, nets, done))
            })
            .collect();

        let regular_result = if step.concurrent_substeps {
            run_concurrent(ws, step, &regular, nets)
        } else {
            run_sequential(ws, step, &regular, nets)
        };
        done.finish();

        let mut periodic_reports = Vec::with_capacity(periodic_handles.len());
        let mut periodic_error = None;
        for handle in periodic_handles {
            match join_step(handle) {
                Ok(report) => periodic_reports.push(report),
                Err(err) => {
                    periodic_error.get_or_insert(err);
                }
            }
        }

        let (stopped, mut reports) = regular_result?;
        if let Some(err) = periodic_error {
            return Err(err);
        }
        reports.extend(periodic_reports);
        Ok((stopped, reports))
    })
}

fn run_sequential(
    ws: &Arc<Workspace>,
    step: &ExecutionStep,
    substeps: &[&ExecutionStep],
    nets: &PlanNets<'_>,
) -> C2Result<(bool, Vec<StepReport>)> {
    let mut reports = Vec::with_capacity(substeps.len());
    for sub in substeps {
        reports.push(run_step(ws, sub, nets)?);
        if should_stop(ws, step)? {
            return Ok((true, reports));
        }
    }
    Ok((false, reports))
}

/// Each sub-step on its own thread. The stop blob is read once all of them finish.
fn run_concurrent(
    ws: &Arc<Workspace>,
    step: &ExecutionStep,
    substeps: &[&ExecutionStep],
    nets: &PlanNets<'_>,
) -> C2Result<(bool, Vec<StepReport>)> {
    let results: Vec<C2Result<StepReport>> = thread::scope(|scope| {
        let handles: Vec<_> = substeps
            .iter()
            .map(|&sub| scope.spawn(move || run_step(ws, sub, nets)))
            .collect();
        handles.into_iter().map(join_step).collect()
    });
    let reports = results.into_iter().collect::<C2Result<Vec<_>>>()?;
    let stopped = should_stop(ws, step)?;
    Ok((stopped, reports))
}

#[derive(Default)]
struct PeriodicSignal {
    finished: Mutex<bool>,
    wake: Condvar,
}

impl PeriodicSignal {
    fn finish(&self) {
        if let Ok(mut finished) = self.finished.lock() {
            *finished = true;
        }
        self.wake.notify_all();
    }

    /// Sleeps for `period` or until [`finish`](Self::finish); returns whether finished.
    fn wait(&self, period: Duration) -> C2Result<bool> {
        let finished = self.finished.lock()?;
        let (finished, _) = self
            .wake
            .wait_timeout_while(finished, period, |finished| !*finished)?;
        Ok(*finished)
    }
}

/// Runs `sub` every `run_every_ms` until its siblings are done, then once more. Errors from
/// intermediate runs are logged; an error from the final run fails the parent step.
fn run_periodic(
    ws: &Arc<Workspace>,
    sub: &ExecutionStep,
    nets: &PlanNets<'_>,
    done: &PeriodicSignal,
) -> C2Result<StepReport> {
    let period = Duration::from_millis(sub.run_every_ms.unwrap_or(1).max(1) as u64);
    let mut report = StepReport::new(&sub.name);
    loop {
        let finished = done.wait(period)?;
        let result = run_step(ws, sub, nets);
        match result {
            Ok(run) => report.absorb(run),
            Err(err) if finished => return Err(err),
            Err(err) => warn!(step = %sub.name, error = %err, "periodic step failed"),
        }
        if finished {
            return Ok(report);
        }
    }
}

/// Net `name` as instantiated in `ws`, creating it there on first use.
fn net_in(ws: &Workspace, name: &str, nets: &PlanNets<'_>) -> C2Result<Arc<dyn Net>> {
    if let Some(net) = ws.get_net(name)? {
        return Ok(net);
    }
    ws.create_net(nets.get(name)?)
}

/// Reads the step's stop blob. A blob nothing has written yet reads as false; once written it
/// must hold a one-element boolean tensor.
fn should_stop(ws: &Workspace, step: &ExecutionStep) -> C2Result<bool> {
    let Some(name) = &step.should_stop_blob else {
        return Ok(false);
    };
    let handle = ws
        .get_blob(name)?
        .ok_or_else(|| C2Error::configuration(format!("stop blob '{name}' does not exist")))?;
    let blob = handle.read()?;
    if blob.is_empty() {
        return Ok(false);
    }
    let tensor = blob.tensor()?;
    if tensor.dtype() == DataType::Undefined && tensor.numel() == 0 {
        return Ok(false);
    }
    if tensor.dtype() != DataType::Bool {
        return Err(C2Error::type_mismatch(format!(
            "stop blob '{name}' holds {:?}, expected Bool",
            tensor.dtype()
        )));
    }
    if tensor.numel() != 1 {
        return Err(C2Error::shape_mismatch(format!(
            "stop blob '{name}' must hold one element, found dims {:?}",
            tensor.dims()
        )));
    }
    Ok(tensor.data::<bool>()?[0])
}

fn join_step(handle: thread::ScopedJoinHandle<'_, C2Result<StepReport>>) -> C2Result<StepReport> {
    handle
        .join()
        .unwrap_or_else(|_| Err(C2Error::execution("step thread panicked")))
}
