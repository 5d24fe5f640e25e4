//! Nets: operators instantiated from a [`NetDef`] and run as a unit.
//!
//! The `simple` executor runs operators in definition order. The parallel executor (`dag`,
//! also spelled `async_dag` or `parallel`) derives a dependency graph from the blobs operators
//! read and write and runs independent operators on a pool of worker threads.

mod dag;
mod simple;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::config::runtime_config;
use crate::error::{C2Error, C2Result};
use crate::operator::{global_registry, Operator, OperatorRegistry};
use crate::proto::NetDef;
use crate::workspace::Workspace;

pub use dag::{DagNet, OperatorGraph};
pub use simple::SimpleNet;

/// Lifecycle of a net. Dropping the net destroys it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetState {
    Constructed,
    Running,
    Idle,
}

/// Executor selected by `NetDef.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetKind {
    Simple,
    Dag,
}

impl NetKind {
    /// Parses a net type; empty selects `default`.
    pub fn parse(net_type: &str, default: &str) -> C2Result<Self> {
        let net_type = if net_type.is_empty() { default } else { net_type };
        match net_type {
            "" | "simple" => Ok(NetKind::Simple),
            "dag" | "async_dag" | "parallel" => Ok(NetKind::Dag),
            other => Err(C2Error::configuration(format!("unknown net type '{other}'"))),
        }
    }
}

pub trait Net: Send + Sync {
    fn def(&self) -> &NetDef;

    fn name(&self) -> &str {
        &self.def().name
    }

    fn kind(&self) -> NetKind;

    /// Runs every operator once. The first failure aborts the run and is returned with the
    /// operator and net names attached; outputs already written stay written.
    fn run_once(&self) -> C2Result<()>;

    fn state(&self) -> NetState;

    fn operator_count(&self) -> usize;
}

/// Builds a net with operators from the process-wide registry.
pub fn create_net(def: &NetDef, ws: &Workspace) -> C2Result<Box<dyn Net>> {
    create_net_with(def, ws, global_registry()?)
}

/// Builds a net with operators from `registry`.
pub fn create_net_with(
    def: &NetDef,
    ws: &Workspace,
    registry: &OperatorRegistry,
) -> C2Result<Box<dyn Net>> {
    let kind = NetKind::parse(&def.net_type, &runtime_config().default_net_type)
        .map_err(|err| err.in_net(&def.name))?;
    let ops = instantiate_operators(def, ws, registry).map_err(|err| err.in_net(&def.name))?;
    debug!(net = %def.name, ?kind, ops = ops.len(), "built net");
    let net: Box<dyn Net> = match kind {
        NetKind::Simple => Box::new(SimpleNet::new(def.clone(), ops)),
        NetKind::Dag => {
            let workers = worker_count(def)?;
            Box::new(DagNet::new(def.clone(), ops, workers))
        }
    };
    Ok(net)
}

/// Checks that every input has a source: a declared external input, an earlier operator's
/// output, or an existing blob. External outputs must be produced or already exist.
pub fn validate_net(def: &NetDef, ws: &Workspace) -> C2Result<()> {
    let mut known: HashSet<&str> = def.external_input.iter().map(String::as_str).collect();
    for op in &def.op {
        for input in &op.input {
            if !known.contains(input.as_str()) && !ws.has_blob(input) {
                return Err(C2Error::configuration(format!(
                    "source for input '{input}' of operator '{}' is unknown",
                    op.display_name()
                )));
            }
        }
        known.extend(op.output.iter().map(String::as_str));
    }
    for output in &def.external_output {
        if !known.contains(output.as_str()) && !ws.has_blob(output) {
            return Err(C2Error::configuration(format!(
                "external output '{output}' is never produced"
            )));
        }
    }
    Ok(())
}

fn instantiate_operators(
    def: &NetDef,
    ws: &Workspace,
    registry: &OperatorRegistry,
) -> C2Result<Vec<Mutex<Box<dyn Operator>>>> {
    validate_net(def, ws)?;
    def.op
        .iter()
        .map(|op_def| {
            let mut op_def = op_def.clone();
            if op_def.device_option.is_none() {
                op_def.device_option = def.device_option.clone();
            }
            registry
                .create(&op_def, ws)
                .map(Mutex::new)
                .map_err(|err| err.in_operator(op_def.display_name()))
        })
        .collect()
}

fn worker_count(def: &NetDef) -> C2Result<usize> {
    if let Some(workers) = def.num_workers {
        return positive_workers(workers as i64, &def.name);
    }
    if let Some(arg) = def.arg.iter().find(|arg| arg.name == "num_workers") {
        let workers = arg.i.ok_or_else(|| {
            C2Error::configuration(format!("net '{}': num_workers must be an integer", def.name))
        })?;
        return positive_workers(workers, &def.name);
    }
    Ok(runtime_config().net_workers.max(1))
}

fn positive_workers(workers: i64, net: &str) -> C2Result<usize> {
    usize::try_from(workers)
        .ok()
        .filter(|&w| w > 0)
        .ok_or_else(|| {
            C2Error::configuration(format!("net '{net}': invalid num_workers {workers}"))
        })
}

/// Shared run bookkeeping for the executors.
#[derive(Debug, Default)]
struct RunTracker {
    completed: AtomicUsize,
    active: AtomicUsize,
}

impl RunTracker {
    fn state(&self) -> NetState {
        if self.active.load(Ordering::SeqCst) > 0 {
            NetState::Running
        } else if self.completed.load(Ordering::SeqCst) > 0 {
            NetState::Idle
        } else {
            NetState::Constructed
        }
    }

    fn track<R>(&self, run: impl FnOnce() -> R) -> R {
        self.active.fetch_add(1, Ordering::SeqCst);
        let result = run();
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

fn run_operator(op: &Mutex<Box<dyn Operator>>) -> C2Result<()> {
    op.lock()?.run()
}
