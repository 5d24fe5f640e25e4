use std::any::Any;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};
use std::thread;

use tracing::debug;

use super::{run_operator, Net, NetKind, NetState, RunTracker};
use crate::error::{C2Error, C2Result};
use crate::operator::Operator;
use crate::proto::NetDef;

/// Dependency graph over a net's operators, indexed by definition order.
///
/// Operator `i` depends on an earlier operator `j` when `i` reads (or lists as a control input)
/// a blob whose latest writer is `j`, when both write the same blob, or when `i` overwrites a
/// blob `j` still reads. Every edge points from an earlier to a later operator, so the graph is
/// acyclic and definition order is a valid topological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorGraph {
    parents: Vec<BTreeSet<usize>>,
    children: Vec<Vec<usize>>,
}

impl OperatorGraph {
    pub fn build(def: &NetDef) -> Self {
        let count = def.op.len();
        let mut parents = vec![BTreeSet::new(); count];
        let mut last_writer: HashMap<&str, usize> = HashMap::new();
        let mut readers: HashMap<&str, Vec<usize>> = HashMap::new();

        for (index, op) in def.op.iter().enumerate() {
            let deps = &mut parents[index];
            for blob in op.input.iter().chain(&op.control_input) {
                if let Some(&writer) = last_writer.get(blob.as_str()) {
                    deps.insert(writer);
                }
            }
            for blob in &op.output {
                if let Some(&writer) = last_writer.get(blob.as_str()) {
                    deps.insert(writer);
                }
                if let Some(blob_readers) = readers.get(blob.as_str()) {
                    deps.extend(blob_readers.iter().copied().filter(|&r| r != index));
                }
            }

            for blob in &op.input {
                readers.entry(blob.as_str()).or_default().push(index);
            }
            for blob in &op.output {
                last_writer.insert(blob.as_str(), index);
                readers.remove(blob.as_str());
            }
        }

        let mut children = vec![Vec::new(); count];
        for (child, deps) in parents.iter().enumerate() {
            for &parent in deps {
                children[parent].push(child);
            }
        }
        OperatorGraph { parents, children }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn parents(&self, op: usize) -> impl Iterator<Item = usize> + '_ {
        self.parents[op].iter().copied()
    }

    pub fn children(&self, op: usize) -> &[usize] {
        &self.children[op]
    }

    fn roots(&self) -> VecDeque<usize> {
        (0..self.len()).filter(|&op| self.parents[op].is_empty()).collect()
    }
}

struct Schedule {
    ready: VecDeque<usize>,
    pending_parents: Vec<usize>,
    finished: usize,
    error: Option<C2Error>,
}

/// Runs independent operators concurrently on `workers` threads.
pub struct DagNet {
    def: NetDef,
    ops: Vec<Mutex<Box<dyn Operator>>>,
    graph: OperatorGraph,
    workers: usize,
    tracker: RunTracker,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else {
        "unknown panic".to_string()
    }
}

impl DagNet {
    pub(crate) fn new(def: NetDef, ops: Vec<Mutex<Box<dyn Operator>>>, workers: usize) -> Self {
        let graph = OperatorGraph::build(&def);
        DagNet {
            def,
            ops,
            graph,
            workers,
            tracker: RunTracker::default(),
        }
    }

    pub fn graph(&self) -> &OperatorGraph {
        &self.graph
    }

    fn run_graph(&self) -> C2Result<()> {
        let total = self.ops.len();
        if total == 0 {
            return Ok(());
        }
        let schedule = Mutex::new(Schedule {
            ready: self.graph.roots(),
            pending_parents: (0..total).map(|op| self.graph.parents[op].len()).collect(),
            finished: 0,
            error: None,
        });
        let wake = Condvar::new();
        let workers = self.workers.min(total).max(1);
        debug!(net = %self.def.name, workers, ops = total, "running dag net");

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.worker_loop(&schedule, &wake));
            }
        });

        let schedule = schedule.into_inner()?;
        match schedule.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn worker_loop(&self, schedule: &Mutex<Schedule>, wake: &Condvar) {
        let total = self.ops.len();
        loop {
            let next = {
                let Ok(mut state) = schedule.lock() else {
                    return;
                };
                loop {
                    if state.error.is_some() || state.finished == total {
                        return;
                    }
                    if let Some(op) = state.ready.pop_front() {
                        break op;
                    }
                    state = match wake.wait(state) {
                        Ok(state) => state,
                        Err(_) => return,
                    };
                }
            };

            // A panicking operator must still settle the schedule, or the other workers
            // would wait on it forever.
            let result = panic::catch_unwind(AssertUnwindSafe(|| run_operator(&self.ops[next])))
                .unwrap_or_else(|payload| {
                    Err(C2Error::execution(format!("panicked: {}", panic_message(payload)))
                        .in_operator(self.def.op[next].display_name()))
                });

            let Ok(mut state) = schedule.lock() else {
                return;
            };
            match result {
                Ok(()) => {
                    state.finished += 1;
                    for &child in self.graph.children(next) {
                        state.pending_parents[child] -= 1;
                        if state.pending_parents[child] == 0 {
                            state.ready.push_back(child);
                        }
                    }
                }
                Err(err) => {
                    if state.error.is_none() {
                        state.error = Some(err);
                    }
                }
            }
            wake.notify_all();
        }
    }
}

impl Net for DagNet {
    fn def(&self) -> &NetDef {
        &self.def
    }

    fn kind(&self) -> NetKind {
        NetKind::Dag
    }

    fn run_once(&self) -> C2Result<()> {
        self.tracker
            .track(|| self.run_graph())
            .map_err(|err| err.in_net(&self.def.name))
    }

    fn state(&self) -> NetState {
        self.tracker.state()
    }

    fn operator_count(&self) -> usize {
        self.ops.len()
    }
}
