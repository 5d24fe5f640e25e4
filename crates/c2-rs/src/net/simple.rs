use std::sync::Mutex;

use super::{run_operator, Net, NetKind, NetState, RunTracker};
use crate::error::C2Result;
use crate::operator::Operator;
use crate::proto::NetDef;

/// Runs operators one after another in definition order.
pub struct SimpleNet {
    def: NetDef,
    ops: Vec<Mutex<Box<dyn Operator>>>,
    tracker: RunTracker,
}

impl SimpleNet {
    pub(crate) fn new(def: NetDef, ops: Vec<Mutex<Box<dyn Operator>>>) -> Self {
        SimpleNet {
            def,
            ops,
            tracker: RunTracker::default(),
        }
    }
}

impl Net for SimpleNet {
    fn def(&self) -> &NetDef {
        &self.def
    }

    fn kind(&self) -> NetKind {
        NetKind::Simple
    }

    fn run_once(&self) -> C2Result<()> {
        self.tracker.track(|| {
            for op in &self.ops {
                run_operator(op).map_err(|err| err.in_net(&self.def.name))?;
            }
            Ok(())
        })
    }

    fn state(&self) -> NetState {
        self.tracker.state()
    }

    fn operator_count(&self) -> usize {
        self.ops.len()
    }
}
