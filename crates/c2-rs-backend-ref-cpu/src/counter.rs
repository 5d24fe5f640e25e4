//! Counter blobs and the iteration counter.
//!
//! A [`Counter`] lives directly in a blob (not in a tensor). `CountDown` and friends take it as an
//! input and mutate it through an atomic, so they only need a read lock on the blob.

use std::sync::atomic::{AtomicI64, Ordering};

use c2_rs::error::{C2Error, C2Result};
use c2_rs::operator::{Operator, OperatorBase};
use c2_rs::proto::OperatorDef;
use c2_rs::{DataType, Workspace};

#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicI64,
}

impl Counter {
    pub fn new(count: i64) -> Self {
        Counter {
            count: AtomicI64::new(count),
        }
    }

    /// Decrements and returns whether the count had already reached zero before this call.
    pub fn count_down(&self) -> bool {
        self.count.fetch_sub(1, Ordering::SeqCst) <= 0
    }

    /// Sets the count and returns the previous value.
    pub fn reset(&self, count: i64) -> i64 {
        self.count.swap(count, Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.count() <= 0
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

fn init_count(base: &OperatorBase) -> C2Result<i64> {
    base.args().single_arg_or("init_count", 0i64)
}

/// Stores a fresh [`Counter`] holding `init_count` in its output.
pub struct CreateCounterOp {
    base: OperatorBase,
    init_count: i64,
}

impl CreateCounterOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(0, 0)?;
        base.expect_outputs(1, 1)?;
        let init_count = init_count(&base)?;
        Ok(CreateCounterOp { base, init_count })
    }
}

impl Operator for CreateCounterOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let mut io = self.base.lock_io()?;
        io.output(0)?.set(Counter::new(self.init_count));
        Ok(())
    }
}

/// Resets the counter to `init_count`; an optional output receives the previous count.
pub struct ResetCounterOp {
    base: OperatorBase,
    init_count: i64,
}

impl ResetCounterOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(1, 1)?;
        base.expect_outputs(0, 1)?;
        let init_count = init_count(&base)?;
        Ok(ResetCounterOp { base, init_count })
    }
}

impl Operator for ResetCounterOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let previous = io.input(0)?.get::<Counter>()?.reset(self.init_count);
        if io.output_count() == 1 {
            let out = io.output_tensor(0, &allocator)?;
            out.resize_with_dtype(&[], DataType::Int64)?;
            out.fill(previous)?;
        }
        Ok(())
    }
}

/// Which counter query an operator answers with a scalar output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CounterQuery {
    CountDown,
    CheckDone,
    Retrieve,
}

/// `CountDown`, `CheckCounterDone` and `RetrieveCount`.
pub struct CounterQueryOp {
    base: OperatorBase,
    query: CounterQuery,
}

impl CounterQueryOp {
    fn new(def: &OperatorDef, ws: &Workspace, query: CounterQuery) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(1, 1)?;
        base.expect_outputs(1, 1)?;
        Ok(CounterQueryOp { base, query })
    }

    /// Decrements; the bool output says whether the counter was already exhausted.
    pub fn count_down(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        Self::new(def, ws, CounterQuery::CountDown)
    }

    pub fn check_done(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        Self::new(def, ws, CounterQuery::CheckDone)
    }

    /// Writes the current count as an int64 scalar.
    pub fn retrieve(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        Self::new(def, ws, CounterQuery::Retrieve)
    }
}

impl Operator for CounterQueryOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let counter = io.input(0)?.get::<Counter>()?;
        match self.query {
            CounterQuery::CountDown | CounterQuery::CheckDone => {
                let done = if self.query == CounterQuery::CountDown {
                    counter.count_down()
                } else {
                    counter.is_done()
                };
                let out = io.output_tensor(0, &allocator)?;
                out.resize_with_dtype(&[], DataType::Bool)?;
                out.fill(done)
            }
            CounterQuery::Retrieve => {
                let count = counter.count();
                let out = io.output_tensor(0, &allocator)?;
                out.resize_with_dtype(&[], DataType::Int64)?;
                out.fill(count)
            }
        }
    }
}

/// Increments an int64 scalar iteration counter in place, starting it at zero.
pub struct IterOp {
    base: OperatorBase,
}

impl IterOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(0, 1)?;
        base.expect_outputs(1, 1)?;
        if base.input_count() == 1 && def.input[0] != def.output[0] {
            return Err(C2Error::configuration("Iter's optional input must be its output"));
        }
        Ok(IterOp { base })
    }
}

impl Operator for IterOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let iter = io.output_tensor(0, &allocator)?;
        if iter.dtype() != DataType::Int64 || iter.numel() != 1 {
            iter.resize_with_dtype(&[], DataType::Int64)?;
            iter.fill(0i64)?;
        }
        iter.mutable_data::<i64>()?[0] += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_down_reports_exhaustion_after_the_count() {
        let counter = Counter::new(2);
        assert!(!counter.count_down());
        assert!(!counter.count_down());
        assert!(counter.count_down());
        assert!(counter.is_done());
        assert_eq!(counter.reset(5), -1);
        assert_eq!(counter.count(), 5);
    }
}
