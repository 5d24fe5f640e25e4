//! `Accuracy` and `Summarize`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use tracing::debug;

use c2_rs::error::{C2Error, C2Result};
use c2_rs::operator::{Operator, OperatorBase};
use c2_rs::proto::OperatorDef;
use c2_rs::{DataType, Workspace};

/// Top-k accuracy of predictions `X` (`[N, D]` floats) against `label` (`[N]` int32).
///
/// A row counts as correct when at most `top_k` columns score above the label column or tie
/// with it at a lower or equal index.
pub struct AccuracyOp {
    base: OperatorBase,
    top_k: usize,
}

impl AccuracyOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(2, 2)?;
        base.expect_outputs(1, 1)?;
        let top_k: usize = base.args().single_arg_or("top_k", 1)?;
        if top_k == 0 {
            return Err(C2Error::configuration("top_k must be at least 1"));
        }
        Ok(AccuracyOp { base, top_k })
    }
}

pub(crate) fn top_k_accuracy(
    predictions: &[f32],
    labels: &[i32],
    classes: usize,
    top_k: usize,
) -> C2Result<f32> {
    if labels.is_empty() {
        return Ok(0.0);
    }
    if classes == 0 {
        return Err(C2Error::shape_mismatch("predictions have no classes"));
    }
    let mut correct = 0usize;
    for (row, &label) in predictions.chunks_exact(classes).zip(labels) {
        let label = usize::try_from(label)
            .ok()
            .filter(|&l| l < classes)
            .ok_or_else(|| {
                C2Error::shape_mismatch(format!("label {label} outside [0, {classes})"))
            })?;
        let label_pred = row[label];
        let ranked_above = row
            .iter()
            .enumerate()
            .filter(|&(col, &pred)| pred > label_pred || (pred == label_pred && col <= label))
            .count();
        if ranked_above <= top_k {
            correct += 1;
        }
    }
    Ok(correct as f32 / labels.len() as f32)
}

impl Operator for AccuracyOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let accuracy = {
            let x = io.input_tensor(0)?;
            let label = io.input_tensor(1)?;
            if x.ndim() != 2 {
                return Err(C2Error::shape_mismatch(format!(
                    "predictions must be 2-D, got dims {:?}",
                    x.dims()
                )));
            }
            let (rows, classes) = (x.dims()[0], x.dims()[1]);
            if label.dims() != [rows] {
                return Err(C2Error::shape_mismatch(format!(
                    "labels must have dims [{rows}], got {:?}",
                    label.dims()
                )));
            }
            top_k_accuracy(x.data::<f32>()?, label.data::<i32>()?, classes, self.top_k)?
        };
        let out = io.output_tensor(0, &allocator)?;
        out.resize_with_dtype(&[], DataType::Float)?;
        out.fill(accuracy)
    }
}

/// Minimum, maximum, mean and sample standard deviation of a float tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub std_dev: f32,
}

impl SummaryStats {
    /// Single pass (Welford). A lone value has zero deviation.
    pub fn compute(values: &[f32]) -> Option<Self> {
        let (&first, rest) = values.split_first()?;
        let (mut min, mut max) = (first, first);
        let mut mean = f64::from(first);
        let mut m2 = 0.0f64;
        for (index, &value) in rest.iter().enumerate() {
            min = min.min(value);
            max = max.max(value);
            let n = (index + 2) as f64;
            let delta = f64::from(value) - mean;
            mean += delta / n;
            m2 += delta * (f64::from(value) - mean);
        }
        let variance = if values.len() == 1 {
            0.0
        } else {
            m2 / (values.len() - 1) as f64
        };
        Some(SummaryStats {
            min,
            max,
            mean: mean as f32,
            std_dev: variance.sqrt() as f32,
        })
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.min, self.max, self.mean, self.std_dev]
    }
}

/// Summarizes its input into an optional `[4]` output. With `to_file` set, each run also
/// appends a `min max mean std` line to `<log_dir>/<input name>.summary`.
pub struct SummarizeOp {
    base: OperatorBase,
    log: Option<BufWriter<File>>,
}

impl SummarizeOp {
    pub fn new(def: &OperatorDef, ws: &Workspace) -> C2Result<Self> {
        let base = OperatorBase::cpu(def, ws)?;
        base.expect_inputs(1, 1)?;
        base.expect_outputs(0, 1)?;
        let log = if base.args().single_arg_or("to_file", false)? {
            let dir: String = base.args().single_arg_or("log_dir", ".".to_string())?;
            let path = PathBuf::from(dir).join(format!("{}.summary", def.input[0]));
            let file = File::create(&path).map_err(|err| {
                C2Error::configuration(format!("cannot open {}: {err}", path.display()))
            })?;
            debug!(path = %path.display(), "summarize log opened");
            Some(BufWriter::new(file))
        } else {
            None
        };
        Ok(SummarizeOp { base, log })
    }
}

impl Operator for SummarizeOp {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_on_device(&mut self) -> C2Result<()> {
        let allocator = self.base.allocator();
        let mut io = self.base.lock_io()?;
        let stats = SummaryStats::compute(io.input_tensor(0)?.data::<f32>()?)
            .ok_or_else(|| C2Error::shape_mismatch("cannot summarize an empty tensor"))?;

        if let Some(log) = self.log.as_mut() {
            writeln!(
                log,
                "{} {} {} {}",
                stats.min, stats.max, stats.mean, stats.std_dev
            )
            .and_then(|_| log.flush())
            .map_err(|err| C2Error::execution(format!("writing summary: {err}")))?;
        }
        if io.output_count() == 1 {
            let out = io.output_tensor(0, &allocator)?;
            out.resize_with_dtype(&[4], DataType::Float)?;
            out.mutable_data::<f32>()?.copy_from_slice(&stats.to_array());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_two_pass() {
        let values = [2.0f32, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let stats = SummaryStats::compute(&values).unwrap();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert!((stats.mean - 5.0).abs() < 1e-6);
        // Sample variance: 32 / 7.
        assert!((stats.std_dev - (32.0f32 / 7.0).sqrt()).abs() < 1e-5);
    }

    #[test]
    fn single_value_has_zero_deviation() {
        let stats = SummaryStats::compute(&[3.5]).unwrap();
        assert_eq!(stats.to_array(), [3.5, 3.5, 3.5, 0.0]);
        assert!(SummaryStats::compute(&[]).is_none());
    }

    #[test]
    fn ties_count_against_the_label_only_at_lower_indices() {
        // Row 0: label 1 ties column 0, so two columns rank at or above it.
        // Row 1: label 0 is the unique max.
        let predictions = [0.5, 0.5, 0.0, 0.9, 0.1, 0.0];
        let labels = [1, 0];
        assert_eq!(top_k_accuracy(&predictions, &labels, 3, 1).unwrap(), 0.5);
        assert_eq!(top_k_accuracy(&predictions, &labels, 3, 2).unwrap(), 1.0);
    }

    #[test]
    fn out_of_range_label_is_rejected() {
        assert!(top_k_accuracy(&[0.1, 0.2], &[2], 2, 1).is_err());
    }
}
