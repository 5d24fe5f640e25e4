use anyhow::Result;
use c2_rs::plan::StepOutcome;
use c2_rs::proto::{Argument, ExecutionStep, NetDef, OperatorDef, PlanDef};
use c2_rs::{Tensor, Workspace};

fn epoch_plan(init_count: i64) -> PlanDef {
    let init = NetDef::new("init")
        .with_op(
            OperatorDef::new("CreateCounter", Vec::<String>::new(), ["epochs"])
                .with_arg(Argument::int("init_count", init_count)),
        )
        .with_op(
            OperatorDef::new("ConstantFill", Vec::<String>::new(), ["loss"])
                .with_arg(Argument::ints("shape", [4]))
                .with_arg(Argument::float("value", 1.0)),
        );
    let train = NetDef::new("train")
        .with_op(OperatorDef::new("CountDown", ["epochs"], ["done"]))
        .with_op(OperatorDef::new("Iter", ["iter"], ["iter"]))
        .with_op(
            OperatorDef::new("Scale", ["loss"], ["loss"]).with_arg(Argument::float("scale", 0.5)),
        );
    let mut init_step = ExecutionStep::new("init").with_network("init");
    init_step.only_once = true;
    PlanDef::new("epochs")
        .with_network(init)
        .with_network(train)
        .with_step(init_step)
        .with_step(
            ExecutionStep::new("train")
                .with_network("train")
                .with_should_stop_blob("done"),
        )
}

#[test]
fn count_down_stops_the_training_loop() -> Result<()> {
    c2_rs_backend_ref_cpu::init();
    let ws = Workspace::new();
    ws.feed_tensor("iter", Tensor::scalar(0i64)?)?;
    let report = ws.run_plan(&epoch_plan(3))?;

    let train = report.find("train").expect("train step report");
    assert_eq!(train.iterations, 4);
    assert_eq!(train.outcome, StepOutcome::StoppedEarly);
    assert_eq!(ws.fetch_vec::<i64>("iter")?, vec![4]);
    assert_eq!(ws.fetch_vec::<f32>("loss")?, vec![1.0 / 16.0; 4]);
    Ok(())
}

#[test]
fn exhausted_counter_still_runs_one_iteration() -> Result<()> {
    c2_rs_backend_ref_cpu::init();
    let ws = Workspace::new();
    ws.feed_tensor("iter", Tensor::scalar(0i64)?)?;
    let report = ws.run_plan(&epoch_plan(0))?;
    assert_eq!(report.find("train").map(|s| s.iterations), Some(1));
    assert_eq!(ws.fetch_vec::<i64>("iter")?, vec![1]);
    Ok(())
}
