use std::fs;

use anyhow::Result;
use c2_rs::context::DeviceType;
use c2_rs::error::ErrorKind;
use c2_rs::operator::{create_operator, registered_operators};
use c2_rs::proto::{Argument, DeviceOption, NetDef, OperatorDef};
use c2_rs::{DataType, Tensor, Workspace};

fn run(ws: &Workspace, def: OperatorDef) -> c2_rs::C2Result<()> {
    c2_rs_backend_ref_cpu::init();
    create_operator(&def, ws)?.run()
}

#[test]
fn reference_operators_are_registered_for_cpu() -> Result<()> {
    c2_rs_backend_ref_cpu::init();
    let keys = registered_operators()?;
    for op_type in ["ConstantFill", "Copy", "Sum", "Glu", "CountDown", "Summarize"] {
        assert!(
            keys.iter()
                .any(|key| key.op_type == op_type && key.device == DeviceType::Cpu),
            "{op_type} missing"
        );
    }
    Ok(())
}

#[test]
fn constant_fill_shapes() -> Result<()> {
    let ws = Workspace::new();
    run(
        &ws,
        OperatorDef::new("ConstantFill", Vec::<String>::new(), ["A"])
            .with_arg(Argument::ints("shape", [2, 3]))
            .with_arg(Argument::float("value", 1.5)),
    )?;
    ws.with_tensor("A", |a| {
        assert_eq!(a.dims(), &[2, 3]);
        Ok(())
    })?;
    assert_eq!(ws.fetch_vec::<f32>("A")?, vec![1.5; 6]);

    run(
        &ws,
        OperatorDef::new("ConstantFill", ["A"], ["B"])
            .with_arg(Argument::ints("extra_shape", [4]))
            .with_arg(Argument::int("dtype", DataType::Int64.tag() as i64))
            .with_arg(Argument::int("value", 7)),
    )?;
    ws.with_tensor("B", |b| {
        assert_eq!(b.dims(), &[2, 3, 4]);
        assert_eq!(b.dtype(), DataType::Int64);
        Ok(())
    })?;
    assert!(ws.fetch_vec::<i64>("B")?.iter().all(|&v| v == 7));

    ws.feed_tensor("S", Tensor::from_vec(&[2], vec![3i64, 1])?)?;
    run(
        &ws,
        OperatorDef::new("ConstantFill", ["S"], ["C"]).with_arg(Argument::int("input_as_shape", 1)),
    )?;
    ws.with_tensor("C", |c| {
        assert_eq!(c.dims(), &[3, 1]);
        Ok(())
    })?;
    Ok(())
}

#[test]
fn constant_fill_rejects_shape_and_input_together() {
    let ws = Workspace::new();
    ws.feed_tensor("X", Tensor::from_vec(&[1], vec![0.0f32]).unwrap())
        .unwrap();
    let def = OperatorDef::new("ConstantFill", ["X"], ["Y"]).with_arg(Argument::ints("shape", [1]));
    let err = run(&ws, def).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn seeded_uniform_fill_is_reproducible() -> Result<()> {
    let ws = Workspace::new();
    let def = |out: &str| {
        OperatorDef::new("UniformFill", Vec::<String>::new(), [out])
            .with_arg(Argument::ints("shape", [64]))
            .with_arg(Argument::float("min", -1.0))
            .with_arg(Argument::float("max", 1.0))
            .with_device(DeviceOption::cpu().with_seed(42))
    };
    run(&ws, def("U1"))?;
    run(&ws, def("U2"))?;
    let first = ws.fetch_vec::<f32>("U1")?;
    assert_eq!(first, ws.fetch_vec::<f32>("U2")?);
    assert!(first.iter().all(|v| (-1.0..1.0).contains(v)));
    Ok(())
}

#[test]
fn arithmetic_runs_in_place() -> Result<()> {
    let ws = Workspace::new();
    ws.feed_tensor("X", Tensor::from_vec(&[3], vec![1.0f32, 2.0, 3.0])?)?;
    ws.feed_tensor("B", Tensor::from_vec(&[3], vec![10.0f32, 20.0, 30.0])?)?;

    run(&ws, OperatorDef::new("Add", ["X", "B"], ["X"]))?;
    assert_eq!(ws.fetch_vec::<f32>("X")?, vec![11.0, 22.0, 33.0]);

    run(&ws, OperatorDef::new("Scale", ["X"], ["X"]).with_arg(Argument::float("scale", 0.5)))?;
    assert_eq!(ws.fetch_vec::<f32>("X")?, vec![5.5, 11.0, 16.5]);

    run(&ws, OperatorDef::new("Sum", ["X", "B", "X"], ["X"]))?;
    assert_eq!(ws.fetch_vec::<f32>("X")?, vec![21.0, 42.0, 63.0]);

    ws.feed_tensor("M", Tensor::from_vec(&[2, 3], vec![0i32; 6])?)?;
    ws.feed_tensor("row", Tensor::from_vec(&[3], vec![1i32, 2, 3])?)?;
    run(
        &ws,
        OperatorDef::new("Add", ["M", "row"], ["M"]).with_arg(Argument::int("broadcast", 1)),
    )?;
    assert_eq!(ws.fetch_vec::<i32>("M")?, vec![1, 2, 3, 1, 2, 3]);
    Ok(())
}

#[test]
fn mismatched_sum_inputs_are_shape_errors() {
    let ws = Workspace::new();
    ws.feed_tensor("A", Tensor::from_vec(&[2], vec![1.0f32, 2.0]).unwrap())
        .unwrap();
    ws.feed_tensor("B", Tensor::from_vec(&[3], vec![1.0f32, 2.0, 3.0]).unwrap())
        .unwrap();
    let err = run(&ws, OperatorDef::new("Sum", ["A", "B"], ["C"]).with_name("sum_ab")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    assert_eq!(err.failing_operator(), Some("sum_ab"));
}

#[test]
fn accuracy_counts_top_k_hits() -> Result<()> {
    let ws = Workspace::new();
    ws.feed_tensor(
        "X",
        Tensor::from_vec(
            &[3, 3],
            vec![0.1f32, 0.7, 0.2, 0.5, 0.3, 0.2, 0.3, 0.35, 0.4],
        )?,
    )?;
    ws.feed_tensor("label", Tensor::from_vec(&[3], vec![1i32, 1, 0])?)?;
    run(&ws, OperatorDef::new("Accuracy", ["X", "label"], ["top1"]))?;
    assert!((ws.fetch_vec::<f32>("top1")?[0] - 1.0 / 3.0).abs() < 1e-6);
    run(
        &ws,
        OperatorDef::new("Accuracy", ["X", "label"], ["top2"]).with_arg(Argument::int("top_k", 2)),
    )?;
    assert!((ws.fetch_vec::<f32>("top2")?[0] - 2.0 / 3.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn summarize_writes_output_and_log_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new();
    ws.feed_tensor("loss", Tensor::from_vec(&[4], vec![1.0f32, 2.0, 3.0, 4.0])?)?;
    let def = OperatorDef::new("Summarize", ["loss"], ["stats"])
        .with_arg(Argument::int("to_file", 1))
        .with_arg(Argument::string("log_dir", dir.path().to_string_lossy()));
    c2_rs_backend_ref_cpu::init();
    let mut op = create_operator(&def, &ws)?;
    op.run()?;
    op.run()?;

    let stats = ws.fetch_vec::<f32>("stats")?;
    assert_eq!(&stats[..3], &[1.0, 4.0, 2.5]);
    assert!((stats[3] - (5.0f32 / 3.0).sqrt()).abs() < 1e-6);

    let log = fs::read_to_string(dir.path().join("loss.summary"))?;
    assert_eq!(log.lines().count(), 2);
    assert!(log.starts_with("1 4 2.5 "));
    Ok(())
}

#[test]
fn glu_gates_second_half() -> Result<()> {
    let ws = Workspace::new();
    ws.feed_tensor("X", Tensor::from_vec(&[1, 4], vec![2.0f32, -3.0, 0.0, 100.0])?)?;
    run(&ws, OperatorDef::new("Glu", ["X"], ["Y"]))?;
    let y = ws.fetch_vec::<f32>("Y")?;
    assert_eq!(y.len(), 2);
    assert!((y[0] - 1.0).abs() < 1e-6);
    assert!((y[1] + 3.0).abs() < 1e-4);

    ws.feed_tensor("dY", Tensor::from_vec(&[1, 2], vec![1.0f32, 1.0])?)?;
    run(&ws, OperatorDef::new("GluGradient", ["dY", "X"], ["dX"]))?;
    let dx = ws.fetch_vec::<f32>("dX")?;
    assert!((dx[0] - 0.5).abs() < 1e-6);
    assert!((dx[2] - 0.5).abs() < 1e-6);
    Ok(())
}

#[test]
fn counters_drive_a_stop_blob() -> Result<()> {
    c2_rs_backend_ref_cpu::init();
    let ws = Workspace::new();
    ws.run_net_once(
        &NetDef::new("init").with_op(
            OperatorDef::new("CreateCounter", Vec::<String>::new(), ["counter"])
                .with_arg(Argument::int("init_count", 2)),
        ),
    )?;
    let step = NetDef::new("step")
        .with_op(OperatorDef::new("CountDown", ["counter"], ["done"]))
        .with_op(OperatorDef::new("Iter", ["iter"], ["iter"]));
    ws.feed_tensor("iter", Tensor::scalar(0i64)?)?;
    let net = ws.create_net(&step)?;
    let mut runs = 0;
    loop {
        net.run_once()?;
        runs += 1;
        if ws.fetch_vec::<bool>("done")?[0] {
            break;
        }
    }
    assert_eq!(runs, 3);
    assert_eq!(ws.fetch_vec::<i64>("iter")?, vec![3]);

    run(&ws, OperatorDef::new("RetrieveCount", ["counter"], ["count"]))?;
    assert_eq!(ws.fetch_vec::<i64>("count")?, vec![-1]);
    Ok(())
}

#[test]
fn counter_blob_is_not_a_tensor() {
    c2_rs_backend_ref_cpu::init();
    let ws = Workspace::new();
    ws.feed_tensor("counter", Tensor::scalar(3i64).unwrap()).unwrap();
    let err = run(&ws, OperatorDef::new("CountDown", ["counter"], ["done"])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}
