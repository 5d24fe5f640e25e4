use anyhow::Result;
use c2_rs::proto::{
    Argument, BlobProto, DeviceOption, ExecutionStep, NetDef, OperatorDef, PlanDef, ProtoIoError,
    ProtoMessage, TensorProto,
};
use c2_rs::{DataType, ErrorKind, Tensor, Workspace};

fn sample_plan() -> PlanDef {
    let train = NetDef::new("train")
        .with_type("dag")
        .with_device(DeviceOption::hip(1).with_seed(7))
        .with_external_input("X")
        .with_op(
            OperatorDef::new("Glu", ["X"], ["Y"])
                .with_name("glu")
                .with_arg(Argument::int("dim", -1))
                .with_engine("MIOPEN"),
        )
        .with_op(OperatorDef::new("Summarize", ["Y"], ["S"]).with_control_input("X"))
        .with_external_output("S");
    let mut step = ExecutionStep::new("loop")
        .with_network("train")
        .with_num_iter(100)
        .with_should_stop_blob("stop");
    step.num_concurrent_instances = Some(2);
    PlanDef::new("plan")
        .with_network(NetDef::new("init").with_op(OperatorDef::new(
            "ConstantFill",
            Vec::<String>::new(),
            ["X"],
        )))
        .with_network(train)
        .with_step(step)
}

#[test]
fn plan_survives_binary_and_json_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let plan = sample_plan();

    let bin_path = dir.path().join("plan.bin");
    plan.save_bytes(&bin_path)?;
    assert_eq!(PlanDef::load(&bin_path)?, plan);

    let json_path = dir.path().join("plan.json");
    plan.save_json(&json_path)?;
    assert_eq!(PlanDef::load(&json_path)?, plan);
    Ok(())
}

#[test]
fn json_uses_wire_field_names_and_defaults() -> Result<()> {
    let json = r#"{
        "name": "n",
        "type": "async_dag",
        "op": [{"type": "Relu", "input": ["X"], "output": ["Y"]}]
    }"#;
    let net = NetDef::from_json_str(json)?;
    assert_eq!(net.net_type, "async_dag");
    assert_eq!(net.op[0].op_type, "Relu");
    assert!(net.op[0].device_option.is_none());
    assert!(net.external_input.is_empty());
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = NetDef::load(dir.path().join("absent.bin")).unwrap_err();
    assert!(matches!(err, ProtoIoError::Io(_)), "{err}");
}

#[test]
fn blob_round_trips_through_serialized_proto() -> Result<()> {
    let source = Workspace::new();
    source.feed_tensor("W", Tensor::from_vec(&[2, 3], vec![1i32, -2, 3, -4, 5, -6])?)?;
    let proto = source.serialize_blob("W")?;
    let bytes = proto.to_bytes()?;

    let target = Workspace::new();
    target.deserialize_blob(&BlobProto::from_bytes(&bytes)?)?;
    target.with_tensor("W", |tensor| {
        assert_eq!(tensor.dims(), &[2, 3]);
        assert_eq!(tensor.dtype(), DataType::Int32);
        Ok(())
    })?;
    assert_eq!(target.fetch_vec::<i32>("W")?, vec![1, -2, 3, -4, 5, -6]);
    Ok(())
}

#[test]
fn blob_with_overflowing_dims_is_rejected_without_a_tensor() -> Result<()> {
    let proto = BlobProto {
        name: "huge".to_string(),
        blob_type: "Tensor".to_string(),
        tensor: Some(TensorProto {
            dims: vec![i64::MAX, 4],
            data_type: DataType::Float,
            ..Default::default()
        }),
        ..Default::default()
    };
    let ws = Workspace::new();
    let err = ws.deserialize_blob(&proto).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    assert!(!ws.has_blob("huge"));
    Ok(())
}
