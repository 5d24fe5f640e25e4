use anyhow::Result;
use c2_rs::context::{Device, DeviceAllocator, DeviceType};
use c2_rs::error::ErrorKind;
use c2_rs::operator::{create_operator, registered_operators};
use c2_rs::proto::{Argument, DeviceOption, NetDef, OperatorDef};
use c2_rs::{Tensor, Workspace};
use c2_rs_backend_hip::{HipAllocator, KERNEL_OPERATORS};

fn hip_available() -> bool {
    c2_rs_backend_hip::init();
    let available = c2_rs_backend_hip::is_available();
    if !available {
        eprintln!("skipping: no HIP runtime");
    }
    available
}

#[test]
fn hip_operators_register_without_a_runtime() -> Result<()> {
    c2_rs_backend_hip::init();
    let keys = registered_operators()?;
    let registered = |op_type: &str, engine: &str| {
        keys.iter().any(|key| {
            key.op_type == op_type && key.device == DeviceType::Hip && key.engine == engine
        })
    };
    for op_type in ["CopyCPUToGPU", "CopyGPUToCPU", "Copy", "ConstantFill"] {
        assert!(registered(op_type, ""), "{op_type}");
    }
    for &(op_type, engine, _) in KERNEL_OPERATORS {
        assert!(registered(op_type, engine), "{op_type}");
    }
    assert!(!registered("Softmax", ""));
    Ok(())
}

#[test]
fn creating_hip_operators_without_a_runtime_fails_cleanly() {
    c2_rs_backend_hip::init();
    if c2_rs_backend_hip::is_available() {
        return;
    }
    let ws = Workspace::new();
    ws.feed_tensor("X", Tensor::from_vec(&[2], vec![1.0f32, 2.0]).unwrap())
        .unwrap();
    let def = OperatorDef::new("CopyCPUToGPU", ["X"], ["X_hip"]).with_device(DeviceOption::hip(0));
    let err = create_operator(&def, &ws).err().expect("no HIP runtime");
    assert_eq!(err.kind(), ErrorKind::Execution);
}

#[test]
fn host_device_round_trip() -> Result<()> {
    if !hip_available() {
        return Ok(());
    }
    let ws = Workspace::new();
    let values: Vec<f32> = (0..1000).map(|i| i as f32 * 0.5).collect();
    ws.feed_tensor("X", Tensor::from_vec(&[10, 100], values.clone())?)?;
    let hip = DeviceOption::hip(0);
    let net = NetDef::new("round_trip")
        .with_op(OperatorDef::new("CopyCPUToGPU", ["X"], ["X_hip"]).with_device(hip.clone()))
        .with_op(OperatorDef::new("Copy", ["X_hip"], ["Y_hip"]).with_device(hip.clone()))
        .with_op(OperatorDef::new("CopyGPUToCPU", ["Y_hip"], ["Y"]).with_device(hip));
    ws.run_net_once(&net)?;

    ws.with_tensor("X_hip", |t| {
        assert_eq!(t.device(), Device::new(DeviceType::Hip, 0));
        assert!(t.raw_data().is_err());
        Ok(())
    })?;
    assert_eq!(ws.fetch_vec::<f32>("Y")?, values);
    Ok(())
}

#[test]
fn device_fill_matches_host_fill() -> Result<()> {
    if !hip_available() {
        return Ok(());
    }
    let ws = Workspace::new();
    let hip = DeviceOption::hip(0);
    let net = NetDef::new("fill")
        .with_op(
            OperatorDef::new("ConstantFill", Vec::<String>::new(), ["zeros_hip"])
                .with_arg(Argument::ints("shape", [3, 5]))
                .with_device(hip.clone()),
        )
        .with_op(
            OperatorDef::new("ConstantFill", Vec::<String>::new(), ["sevens_hip"])
                .with_arg(Argument::ints("shape", [4]))
                .with_arg(Argument::int("dtype", 10))
                .with_arg(Argument::int("value", 7))
                .with_device(hip.clone()),
        )
        .with_op(
            OperatorDef::new("CopyGPUToCPU", ["zeros_hip"], ["zeros"]).with_device(hip.clone()),
        )
        .with_op(OperatorDef::new("CopyGPUToCPU", ["sevens_hip"], ["sevens"]).with_device(hip));
    ws.run_net_once(&net)?;
    assert_eq!(ws.fetch_vec::<f32>("zeros")?, vec![0.0; 15]);
    assert_eq!(ws.fetch_vec::<i64>("sevens")?, vec![7; 4]);
    Ok(())
}

#[test]
fn kernel_backed_operator_needs_a_kernel() -> Result<()> {
    if !hip_available() {
        return Ok(());
    }
    let ws = Workspace::new();
    ws.feed_tensor("X", Tensor::from_vec(&[2, 4], vec![0.0f32; 8])?)?;
    let def = OperatorDef::new("Glu", ["X"], ["Y"]).with_device(DeviceOption::hip(0));
    let err = create_operator(&def, &ws).err().expect("no Glu kernel registered");
    assert_eq!(err.kind(), ErrorKind::OperatorNotFound);
    Ok(())
}

#[test]
fn oversized_allocation_is_resource_exhausted() -> Result<()> {
    if !hip_available() {
        return Ok(());
    }
    let allocator = HipAllocator::new(Device::new(DeviceType::Hip, 0))?;
    let err = allocator.allocate(1 << 52).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    Ok(())
}
