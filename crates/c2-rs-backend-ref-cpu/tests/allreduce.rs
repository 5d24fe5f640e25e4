use anyhow::Result;
use c2_rs::muji;
use c2_rs::proto::{DeviceOption, NetDef};
use c2_rs::{Tensor, Workspace};

#[test]
fn allreduce_over_host_devices_sums_everywhere() -> Result<()> {
    c2_rs_backend_ref_cpu::init();
    let ws = Workspace::new();
    let blobs = ["grad_0", "grad_1", "grad_2"];
    for (index, name) in blobs.iter().enumerate() {
        let base = index as f32;
        ws.feed_tensor(name, Tensor::from_vec(&[2], vec![base, base * 10.0])?)?;
    }

    let mut net = NetDef::new("allreduce");
    let devices = vec![DeviceOption::cpu(); blobs.len()];
    let reduced = muji::allreduce(&mut net, &blobs, "_reduced", &devices)?;
    assert_eq!(reduced, ["grad_0_reduced", "grad_1_reduced", "grad_2_reduced"]);

    ws.run_net_once(&net)?;
    for name in &reduced {
        assert_eq!(ws.fetch_vec::<f32>(name)?, vec![3.0, 30.0]);
    }
    assert_eq!(ws.fetch_vec::<f32>("grad_1")?, vec![1.0, 10.0]);
    Ok(())
}

#[test]
fn allreduce_needs_one_blob_per_device() {
    let mut net = NetDef::new("bad");
    let err = muji::allreduce(&mut net, &["a", "b"], "_r", &[DeviceOption::cpu()]).unwrap_err();
    assert_eq!(err.kind(), c2_rs::ErrorKind::Configuration);
    assert!(net.op.is_empty());
}
