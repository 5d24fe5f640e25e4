use std::process::Command;

use anyhow::Result;
use c2_rs::proto::{Argument, ExecutionStep, NetDef, OperatorDef, PlanDef, ProtoMessage};

fn c2_rs_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_c2-rs"))
}

fn doubling_plan() -> PlanDef {
    let init = NetDef::new("init").with_op(
        OperatorDef::new("ConstantFill", Vec::<String>::new(), ["X"])
            .with_arg(Argument::ints("shape", [2]))
            .with_arg(Argument::float("value", 1.0)),
    );
    let double = NetDef::new("double")
        .with_op(OperatorDef::new("Scale", ["X"], ["X"]).with_arg(Argument::float("scale", 2.0)));
    PlanDef::new("doubling")
        .with_network(init)
        .with_network(double)
        .with_step(ExecutionStep::new("init").with_network("init"))
        .with_step(
            ExecutionStep::new("loop")
                .with_network("double")
                .with_num_iter(3),
        )
}

#[test]
fn run_plan_reports_steps_and_fetched_blobs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("plan.json");
    doubling_plan().save_json(&path)?;

    let output = c2_rs_bin()
        .arg("run-plan")
        .arg(&path)
        .args(["--fetch", "X"])
        .output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("loop: 3 iteration(s), Finished"), "{stdout}");
    assert!(stdout.contains("X Float [2] [8, 8]"), "{stdout}");
    Ok(())
}

#[test]
fn run_net_accepts_binary_definitions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("net.bin");
    NetDef::new("fill")
        .with_op(
            OperatorDef::new("ConstantFill", Vec::<String>::new(), ["Y"])
                .with_arg(Argument::ints("shape", [3]))
                .with_arg(Argument::int("dtype", 10))
                .with_arg(Argument::int("value", 4)),
        )
        .save_bytes(&path)?;

    let output = c2_rs_bin()
        .arg("run-net")
        .arg(&path)
        .args(["--iters", "2", "--fetch", "Y"])
        .output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8(output.stdout)?.contains("Y Int64 [3] [4, 4, 4]"));
    Ok(())
}

#[test]
fn failing_operator_is_named_in_the_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("net.json");
    NetDef::new("broken")
        .with_op(OperatorDef::new("Scale", ["missing"], ["Y"]).with_name("scale_missing"))
        .save_json(&path)?;

    let output = c2_rs_bin().arg("run-net").arg(&path).output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("net 'broken'"), "{stderr}");
    Ok(())
}

#[test]
fn list_operators_includes_both_backends() -> Result<()> {
    let output = c2_rs_bin().args(["list-operators", "--filter", "Copy"]).output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("CopyCPUToGPU [hip]"), "{stdout}");
    assert!(stdout.contains("Copy [cpu]"), "{stdout}");
    assert!(!stdout.contains("Glu"));
    Ok(())
}
