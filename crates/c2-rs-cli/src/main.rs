//! `c2-rs`: run serialized nets and plans from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use c2_rs::config::{set_runtime_config, RuntimeConfig};
use c2_rs::operator::registered_operators;
use c2_rs::plan::StepReport;
use c2_rs::proto::{NetDef, PlanDef, ProtoMessage};
use c2_rs::{dispatch_dtype, C2Result, Tensor, Workspace};

#[derive(Parser)]
#[command(name = "c2-rs")]
#[command(about = "Run c2-rs nets and plans")]
struct Cli {
    /// JSON runtime configuration; C2RS_* environment variables still override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan (`.json` or binary) to completion
    RunPlan {
        file: PathBuf,

        /// Blobs to print once the plan finishes
        #[arg(long)]
        fetch: Vec<String>,
    },

    /// Instantiate a net and run it
    RunNet {
        file: PathBuf,

        /// Number of times to run the net
        #[arg(long, default_value_t = 1)]
        iters: u64,

        /// Blobs to print after the last run
        #[arg(long)]
        fetch: Vec<String>,
    },

    /// List every registered (operator, device, engine) key
    ListOperators {
        /// Only show operators whose type contains this string
        #[arg(long)]
        filter: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        let config = RuntimeConfig::load(path)
            .with_context(|| format!("loading runtime config {}", path.display()))?;
        set_runtime_config(config)?;
    }
    c2_rs_backend_ref_cpu::init();
    c2_rs_backend_hip::init();

    match cli.command {
        Commands::RunPlan { file, fetch } => {
            let plan = PlanDef::load(&file)
                .with_context(|| format!("loading plan {}", file.display()))?;
            let ws = Workspace::new();
            let report = ws
                .run_plan(&plan)
                .with_context(|| format!("running plan '{}'", plan.name))?;
            for step in &report.steps {
                print_step(step, 0);
            }
            print_blobs(&ws, &fetch)
        }
        Commands::RunNet { file, iters, fetch } => {
            if iters == 0 {
                bail!("--iters must be at least 1");
            }
            let def = NetDef::load(&file)
                .with_context(|| format!("loading net {}", file.display()))?;
            let ws = Workspace::new();
            let net = ws
                .create_net(&def)
                .with_context(|| format!("creating net '{}'", def.name))?;
            for iter in 0..iters {
                net.run_once()
                    .with_context(|| format!("net '{}' failed on run {}", def.name, iter + 1))?;
            }
            info!(net = %def.name, iters, "net finished");
            print_blobs(&ws, &fetch)
        }
        Commands::ListOperators { filter } => {
            let mut keys = registered_operators()?;
            keys.sort();
            for key in keys {
                if filter
                    .as_deref()
                    .is_some_and(|needle| !key.op_type.contains(needle))
                {
                    continue;
                }
                println!("{key}");
            }
            Ok(())
        }
    }
}

fn print_step(step: &StepReport, depth: usize) {
    println!(
        "{:indent$}{}: {} iteration(s), {:?}",
        "",
        step.name,
        step.iterations,
        step.outcome,
        indent = depth * 2
    );
    for sub in &step.substeps {
        print_step(sub, depth + 1);
    }
}

fn print_blobs(ws: &Arc<Workspace>, names: &[String]) -> Result<()> {
    for name in names {
        let line = ws
            .with_tensor(name, |tensor| Ok(format_tensor(tensor)))
            .with_context(|| format!("fetching blob '{name}'"))?;
        println!("{name} {line}");
    }
    Ok(())
}

fn format_tensor(tensor: &Tensor) -> String {
    let header = format!("{:?} {:?}", tensor.dtype(), tensor.dims());
    if !tensor.device().is_host() {
        return format!("{header} on {}", tensor.device());
    }
    match host_values(tensor) {
        Ok(values) => format!("{header} [{}]", values.join(", ")),
        Err(err) => format!("{header} <{err}>"),
    }
}

fn host_values(tensor: &Tensor) -> C2Result<Vec<String>> {
    dispatch_dtype!(
        tensor.dtype(),
        [
            Float => f32,
            Double => f64,
            Int32 => i32,
            Int64 => i64,
            Bool => bool,
            Uint8 => u8,
            Int8 => i8,
            Int16 => i16,
            Uint16 => u16,
        ],
        T => Ok(tensor.data::<T>()?.iter().map(|v| v.to_string()).collect())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use c2_rs::DataType;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn formats_host_tensors() {
        let tensor = Tensor::from_vec(&[2], vec![1i64, -3]).unwrap();
        assert_eq!(format_tensor(&tensor), "Int64 [2] [1, -3]");
    }

    #[test]
    fn unsupported_dtypes_are_reported_inline() {
        let mut tensor = Tensor::cpu();
        tensor.resize_with_dtype(&[1], DataType::Float16).unwrap();
        assert!(format_tensor(&tensor).starts_with("Float16 [1] <"));
    }
}
