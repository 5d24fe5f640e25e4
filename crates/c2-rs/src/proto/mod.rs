//! Serialized schema: tensors, arguments, operator/net/plan definitions and blobs.
//!
//! Field names follow the framework's message schema so definitions written elsewhere translate
//! one to one. Every message derives `serde` and gets the binary and JSON codecs from
//! [`ProtoMessage`]. All fields default, so partial JSON documents load.

mod codec;

use serde::{Deserialize, Serialize};

use crate::context::DeviceType;
use crate::tensor::DataType;

pub use codec::{ProtoIoError, ProtoMessage, ProtoSerdeError};

/// Contiguous slice `[begin, end)` of a larger tensor along its first axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Segment {
    pub begin: i64,
    pub end: i64,
}

/// Serialized tensor. The payload lives in the field matching `data_type`; narrow integer
/// types, `BOOL` and `FLOAT16` bit patterns are widened into `int32_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorProto {
    pub dims: Vec<i64>,
    pub data_type: DataType,
    pub float_data: Vec<f32>,
    pub int32_data: Vec<i32>,
    pub byte_data: Vec<u8>,
    pub string_data: Vec<Vec<u8>>,
    pub double_data: Vec<f64>,
    pub int64_data: Vec<i64>,
    pub name: String,
    pub device_detail: Option<DeviceOption>,
    pub segment: Option<Segment>,
}

/// Quantized tensor: `value = scale * q + bias`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QTensorProto {
    pub dims: Vec<i64>,
    pub precision: i32,
    pub scale: f64,
    pub bias: f64,
    pub is_signed: bool,
    pub data: Vec<i32>,
    pub name: String,
}

/// Named operator argument. Exactly one of the single or repeated payloads is meaningful.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Argument {
    pub name: String,
    pub f: Option<f32>,
    pub i: Option<i64>,
    pub s: Option<String>,
    pub n: Option<Box<NetDef>>,
    pub floats: Vec<f32>,
    pub ints: Vec<i64>,
    pub strings: Vec<String>,
    pub nets: Vec<NetDef>,
}

impl Argument {
    pub fn float(name: impl Into<String>, value: f32) -> Self {
        Argument {
            name: name.into(),
            f: Some(value),
            ..Default::default()
        }
    }

    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Argument {
            name: name.into(),
            i: Some(value),
            ..Default::default()
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Argument {
            name: name.into(),
            s: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn net(name: impl Into<String>, value: NetDef) -> Self {
        Argument {
            name: name.into(),
            n: Some(Box::new(value)),
            ..Default::default()
        }
    }

    pub fn floats(name: impl Into<String>, values: impl IntoIterator<Item = f32>) -> Self {
        Argument {
            name: name.into(),
            floats: values.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn ints(name: impl Into<String>, values: impl IntoIterator<Item = i64>) -> Self {
        Argument {
            name: name.into(),
            ints: values.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn strings<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Argument {
            name: name.into(),
            strings: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Where an operator or net runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOption {
    /// 0 = CPU, 1 = CUDA, 6 = HIP.
    pub device_type: i32,
    pub cuda_gpu_id: i32,
    pub hip_gpu_id: i32,
    pub random_seed: Option<u32>,
    pub node_name: Option<String>,
}

impl DeviceOption {
    pub fn cpu() -> Self {
        DeviceOption::default()
    }

    pub fn cuda(gpu_id: i32) -> Self {
        DeviceOption {
            device_type: DeviceType::Cuda.proto_id(),
            cuda_gpu_id: gpu_id,
            ..Default::default()
        }
    }

    pub fn hip(gpu_id: i32) -> Self {
        DeviceOption {
            device_type: DeviceType::Hip.proto_id(),
            hip_gpu_id: gpu_id,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.random_seed = Some(seed);
        self
    }
}

/// One operator instance in a net.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorDef {
    pub input: Vec<String>,
    pub output: Vec<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub op_type: String,
    pub arg: Vec<Argument>,
    pub device_option: Option<DeviceOption>,
    /// Preferred implementation, or a comma-separated preference list. Empty means default.
    pub engine: String,
    /// Ordering-only dependencies on blobs written by earlier operators.
    pub control_input: Vec<String>,
    /// Advisory marker set by gradient builders.
    pub is_gradient_op: bool,
}

impl OperatorDef {
    pub fn new<I, O>(op_type: impl Into<String>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        OperatorDef {
            op_type: op_type.into(),
            input: inputs.into_iter().map(Into::into).collect(),
            output: outputs.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_arg(mut self, arg: Argument) -> Self {
        self.arg.push(arg);
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    pub fn with_device(mut self, device_option: DeviceOption) -> Self {
        self.device_option = Some(device_option);
        self
    }

    pub fn with_control_input(mut self, blob: impl Into<String>) -> Self {
        self.control_input.push(blob.into());
        self
    }

    /// Name used in logs and error context: the instance name, else the type.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.op_type
        } else {
            &self.name
        }
    }

    /// Engine preference list in order, skipping blanks.
    pub fn engines(&self) -> impl Iterator<Item = &str> {
        self.engine
            .split(',')
            .map(str::trim)
            .filter(|engine| !engine.is_empty())
    }
}

/// Named, ordered list of operators plus an executor type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetDef {
    pub name: String,
    pub op: Vec<OperatorDef>,
    /// Executor: `"simple"` (or empty) or one of the parallel types.
    #[serde(rename = "type")]
    pub net_type: String,
    pub num_workers: Option<i32>,
    /// Default device for operators that do not set their own.
    pub device_option: Option<DeviceOption>,
    pub arg: Vec<Argument>,
    pub external_input: Vec<String>,
    pub external_output: Vec<String>,
}

impl NetDef {
    pub fn new(name: impl Into<String>) -> Self {
        NetDef {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, net_type: impl Into<String>) -> Self {
        self.net_type = net_type.into();
        self
    }

    pub fn with_op(mut self, op: OperatorDef) -> Self {
        self.op.push(op);
        self
    }

    pub fn with_device(mut self, device_option: DeviceOption) -> Self {
        self.device_option = Some(device_option);
        self
    }

    pub fn with_arg(mut self, arg: Argument) -> Self {
        self.arg.push(arg);
        self
    }

    pub fn with_external_input(mut self, blob: impl Into<String>) -> Self {
        self.external_input.push(blob.into());
        self
    }

    pub fn with_external_output(mut self, blob: impl Into<String>) -> Self {
        self.external_output.push(blob.into());
        self
    }

    pub fn push_op(&mut self, op: OperatorDef) -> &mut OperatorDef {
        self.op.push(op);
        let last = self.op.len() - 1;
        &mut self.op[last]
    }
}

/// Node in a plan's step tree. A step lists either `network` names (leaf) or `substep`s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionStep {
    pub name: String,
    pub substep: Vec<ExecutionStep>,
    pub network: Vec<String>,
    pub num_iter: Option<i64>,
    /// Run this step as a periodic background task every `run_every_ms` milliseconds.
    pub run_every_ms: Option<i64>,
    pub concurrent_substeps: bool,
    pub should_stop_blob: Option<String>,
    pub only_once: bool,
    pub create_workspace: bool,
    pub num_concurrent_instances: Option<i32>,
}

impl ExecutionStep {
    pub fn new(name: impl Into<String>) -> Self {
        ExecutionStep {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_network(mut self, net: impl Into<String>) -> Self {
        self.network.push(net.into());
        self
    }

    pub fn with_substep(mut self, step: ExecutionStep) -> Self {
        self.substep.push(step);
        self
    }

    pub fn with_num_iter(mut self, num_iter: i64) -> Self {
        self.num_iter = Some(num_iter);
        self
    }

    pub fn with_should_stop_blob(mut self, blob: impl Into<String>) -> Self {
        self.should_stop_blob = Some(blob.into());
        self
    }
}

/// Nets plus the step tree that drives them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanDef {
    pub name: String,
    pub network: Vec<NetDef>,
    pub execution_step: Vec<ExecutionStep>,
}

impl PlanDef {
    pub fn new(name: impl Into<String>) -> Self {
        PlanDef {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_network(mut self, net: NetDef) -> Self {
        self.network.push(net);
        self
    }

    pub fn with_step(mut self, step: ExecutionStep) -> Self {
        self.execution_step.push(step);
        self
    }
}

/// Serialized blob. `content_num_chunks`/`content_chunk_id` describe chunked tensors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobProto {
    pub name: String,
    #[serde(rename = "type")]
    pub blob_type: String,
    pub tensor: Option<TensorProto>,
    pub content: Vec<u8>,
    pub qtensor: Option<QTensorProto>,
    pub content_num_chunks: i32,
    pub content_chunk_id: i32,
}
