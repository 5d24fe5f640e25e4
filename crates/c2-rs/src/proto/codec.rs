use std::fs;
use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::{
    Argument, BlobProto, DeviceOption, ExecutionStep, NetDef, OperatorDef, PlanDef, QTensorProto,
    TensorProto,
};
use crate::error::C2Error;

#[derive(Debug, Error)]
pub enum ProtoSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum ProtoIoError {
    #[error(transparent)]
    Serialization(#[from] ProtoSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<ProtoSerdeError> for C2Error {
    fn from(err: ProtoSerdeError) -> Self {
        C2Error::configuration(format!("malformed definition: {err}"))
    }
}

impl From<ProtoIoError> for C2Error {
    fn from(err: ProtoIoError) -> Self {
        C2Error::configuration(format!("cannot load definition: {err}"))
    }
}

/// Binary (`bincode`) and JSON codecs shared by every schema message.
pub trait ProtoMessage: Serialize + DeserializeOwned + Sized {
    fn to_bytes(&self) -> Result<Vec<u8>, ProtoSerdeError> {
        bincode::serialize(self).map_err(ProtoSerdeError::from)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoSerdeError> {
        bincode::deserialize(bytes).map_err(ProtoSerdeError::from)
    }

    fn to_json_string(&self) -> Result<String, ProtoSerdeError> {
        serde_json::to_string_pretty(self).map_err(ProtoSerdeError::from)
    }

    fn from_json_str(src: &str) -> Result<Self, ProtoSerdeError> {
        serde_json::from_str(src).map_err(ProtoSerdeError::from)
    }

    fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProtoIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(ProtoIoError::from)
    }

    fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ProtoIoError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents).map_err(ProtoIoError::from)
    }

    fn save_bytes<P: AsRef<Path>>(&self, path: P) -> Result<(), ProtoIoError> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes).map_err(ProtoIoError::from)
    }

    fn load_bytes<P: AsRef<Path>>(path: P) -> Result<Self, ProtoIoError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes).map_err(ProtoIoError::from)
    }

    /// Loads JSON when the path ends in `.json`, binary otherwise.
    fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProtoIoError> {
        let path = path.as_ref();
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::load_json(path)
        } else {
            Self::load_bytes(path)
        }
    }
}

impl ProtoMessage for TensorProto {}
impl ProtoMessage for QTensorProto {}
impl ProtoMessage for Argument {}
impl ProtoMessage for DeviceOption {}
impl ProtoMessage for OperatorDef {}
impl ProtoMessage for NetDef {}
impl ProtoMessage for ExecutionStep {}
impl ProtoMessage for PlanDef {}
impl ProtoMessage for BlobProto {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn truncated_bytes_are_configuration_errors() {
        let net = NetDef::new("n").with_op(OperatorDef::new("Relu", ["X"], ["Y"]));
        let bytes = net.to_bytes().unwrap();
        let err: C2Error = NetDef::from_bytes(&bytes[..bytes.len() / 2])
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
