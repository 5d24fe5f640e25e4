//! Operator registry keyed by `(type, device type, engine)`.
//!
//! Backend crates contribute registrar functions to [`OPERATOR_REGISTRARS`] at link time. The
//! process-wide registry runs all of them once, on first use, and is read-only afterwards.
//! Stand-alone [`OperatorRegistry`] values can be built for tests and embedding.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use super::Operator;
use crate::config::runtime_config;
use crate::context::{Device, DeviceType};
use crate::error::{C2Error, C2Result};
use crate::proto::OperatorDef;
use crate::workspace::Workspace;

/// Builds an operator instance bound to a workspace.
pub type OperatorFactory =
    Arc<dyn Fn(&OperatorDef, &Workspace) -> C2Result<Box<dyn Operator>> + Send + Sync>;

/// Adds a backend's operators to a registry.
pub type OperatorRegistrar = fn(&mut OperatorRegistry) -> C2Result<()>;

#[linkme::distributed_slice]
pub static OPERATOR_REGISTRARS: [OperatorRegistrar] = [..];

/// Registry key. An empty `engine` is the default implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorKey {
    pub op_type: String,
    pub device: DeviceType,
    pub engine: String,
}

impl fmt::Display for OperatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.engine.is_empty() {
            write!(f, "{} [{}]", self.op_type, self.device.as_str())
        } else {
            write!(
                f,
                "{} [{}, engine {}]",
                self.op_type,
                self.device.as_str(),
                self.engine
            )
        }
    }
}

#[derive(Default)]
pub struct OperatorRegistry {
    factories: HashMap<OperatorKey, OperatorFactory>,
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.factories.len())
            .finish()
    }
}

impl OperatorRegistry {
    pub fn new() -> Self {
        OperatorRegistry::default()
    }

    /// Registry populated by every linked registrar.
    pub fn from_registrars(registrars: &[OperatorRegistrar]) -> C2Result<Self> {
        let mut registry = OperatorRegistry::new();
        for registrar in registrars {
            registrar(&mut registry)?;
        }
        Ok(registry)
    }

    /// Registers `factory` for `(op_type, device, engine)`. Registering a key twice is a
    /// configuration error.
    pub fn register<F>(
        &mut self,
        op_type: &str,
        device: DeviceType,
        engine: &str,
        factory: F,
    ) -> C2Result<()>
    where
        F: Fn(&OperatorDef, &Workspace) -> C2Result<Box<dyn Operator>> + Send + Sync + 'static,
    {
        let key = OperatorKey {
            op_type: op_type.to_string(),
            device,
            engine: engine.to_string(),
        };
        if self.factories.contains_key(&key) {
            return Err(C2Error::configuration(format!(
                "operator {key} registered twice"
            )));
        }
        self.factories.insert(key, Arc::new(factory));
        Ok(())
    }

    /// Registers the default-engine implementation.
    pub fn register_default<F>(
        &mut self,
        op_type: &str,
        device: DeviceType,
        factory: F,
    ) -> C2Result<()>
    where
        F: Fn(&OperatorDef, &Workspace) -> C2Result<Box<dyn Operator>> + Send + Sync + 'static,
    {
        self.register(op_type, device, "", factory)
    }

    pub fn contains(&self, op_type: &str, device: DeviceType, engine: &str) -> bool {
        self.factories.contains_key(&OperatorKey {
            op_type: op_type.to_string(),
            device,
            engine: engine.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Sorted registry keys.
    pub fn keys(&self) -> Vec<OperatorKey> {
        let mut keys: Vec<OperatorKey> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Picks the factory for `def` on `device`: the definition's engines in order, then
    /// `preference` in order, then the default engine.
    pub fn resolve(
        &self,
        def: &OperatorDef,
        device: DeviceType,
        preference: &[String],
    ) -> C2Result<(&OperatorKey, &OperatorFactory)> {
        let candidates = def
            .engines()
            .chain(preference.iter().map(String::as_str))
            .chain(std::iter::once(""));
        for engine in candidates {
            let key = OperatorKey {
                op_type: def.op_type.clone(),
                device,
                engine: engine.to_string(),
            };
            if let Some((key, factory)) = self.factories.get_key_value(&key) {
                return Ok((key, factory));
            }
        }
        let engine = (!def.engine.is_empty()).then(|| def.engine.clone());
        Err(C2Error::operator_not_found(&def.op_type, device, engine))
    }

    /// Instantiates `def` in `ws` on the device its device option names (CPU when unset).
    pub fn create(&self, def: &OperatorDef, ws: &Workspace) -> C2Result<Box<dyn Operator>> {
        self.create_with_preference(def, ws, &runtime_config().engine_preference)
    }

    pub fn create_with_preference(
        &self,
        def: &OperatorDef,
        ws: &Workspace,
        preference: &[String],
    ) -> C2Result<Box<dyn Operator>> {
        let device = match &def.device_option {
            Some(option) => Device::from_option(option)?,
            None => Device::CPU,
        };
        let (key, factory) = self.resolve(def, device.kind, preference)?;
        debug!(operator = %def.display_name(), key = %key, "creating operator");
        factory(def, ws)
    }
}

/// Adapts a constructor of a concrete operator type into a registrable factory.
pub fn operator_factory<T, F>(
    make: F,
) -> impl Fn(&OperatorDef, &Workspace) -> C2Result<Box<dyn Operator>> + Send + Sync + 'static
where
    T: Operator + 'static,
    F: Fn(&OperatorDef, &Workspace) -> C2Result<T> + Send + Sync + 'static,
{
    move |def, ws| Ok(Box::new(make(def, ws)?) as Box<dyn Operator>)
}

static GLOBAL_REGISTRY: OnceLock<Result<OperatorRegistry, String>> = OnceLock::new();

/// Process-wide registry, built from [`OPERATOR_REGISTRARS`] on first call.
pub fn global_registry() -> C2Result<&'static OperatorRegistry> {
    GLOBAL_REGISTRY
        .get_or_init(|| {
            let registry = OperatorRegistry::from_registrars(&OPERATOR_REGISTRARS)
                .map_err(|err| err.to_string())?;
            debug!(operators = registry.len(), "operator registry initialized");
            Ok(registry)
        })
        .as_ref()
        .map_err(|message| C2Error::configuration(message.clone()))
}

/// Creates `def` from the process-wide registry.
pub fn create_operator(def: &OperatorDef, ws: &Workspace) -> C2Result<Box<dyn Operator>> {
    global_registry()?.create(def, ws)
}

pub fn registered_operators() -> C2Result<Vec<OperatorKey>> {
    Ok(global_registry()?.keys())
}
