//! Typed access to an operator's arguments.

use std::collections::HashMap;

use crate::error::{C2Error, C2Result};
use crate::proto::{Argument, NetDef};

/// Scalar types an argument can be read as.
pub trait ArgValue: Sized {
    const KIND: &'static str;

    fn from_single(arg: &Argument) -> Option<C2Result<Self>>;

    fn from_repeated(arg: &Argument) -> C2Result<Vec<Self>>;
}

fn int_conversion_error(name: &str, value: i64, kind: &str) -> C2Error {
    C2Error::configuration(format!("argument '{name}' value {value} does not fit in {kind}"))
}

macro_rules! int_arg {
    ($($ty:ty),+) => {
        $(
            impl ArgValue for $ty {
                const KIND: &'static str = stringify!($ty);

                fn from_single(arg: &Argument) -> Option<C2Result<Self>> {
                    arg.i.map(|v| {
                        <$ty>::try_from(v)
                            .map_err(|_| int_conversion_error(&arg.name, v, Self::KIND))
                    })
                }

                fn from_repeated(arg: &Argument) -> C2Result<Vec<Self>> {
                    arg.ints
                        .iter()
                        .map(|&v| {
                            <$ty>::try_from(v)
                                .map_err(|_| int_conversion_error(&arg.name, v, Self::KIND))
                        })
                        .collect()
                }
            }
        )+
    };
}

int_arg!(i64, i32, usize);

impl ArgValue for f32 {
    const KIND: &'static str = "f32";

    fn from_single(arg: &Argument) -> Option<C2Result<Self>> {
        arg.f.map(Ok)
    }

    fn from_repeated(arg: &Argument) -> C2Result<Vec<Self>> {
        Ok(arg.floats.clone())
    }
}

impl ArgValue for f64 {
    const KIND: &'static str = "f64";

    fn from_single(arg: &Argument) -> Option<C2Result<Self>> {
        arg.f.map(|v| Ok(v as f64))
    }

    fn from_repeated(arg: &Argument) -> C2Result<Vec<Self>> {
        Ok(arg.floats.iter().map(|&v| v as f64).collect())
    }
}

impl ArgValue for bool {
    const KIND: &'static str = "bool";

    fn from_single(arg: &Argument) -> Option<C2Result<Self>> {
        arg.i.map(|v| Ok(v != 0))
    }

    fn from_repeated(arg: &Argument) -> C2Result<Vec<Self>> {
        Ok(arg.ints.iter().map(|&v| v != 0).collect())
    }
}

impl ArgValue for String {
    const KIND: &'static str = "string";

    fn from_single(arg: &Argument) -> Option<C2Result<Self>> {
        arg.s.clone().map(Ok)
    }

    fn from_repeated(arg: &Argument) -> C2Result<Vec<Self>> {
        Ok(arg.strings.clone())
    }
}

/// Argument lookup by name with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct ArgumentHelper {
    args: HashMap<String, Argument>,
}

impl ArgumentHelper {
    /// Indexes `args` by name. Duplicate names are a configuration error.
    pub fn new(args: &[Argument]) -> C2Result<Self> {
        let mut map = HashMap::with_capacity(args.len());
        for arg in args {
            if map.insert(arg.name.clone(), arg.clone()).is_some() {
                return Err(C2Error::configuration(format!(
                    "argument '{}' given more than once",
                    arg.name
                )));
            }
        }
        Ok(ArgumentHelper { args: map })
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.args.get(name)
    }

    /// Single value of `name`, `None` when absent. Present with the wrong payload is an error.
    pub fn single_arg<T: ArgValue>(&self, name: &str) -> C2Result<Option<T>> {
        let Some(arg) = self.args.get(name) else {
            return Ok(None);
        };
        match T::from_single(arg) {
            Some(value) => value.map(Some),
            None => Err(C2Error::configuration(format!(
                "argument '{name}' does not hold a single {}",
                T::KIND
            ))),
        }
    }

    pub fn single_arg_or<T: ArgValue>(&self, name: &str, default: T) -> C2Result<T> {
        Ok(self.single_arg(name)?.unwrap_or(default))
    }

    /// Single value that must be present.
    pub fn required_arg<T: ArgValue>(&self, name: &str) -> C2Result<T> {
        self.single_arg(name)?
            .ok_or_else(|| C2Error::configuration(format!("missing required argument '{name}'")))
    }

    /// Repeated values of `name`; empty when absent.
    pub fn repeated_arg<T: ArgValue>(&self, name: &str) -> C2Result<Vec<T>> {
        match self.args.get(name) {
            Some(arg) => T::from_repeated(arg),
            None => Ok(Vec::new()),
        }
    }

    pub fn net_arg(&self, name: &str) -> Option<&NetDef> {
        self.args.get(name).and_then(|arg| arg.n.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn typed_lookup_with_defaults() {
        let helper = ArgumentHelper::new(&[
            Argument::float("alpha", 0.5),
            Argument::int("axis", -1),
            Argument::ints("shape", [2, 3]),
            Argument::string("to_file", "1"),
        ])
        .unwrap();
        assert_eq!(helper.single_arg::<f32>("alpha").unwrap(), Some(0.5));
        assert_eq!(helper.single_arg::<i32>("axis").unwrap(), Some(-1));
        assert_eq!(helper.repeated_arg::<usize>("shape").unwrap(), vec![2, 3]);
        assert_eq!(helper.single_arg_or::<i64>("missing", 7).unwrap(), 7);
        assert!(helper.has_arg("to_file"));
    }

    #[test]
    fn wrong_payload_is_configuration_error() {
        let helper = ArgumentHelper::new(&[Argument::float("top_k", 1.0)]).unwrap();
        let err = helper.single_arg::<i64>("top_k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let helper = ArgumentHelper::new(&[Argument::int("axis", -1)]).unwrap();
        let err = helper.single_arg::<usize>("axis").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = ArgumentHelper::new(&[Argument::int("a", 1), Argument::int("a", 2)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
