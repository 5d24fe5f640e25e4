use std::any::{type_name, Any};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::context::DeviceAllocator;
use crate::error::{C2Error, C2Result};
use crate::tensor::Tensor;

/// Shared handle to a blob. Operators cache these at construction time.
pub type BlobHandle = Arc<RwLock<Blob>>;

/// Type-erased container holding at most one value, usually a [`Tensor`].
#[derive(Default)]
pub struct Blob {
    value: Option<Box<dyn Any + Send + Sync>>,
    type_name: &'static str,
}

impl Blob {
    pub fn new() -> Self {
        Blob::default()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Rust type name of the held value, empty when nothing is stored.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.as_ref().is_some_and(|value| value.is::<T>())
    }

    pub fn get<T: Any>(&self) -> C2Result<&T> {
        self.value
            .as_ref()
            .and_then(|value| value.downcast_ref::<T>())
            .ok_or_else(|| self.wrong_type::<T>())
    }

    pub fn get_mut<T: Any>(&mut self) -> C2Result<&mut T> {
        let held = self.type_name;
        self.value
            .as_mut()
            .and_then(|value| value.downcast_mut::<T>())
            .ok_or_else(|| wrong_type::<T>(held))
    }

    /// Replaces the contents, dropping the previous value.
    pub fn set<T: Any + Send + Sync>(&mut self, value: T) -> &mut T {
        self.type_name = type_name::<T>();
        self.value.insert(Box::new(value)).downcast_mut::<T>().unwrap_or_else(|| unreachable!())
    }

    /// Returns the held `T`, replacing any other content with `init()`.
    pub fn get_or_insert_with<T: Any + Send + Sync>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        if !self.is::<T>() {
            return self.set(init());
        }
        self.get_mut::<T>().unwrap_or_else(|_| unreachable!())
    }

    pub fn take(&mut self) -> Option<Box<dyn Any + Send + Sync>> {
        self.type_name = "";
        self.value.take()
    }

    pub fn tensor(&self) -> C2Result<&Tensor> {
        self.get::<Tensor>()
    }

    /// Output tensor allocated through `allocator`. An existing tensor on the same device keeps
    /// its buffer; anything else is replaced by an empty tensor.
    pub fn tensor_mut_on(&mut self, allocator: &Arc<dyn DeviceAllocator>) -> &mut Tensor {
        let same_device = self
            .get::<Tensor>()
            .is_ok_and(|tensor| tensor.device() == allocator.device());
        if !same_device {
            return self.set(Tensor::new(Arc::clone(allocator)));
        }
        self.get_mut::<Tensor>().unwrap_or_else(|_| unreachable!())
    }

    fn wrong_type<T: Any>(&self) -> C2Error {
        wrong_type::<T>(self.type_name)
    }
}

fn wrong_type<T: Any>(held: &str) -> C2Error {
    if held.is_empty() {
        C2Error::type_mismatch(format!("blob is empty, expected {}", type_name::<T>()))
    } else {
        C2Error::type_mismatch(format!(
            "blob holds {held}, expected {}",
            type_name::<T>()
        ))
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get::<Tensor>() {
            Ok(tensor) => f.debug_tuple("Blob").field(tensor).finish(),
            Err(_) => f.debug_tuple("Blob").field(&self.type_name).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::cpu_allocator;
    use crate::error::ErrorKind;

    #[test]
    fn set_replaces_previous_value() {
        let mut blob = Blob::new();
        assert!(blob.is_empty());
        blob.set(3i64);
        assert_eq!(*blob.get::<i64>().unwrap(), 3);
        blob.set(String::from("x"));
        assert!(!blob.is::<i64>());
        assert_eq!(blob.get::<i64>().unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn tensor_on_same_device_keeps_capacity() {
        let allocator = cpu_allocator();
        let mut blob = Blob::new();
        let tensor = blob.tensor_mut_on(&allocator);
        tensor.resize(&[16]).unwrap();
        tensor.mutable_data::<f32>().unwrap();
        let tensor = blob.tensor_mut_on(&allocator);
        assert_eq!(tensor.capacity_bytes(), 64);
    }
}
