//! Named blob storage, instantiated nets and child workspaces.
//!
//! A workspace forked from a parent resolves names through the parent chain, so blobs that
//! already exist upstream are shared, while blobs created in the child stay local to it.

mod blob;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{C2Error, C2Result};
use crate::net::{create_net, Net};
use crate::plan::{run_plan, PlanReport};
use crate::proto::{BlobProto, NetDef, PlanDef};
use crate::tensor::{Tensor, TensorElement};

pub use blob::{Blob, BlobHandle};

#[derive(Default)]
pub struct Workspace {
    parent: Option<Arc<Workspace>>,
    blobs: RwLock<HashMap<String, BlobHandle>>,
    nets: RwLock<HashMap<String, Arc<dyn Net>>>,
    children: RwLock<HashMap<String, Arc<Workspace>>>,
}

impl Workspace {
    pub fn new() -> Arc<Self> {
        Arc::new(Workspace::default())
    }

    /// Child that sees this workspace's blobs and creates new ones locally.
    pub fn fork(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Workspace {
            parent: Some(Arc::clone(self)),
            ..Default::default()
        })
    }

    pub fn parent(&self) -> Option<&Arc<Workspace>> {
        self.parent.as_ref()
    }

    /// Forks and registers a named child; an existing child of that name is returned as is.
    pub fn create_child(self: &Arc<Self>, name: &str) -> C2Result<Arc<Self>> {
        let mut children = self.children.write()?;
        let child = children
            .entry(name.to_string())
            .or_insert_with(|| self.fork());
        Ok(Arc::clone(child))
    }

    pub fn child(&self, name: &str) -> C2Result<Option<Arc<Self>>> {
        Ok(self.children.read()?.get(name).cloned())
    }

    /// Returns the blob visible under `name`, creating an empty local one when none exists.
    pub fn create_blob(&self, name: &str) -> C2Result<BlobHandle> {
        if let Some(existing) = self.get_blob(name)? {
            return Ok(existing);
        }
        let mut blobs = self.blobs.write()?;
        let handle = blobs
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Blob::new())));
        Ok(Arc::clone(handle))
    }

    /// Looks `name` up locally, then through the parent chain.
    pub fn get_blob(&self, name: &str) -> C2Result<Option<BlobHandle>> {
        if let Some(handle) = self.blobs.read()?.get(name) {
            return Ok(Some(Arc::clone(handle)));
        }
        match &self.parent {
            Some(parent) => parent.get_blob(name),
            None => Ok(None),
        }
    }

    pub fn has_blob(&self, name: &str) -> bool {
        matches!(self.get_blob(name), Ok(Some(_)))
    }

    /// Removes a local blob. Blobs inherited from a parent are untouched.
    pub fn remove_blob(&self, name: &str) -> C2Result<bool> {
        Ok(self.blobs.write()?.remove(name).is_some())
    }

    pub fn local_blob_names(&self) -> C2Result<Vec<String>> {
        let mut names: Vec<String> = self.blobs.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Every visible blob name, including inherited ones.
    pub fn blob_names(&self) -> C2Result<Vec<String>> {
        let mut names: BTreeSet<String> = self.blobs.read()?.keys().cloned().collect();
        if let Some(parent) = &self.parent {
            names.extend(parent.blob_names()?);
        }
        Ok(names.into_iter().collect())
    }

    /// Stores `tensor` under `name`, replacing previous contents.
    pub fn feed_tensor(&self, name: &str, tensor: Tensor) -> C2Result<()> {
        let handle = self.create_blob(name)?;
        handle.write()?.set(tensor);
        Ok(())
    }

    /// Copies the host tensor stored under `name` into a vector.
    pub fn fetch_vec<T: TensorElement>(&self, name: &str) -> C2Result<Vec<T>> {
        self.with_tensor(name, |tensor| tensor.to_vec::<T>())
    }

    /// Runs `f` against the tensor stored under `name` while holding its read lock.
    pub fn with_tensor<R>(
        &self,
        name: &str,
        f: impl FnOnce(&Tensor) -> C2Result<R>,
    ) -> C2Result<R> {
        let handle = self
            .get_blob(name)?
            .ok_or_else(|| C2Error::configuration(format!("blob '{name}' does not exist")))?;
        let blob = handle.read()?;
        f(blob.tensor()?)
    }

    /// Instantiates `def` in this workspace, replacing a net of the same name.
    pub fn create_net(&self, def: &NetDef) -> C2Result<Arc<dyn Net>> {
        if def.name.is_empty() {
            return Err(C2Error::configuration("net definition has no name"));
        }
        let net: Arc<dyn Net> = Arc::from(create_net(def, self)?);
        debug!(net = %def.name, ops = def.op.len(), "instantiated net");
        self.nets
            .write()?
            .insert(def.name.clone(), Arc::clone(&net));
        Ok(net)
    }

    pub fn get_net(&self, name: &str) -> C2Result<Option<Arc<dyn Net>>> {
        Ok(self.nets.read()?.get(name).cloned())
    }

    pub fn has_net(&self, name: &str) -> bool {
        matches!(self.get_net(name), Ok(Some(_)))
    }

    pub fn net_names(&self) -> C2Result<Vec<String>> {
        let mut names: Vec<String> = self.nets.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn remove_net(&self, name: &str) -> C2Result<bool> {
        Ok(self.nets.write()?.remove(name).is_some())
    }

    /// Runs a previously created net once.
    pub fn run_net(&self, name: &str) -> C2Result<()> {
        let net = self
            .get_net(name)?
            .ok_or_else(|| C2Error::configuration(format!("net '{name}' has not been created")))?;
        net.run_once()
    }

    /// Builds `def`, runs it once and discards it.
    pub fn run_net_once(&self, def: &NetDef) -> C2Result<()> {
        let net = create_net(def, self)?;
        net.run_once()
    }

    pub fn run_plan(self: &Arc<Self>, plan: &PlanDef) -> C2Result<PlanReport> {
        run_plan(self, plan)
    }

    /// Serializes the host tensor stored under `name`.
    pub fn serialize_blob(&self, name: &str) -> C2Result<BlobProto> {
        let tensor = self.with_tensor(name, |tensor| tensor.to_proto(name))?;
        Ok(BlobProto {
            name: name.to_string(),
            blob_type: "Tensor".to_string(),
            tensor: Some(tensor),
            ..Default::default()
        })
    }

    /// Restores a blob written by [`serialize_blob`](Self::serialize_blob) under its own name.
    pub fn deserialize_blob(&self, proto: &BlobProto) -> C2Result<()> {
        if proto.content_num_chunks > 1 {
            return Err(C2Error::configuration(format!(
                "blob '{}' is chunked ({} chunks); load the chunks into a tensor first",
                proto.name, proto.content_num_chunks
            )));
        }
        let tensor_proto = proto.tensor.as_ref().ok_or_else(|| {
            C2Error::type_mismatch(format!(
                "blob '{}' of type '{}' carries no tensor",
                proto.name, proto.blob_type
            ))
        })?;
        let tensor = Tensor::from_proto(tensor_proto)?;
        self.feed_tensor(&proto.name, tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forked_child_reads_parent_and_creates_locally() {
        let root = Workspace::new();
        root.feed_tensor("shared", Tensor::from_vec(&[1], vec![1.0f32]).unwrap())
            .unwrap();
        let child = root.fork();
        assert!(child.has_blob("shared"));
        child.create_blob("local").unwrap();
        assert!(child.has_blob("local"));
        assert!(!root.has_blob("local"));
        assert_eq!(child.local_blob_names().unwrap(), vec!["local".to_string()]);
        assert_eq!(
            child.blob_names().unwrap(),
            vec!["local".to_string(), "shared".to_string()]
        );
    }

    #[test]
    fn create_blob_returns_inherited_handle() {
        let root = Workspace::new();
        let parent_handle = root.create_blob("x").unwrap();
        let child = root.fork();
        let child_handle = child.create_blob("x").unwrap();
        assert!(Arc::ptr_eq(&parent_handle, &child_handle));
    }

    #[test]
    fn named_children_are_reused() {
        let root = Workspace::new();
        let a = root.create_child("worker").unwrap();
        let b = root.create_child("worker").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(root.child("other").unwrap().is_none());
    }

    #[test]
    fn blob_serialization_round_trips() {
        let ws = Workspace::new();
        ws.feed_tensor("w", Tensor::from_vec(&[2], vec![3i32, 4]).unwrap())
            .unwrap();
        let proto = ws.serialize_blob("w").unwrap();
        let other = Workspace::new();
        other.deserialize_blob(&proto).unwrap();
        assert_eq!(other.fetch_vec::<i32>("w").unwrap(), vec![3, 4]);
    }
}
