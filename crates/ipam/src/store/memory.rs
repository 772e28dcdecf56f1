//! In-memory prefix store

use super::{NodeMap, PrefixIndex, PrefixStore, WriteBatch};
use crate::models::PrefixNode;
use crate::namespace::Namespace;
use crate::Result;
use ipnet::Ipv4Net;
use parking_lot::RwLock;

/// Volatile store, for tests and embedders that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryPrefixStore {
    index: RwLock<PrefixIndex>,
}

impl MemoryPrefixStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing nodes
    pub fn with_nodes(nodes: impl IntoIterator<Item = PrefixNode>) -> Self {
        Self {
            index: RwLock::new(PrefixIndex::from_nodes(nodes)),
        }
    }

    /// Total number of records across namespaces
    pub fn len(&self) -> usize {
        self.index.read().all_nodes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PrefixStore for MemoryPrefixStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, namespace: &Namespace, cidr: &Ipv4Net) -> Result<Option<PrefixNode>> {
        Ok(self.index.read().get(namespace, cidr))
    }

    fn nodes(&self, namespace: &Namespace) -> Result<NodeMap> {
        Ok(self.index.read().nodes(namespace))
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        self.index.write().apply(batch)
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self.index.read().namespaces())
    }
}
