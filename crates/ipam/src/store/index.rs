//! Namespace-partitioned node index shared by the store backends

use super::{node_key, validate_hierarchy, validate_put, NodeMap, WriteBatch, WriteOp};
use crate::models::PrefixNode;
use crate::namespace::Namespace;
use crate::Result;
use ipnet::Ipv4Net;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
pub(crate) struct PrefixIndex {
    namespaces: BTreeMap<Namespace, NodeMap>,
}

impl PrefixIndex {
    pub fn from_nodes(nodes: impl IntoIterator<Item = PrefixNode>) -> Self {
        let mut index = Self::default();
        for node in nodes {
            index
                .namespaces
                .entry(node.namespace.clone())
                .or_default()
                .insert(node_key(&node.cidr), node);
        }
        index
    }

    pub fn get(&self, namespace: &Namespace, cidr: &Ipv4Net) -> Option<PrefixNode> {
        self.namespaces
            .get(namespace)
            .and_then(|nodes| nodes.get(&node_key(cidr)))
            .cloned()
    }

    pub fn nodes(&self, namespace: &Namespace) -> NodeMap {
        self.namespaces.get(namespace).cloned().unwrap_or_default()
    }

    pub fn namespaces(&self) -> Vec<Namespace> {
        self.namespaces.keys().cloned().collect()
    }

    /// Every node, namespace by namespace
    pub fn all_nodes(&self) -> impl Iterator<Item = &PrefixNode> {
        self.namespaces.values().flat_map(|nodes| nodes.values())
    }

    /// Apply a batch; on error the index is left untouched
    pub fn apply(&mut self, batch: WriteBatch) -> Result<()> {
        let mut touched: HashMap<Namespace, NodeMap> = HashMap::new();
        let mut ranges: Vec<(Namespace, Ipv4Net)> = Vec::with_capacity(batch.len());

        for op in batch.into_ops() {
            ranges.push((op.namespace().clone(), *op.cidr()));
            let nodes = touched
                .entry(op.namespace().clone())
                .or_insert_with_key(|ns| self.namespaces.get(ns).cloned().unwrap_or_default());

            match op {
                WriteOp::Put(node) => {
                    validate_put(nodes, &node)?;
                    nodes.insert(node_key(&node.cidr), node);
                }
                WriteOp::Delete { cidr, .. } => {
                    nodes.remove(&node_key(&cidr));
                }
            }
        }

        // Parent chains are checked on the final state of the batch
        for (namespace, cidr) in &ranges {
            if let Some(nodes) = touched.get(namespace) {
                validate_hierarchy(nodes, cidr)?;
            }
        }

        for (namespace, nodes) in touched {
            if nodes.is_empty() {
                self.namespaces.remove(&namespace);
            } else {
                self.namespaces.insert(namespace, nodes);
            }
        }
        Ok(())
    }
}
