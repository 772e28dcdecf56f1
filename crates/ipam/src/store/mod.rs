//! Prefix storage
//!
//! A [`PrefixStore`] holds committed prefix nodes, indexed per namespace in
//! ascending `(address, length)` order. Writes arrive only as a
//! [`WriteBatch`] from a committing transaction and are applied all or
//! nothing. Stores do no locking of their own beyond keeping a batch atomic;
//! serializing writers is the lock coordinator's job.

mod file;
mod index;
mod memory;

pub use file::FilePrefixStore;
pub use memory::MemoryPrefixStore;

pub(crate) use index::PrefixIndex;

use crate::cidr;
use crate::models::PrefixNode;
use crate::namespace::Namespace;
use crate::{Error, Result};
use ipnet::Ipv4Net;
use std::collections::BTreeMap;
use std::fmt;

/// Per-namespace node map, ordered by network address then prefix length
pub type NodeMap = BTreeMap<(u32, u8), PrefixNode>;

/// Ordering key of a node within its namespace
pub fn node_key(cidr: &Ipv4Net) -> (u32, u8) {
    (u32::from(cidr.network()), cidr.prefix_len())
}

/// One staged write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace the node at its CIDR
    Put(PrefixNode),
    /// Remove the node at `cidr`
    Delete { namespace: Namespace, cidr: Ipv4Net },
}

impl WriteOp {
    pub fn namespace(&self) -> &Namespace {
        match self {
            WriteOp::Put(node) => &node.namespace,
            WriteOp::Delete { namespace, .. } => namespace,
        }
    }

    pub fn cidr(&self) -> &Ipv4Net {
        match self {
            WriteOp::Put(node) => &node.cidr,
            WriteOp::Delete { cidr, .. } => cidr,
        }
    }
}

/// Ordered writes applied atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

impl From<Vec<WriteOp>> for WriteBatch {
    fn from(ops: Vec<WriteOp>) -> Self {
        Self { ops }
    }
}

/// Durable repository of prefix nodes
pub trait PrefixStore: Send + Sync + fmt::Debug {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Committed node at `cidr`
    fn get(&self, namespace: &Namespace, cidr: &Ipv4Net) -> Result<Option<PrefixNode>>;

    /// Every committed node of a namespace, ascending
    fn nodes(&self, namespace: &Namespace) -> Result<NodeMap>;

    /// Apply a batch atomically.
    ///
    /// Every allocated node put by the batch is re-validated against the
    /// committed state; any overlap fails the whole batch with
    /// [`Error::DuplicateRange`]. Once the batch is applied, every touched
    /// range must still respect the parent chain (see [`validate_hierarchy`]).
    fn apply(&self, batch: WriteBatch) -> Result<()>;

    /// Namespaces holding at least one node
    fn namespaces(&self) -> Result<Vec<Namespace>>;
}

/// Check that putting `node` into `nodes` keeps allocated ranges disjoint.
///
/// An allocated node may only overlap its own ancestors. Replacing a record
/// with the same id (an update of that node) is not a conflict.
pub fn validate_put(nodes: &NodeMap, node: &PrefixNode) -> Result<()> {
    if !node.is_allocated() {
        return Ok(());
    }

    let ancestors = ancestors(nodes, node);
    let conflict = nodes.values().find(|existing| {
        existing.is_allocated()
            && existing.id != node.id
            && cidr::overlaps(&existing.cidr, &node.cidr)
            && !ancestors.contains(&existing.cidr)
    });

    match conflict {
        Some(existing) => Err(Error::DuplicateRange {
            cidr: node.cidr_text(),
            existing: existing.cidr_text(),
        }),
        None => Ok(()),
    }
}

/// Check the parent chain around `cidr` after a batch has been applied.
///
/// An allocated node must have an allocated parent, else
/// [`Error::NotFound`]. A free or absent node must have no allocated
/// children, else [`Error::PrefixInUse`].
pub fn validate_hierarchy(nodes: &NodeMap, cidr: &Ipv4Net) -> Result<()> {
    match nodes.get(&node_key(cidr)) {
        Some(node) if node.is_allocated() => {
            let Some(parent) = node.parent else {
                return Ok(());
            };
            let parent_allocated = nodes
                .get(&node_key(&parent))
                .map(PrefixNode::is_allocated)
                .unwrap_or(false);
            if !parent_allocated {
                return Err(Error::NotFound(format!(
                    "parent prefix {} of {} is not allocated",
                    cidr::format(&parent),
                    node.cidr_text()
                )));
            }
            Ok(())
        }
        _ => {
            let in_use = nodes
                .values()
                .any(|child| child.is_allocated() && child.parent.as_ref() == Some(cidr));
            if in_use {
                return Err(Error::PrefixInUse(cidr::format(cidr)));
            }
            Ok(())
        }
    }
}

/// Parent chain of `node`, nearest first
fn ancestors(nodes: &NodeMap, node: &PrefixNode) -> Vec<Ipv4Net> {
    let mut chain = Vec::new();
    let mut next = node.parent;
    while let Some(parent) = next {
        if chain.contains(&parent) {
            break;
        }
        chain.push(parent);
        next = nodes.get(&node_key(&parent)).and_then(|p| p.parent);
    }
    chain
}
