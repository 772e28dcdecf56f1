//! Transaction-scoped view of the prefix store
//!
//! Reads see committed state overlaid with the transaction's own staged
//! writes. Nothing becomes visible to other transactions before
//! [`Transaction::commit`]. Resource locks taken through the transaction are
//! held until it commits, rolls back, or is dropped.

use crate::lock::{self, LockCoordinator, LockGuard, LockWaitPolicy, ResourceKey};
use crate::models::{PrefixNode, UsageSummary};
use crate::namespace::Namespace;
use crate::store::{node_key, validate_put, NodeMap, PrefixStore, WriteBatch, WriteOp};
use crate::{cidr, Error, Result};
use ipnet::Ipv4Net;
use std::sync::Arc;
use uuid::Uuid;

/// Unit of work against a [`PrefixStore`]
pub struct Transaction {
    id: Uuid,
    store: Arc<dyn PrefixStore>,
    coordinator: Arc<dyn LockCoordinator>,
    lock_policy: LockWaitPolicy,
    staged: Vec<WriteOp>,
    locks: Vec<LockGuard>,
}

impl Transaction {
    /// Open a transaction
    pub fn begin(
        store: Arc<dyn PrefixStore>,
        coordinator: Arc<dyn LockCoordinator>,
        lock_policy: LockWaitPolicy,
    ) -> Self {
        let id = Uuid::new_v4();
        tracing::trace!(tx = %id, store = store.name(), "Transaction started");
        Self {
            id,
            store,
            coordinator,
            lock_policy,
            staged: Vec::new(),
            locks: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Take `key` for the rest of the transaction.
    ///
    /// A no-op when this transaction already holds it.
    pub fn lock(&mut self, key: &ResourceKey) -> Result<()> {
        if self.holds_lock(key) {
            return Ok(());
        }
        let guard = lock::acquire(&self.coordinator, key, &self.lock_policy)?;
        self.locks.push(guard);
        Ok(())
    }

    pub fn holds_lock(&self, key: &ResourceKey) -> bool {
        self.locks.iter().any(|guard| guard.key() == key)
    }

    /// Number of staged writes
    pub fn pending_writes(&self) -> usize {
        self.staged.len()
    }

    /// Node at `cidr`, including staged changes
    pub fn get(&self, namespace: &Namespace, cidr: &Ipv4Net) -> Result<Option<PrefixNode>> {
        let staged = self
            .staged
            .iter()
            .rev()
            .find(|op| op.namespace() == namespace && op.cidr() == cidr);

        match staged {
            Some(WriteOp::Put(node)) => Ok(Some(node.clone())),
            Some(WriteOp::Delete { .. }) => Ok(None),
            None => self.store.get(namespace, cidr),
        }
    }

    /// Every node of a namespace, including staged changes, ascending
    pub fn nodes(&self, namespace: &Namespace) -> Result<NodeMap> {
        let mut nodes = self.store.nodes(namespace)?;
        for op in self.staged.iter().filter(|op| op.namespace() == namespace) {
            match op {
                WriteOp::Put(node) => {
                    nodes.insert(node_key(&node.cidr), node.clone());
                }
                WriteOp::Delete { cidr, .. } => {
                    nodes.remove(&node_key(cidr));
                }
            }
        }
        Ok(nodes)
    }

    /// Stage a node.
    ///
    /// Fails with [`Error::DuplicateRange`] when an allocated node other than
    /// one of its ancestors overlaps it. A free record at the same CIDR is
    /// replaced.
    pub fn insert(&mut self, node: PrefixNode) -> Result<()> {
        let nodes = self.nodes(&node.namespace)?;
        validate_put(&nodes, &node)?;
        self.staged.push(WriteOp::Put(node));
        Ok(())
    }

    /// Stage a new version of an existing node
    pub(crate) fn update(&mut self, node: PrefixNode) -> Result<()> {
        if self.get(&node.namespace, &node.cidr)?.is_none() {
            return Err(Error::NotFound(format!(
                "prefix {} in namespace {}",
                node.cidr_text(),
                node.namespace
            )));
        }
        self.insert(node)
    }

    /// Direct children of `parent` (free and allocated), ascending address order
    pub fn list_children(&self, namespace: &Namespace, parent: &Ipv4Net) -> Result<Vec<PrefixNode>> {
        Ok(self
            .nodes(namespace)?
            .into_values()
            .filter(|node| node.parent.as_ref() == Some(parent))
            .collect())
    }

    /// Mark the node at `cidr` free; idempotent when it already is
    pub fn mark_released(&mut self, namespace: &Namespace, cidr: &Ipv4Net) -> Result<PrefixNode> {
        let mut node = self.get(namespace, cidr)?.ok_or_else(|| {
            Error::NotFound(format!(
                "prefix {} in namespace {}",
                cidr::format(cidr),
                namespace
            ))
        })?;

        if node.is_allocated() {
            node.release();
            self.staged.push(WriteOp::Put(node.clone()));
        }
        Ok(node)
    }

    /// Stage removal of the node at `cidr`, returning it if present
    pub fn remove(&mut self, namespace: &Namespace, cidr: &Ipv4Net) -> Result<Option<PrefixNode>> {
        let existing = self.get(namespace, cidr)?;
        if existing.is_some() {
            self.staged.push(WriteOp::Delete {
                namespace: namespace.clone(),
                cidr: *cidr,
            });
        }
        Ok(existing)
    }

    /// Usage of the node at `parent`
    pub fn usage_summary(&self, namespace: &Namespace, parent: &Ipv4Net) -> Result<UsageSummary> {
        let parent_node = self.get(namespace, parent)?.ok_or_else(|| {
            Error::NotFound(format!(
                "prefix {} in namespace {}",
                cidr::format(parent),
                namespace
            ))
        })?;
        let children = self.list_children(namespace, parent)?;
        Ok(UsageSummary::compute(&parent_node, &children))
    }

    /// Apply staged writes atomically, then release every lock
    pub fn commit(mut self) -> Result<()> {
        let batch = WriteBatch::from(std::mem::take(&mut self.staged));
        let writes = batch.len();

        if !batch.is_empty() {
            self.store.apply(batch)?;
        }

        tracing::debug!(
            tx = %self.id,
            writes,
            locks = self.locks.len(),
            "Transaction committed"
        );
        Ok(())
    }

    /// Discard staged writes and release every lock
    pub fn rollback(mut self) {
        let discarded = std::mem::take(&mut self.staged).len();
        tracing::debug!(tx = %self.id, discarded, "Transaction rolled back");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            tracing::debug!(
                tx = %self.id,
                discarded = self.staged.len(),
                "Transaction dropped without commit"
            );
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("store", &self.store.name())
            .field("staged", &self.staged.len())
            .field("locks", &self.locks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LocalLockCoordinator;
    use crate::namespace;
    use crate::store::MemoryPrefixStore;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn setup() -> (Arc<MemoryPrefixStore>, Arc<LocalLockCoordinator>, Namespace) {
        let ns = namespace::resolve("Public", "p", "s");
        let store = Arc::new(MemoryPrefixStore::with_nodes(vec![PrefixNode::root(
            ns.clone(),
            net("10.0.0.0/16"),
        )]));
        (store, Arc::new(LocalLockCoordinator::new()), ns)
    }

    fn begin(store: &Arc<MemoryPrefixStore>, coord: &Arc<LocalLockCoordinator>) -> Transaction {
        Transaction::begin(store.clone(), coord.clone(), LockWaitPolicy::FailFast)
    }

    #[test]
    fn test_staged_writes_invisible_until_commit() {
        let (store, coord, ns) = setup();
        let mut tx = begin(&store, &coord);

        let child = PrefixNode::child(ns.clone(), net("10.0.0.0/16"), net("10.0.0.0/24"), "a");
        tx.insert(child).unwrap();

        assert!(tx.get(&ns, &net("10.0.0.0/24")).unwrap().is_some());
        assert!(store.get(&ns, &net("10.0.0.0/24")).unwrap().is_none());

        tx.commit().unwrap();
        assert!(store.get(&ns, &net("10.0.0.0/24")).unwrap().is_some());
    }

    #[test]
    fn test_rollback_discards_writes_and_locks() {
        let (store, coord, ns) = setup();
        let key = ResourceKey::from_name("block");
        let mut tx = begin(&store, &coord);
        tx.lock(&key).unwrap();
        tx.insert(PrefixNode::child(ns.clone(), net("10.0.0.0/16"), net("10.0.0.0/24"), "a"))
            .unwrap();
        assert!(coord.is_locked(&key));

        tx.rollback();
        assert!(!coord.is_locked(&key));
        assert!(store.get(&ns, &net("10.0.0.0/24")).unwrap().is_none());
    }

    #[test]
    fn test_drop_releases_locks() {
        let (store, coord, _) = setup();
        let key = ResourceKey::from_name("block");
        {
            let mut tx = begin(&store, &coord);
            tx.lock(&key).unwrap();
        }
        assert!(!coord.is_locked(&key));
    }

    #[test]
    fn test_lock_is_idempotent_within_transaction() {
        let (store, coord, _) = setup();
        let key = ResourceKey::from_name("block");
        let mut tx = begin(&store, &coord);
        tx.lock(&key).unwrap();
        tx.lock(&key).unwrap();
        assert!(tx.holds_lock(&key));

        let mut other = begin(&store, &coord);
        assert!(matches!(other.lock(&key), Err(Error::LockContention(_))));
    }

    #[test]
    fn test_insert_rejects_overlap_with_staged_node() {
        let (store, coord, ns) = setup();
        let mut tx = begin(&store, &coord);
        tx.insert(PrefixNode::child(ns.clone(), net("10.0.0.0/16"), net("10.0.0.0/23"), "a"))
            .unwrap();

        let result =
            tx.insert(PrefixNode::child(ns.clone(), net("10.0.0.0/16"), net("10.0.1.0/24"), "b"));
        assert!(matches!(result, Err(Error::DuplicateRange { .. })));
    }

    #[test]
    fn test_list_children_ascending() {
        let (store, coord, ns) = setup();
        let mut tx = begin(&store, &coord);
        for cidr in ["10.0.5.0/24", "10.0.1.0/24", "10.0.3.0/24"] {
            tx.insert(PrefixNode::child(ns.clone(), net("10.0.0.0/16"), net(cidr), cidr))
                .unwrap();
        }

        let children: Vec<String> = tx
            .list_children(&ns, &net("10.0.0.0/16"))
            .unwrap()
            .iter()
            .map(|n| n.cidr_text())
            .collect();
        assert_eq!(children, vec!["10.0.1.0/24", "10.0.3.0/24", "10.0.5.0/24"]);
    }

    #[test]
    fn test_mark_released() {
        let (store, coord, ns) = setup();
        let mut tx = begin(&store, &coord);
        tx.insert(PrefixNode::child(ns.clone(), net("10.0.0.0/16"), net("10.0.0.0/24"), "a"))
            .unwrap();

        let released = tx.mark_released(&ns, &net("10.0.0.0/24")).unwrap();
        assert!(!released.is_allocated());
        let writes = tx.pending_writes();

        // Already free: nothing new staged
        tx.mark_released(&ns, &net("10.0.0.0/24")).unwrap();
        assert_eq!(tx.pending_writes(), writes);

        assert!(matches!(
            tx.mark_released(&ns, &net("10.0.9.0/24")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_usage_summary() {
        let (store, coord, ns) = setup();
        let mut tx = begin(&store, &coord);
        tx.insert(PrefixNode::child(ns.clone(), net("10.0.0.0/16"), net("10.0.0.0/24"), "a"))
            .unwrap();

        let usage = tx.usage_summary(&ns, &net("10.0.0.0/16")).unwrap();
        assert_eq!(usage.total_address_count, 65536);
        assert_eq!(usage.allocated_address_count, 256);

        assert!(matches!(
            tx.usage_summary(&ns, &net("172.16.0.0/16")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remove() {
        let (store, coord, ns) = setup();
        let mut tx = begin(&store, &coord);
        assert!(tx.remove(&ns, &net("10.0.0.0/16")).unwrap().is_some());
        assert!(tx.get(&ns, &net("10.0.0.0/16")).unwrap().is_none());
        assert!(tx.remove(&ns, &net("10.0.0.0/16")).unwrap().is_none());
        tx.commit().unwrap();
        assert!(store.is_empty());
    }
}
