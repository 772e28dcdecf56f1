//! IPAM Manager Service
//!
//! Entry point for carving child prefixes out of IP blocks:
//! - Block registration (namespace-root nodes)
//! - First-fit child allocation and release
//! - Full-block grants
//! - Usage reporting
//!
//! Every operation runs inside a caller-owned [`Transaction`]. Mutating
//! operations take the block's resource lock through the transaction before
//! reading the store, so allocations against one block are serialized until
//! that transaction commits or rolls back.

use crate::allocator::FirstFitAllocator;
use crate::cidr;
use crate::config::IpamConfig;
use crate::lock::{LocalLockCoordinator, LockCoordinator};
use crate::models::{Allocation, ChildSize, IpBlock, PrefixNode, UsageSummary};
use crate::namespace::Namespace;
use crate::store::{MemoryPrefixStore, PrefixStore};
use crate::txn::Transaction;
use crate::{Error, Result};
use ipnet::Ipv4Net;
use std::sync::Arc;

/// IPAM Manager - prefix allocation service
#[derive(Debug, Clone)]
pub struct IpamManager {
    /// Configuration
    config: IpamConfig,
    /// Committed prefix state
    store: Arc<dyn PrefixStore>,
    /// Per-block mutual exclusion
    coordinator: Arc<dyn LockCoordinator>,
}

impl IpamManager {
    /// Create a manager with default configuration
    pub fn new(store: Arc<dyn PrefixStore>, coordinator: Arc<dyn LockCoordinator>) -> Self {
        Self::with_config(IpamConfig::default(), store, coordinator)
    }

    /// Create a manager with custom configuration
    pub fn with_config(
        config: IpamConfig,
        store: Arc<dyn PrefixStore>,
        coordinator: Arc<dyn LockCoordinator>,
    ) -> Self {
        tracing::debug!(
            store = store.name(),
            gateway_reservation = config.gateway_reservation,
            "Created IPAM manager"
        );
        Self {
            config,
            store,
            coordinator,
        }
    }

    /// Volatile manager with an in-process lock coordinator
    pub fn in_memory(config: IpamConfig) -> Self {
        Self::with_config(
            config,
            Arc::new(MemoryPrefixStore::new()),
            Arc::new(LocalLockCoordinator::new()),
        )
    }

    pub fn config(&self) -> &IpamConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PrefixStore> {
        &self.store
    }

    /// Open a transaction using the configured lock wait policy
    pub fn begin(&self) -> Transaction {
        Transaction::begin(
            Arc::clone(&self.store),
            Arc::clone(&self.coordinator),
            self.config.lock_wait,
        )
    }

    // ==================== Block Registration ====================

    /// Make `block` available as a parent for allocations.
    ///
    /// Creates a namespace-root node for the block's CIDR. When an allocated
    /// node already sits at that CIDR (a block derived from a larger one),
    /// that node is returned instead.
    pub fn register_block(&self, tx: &mut Transaction, block: &IpBlock) -> Result<PrefixNode> {
        tx.lock(&block.resource_key())?;
        let namespace = block.namespace();

        if let Some(existing) = tx.get(&namespace, &block.cidr)? {
            if existing.is_allocated() {
                tracing::debug!(
                    block_id = %block.id,
                    cidr = %block.cidr,
                    derived = !existing.is_root(),
                    "IP block already registered"
                );
                return Ok(existing);
            }
        }

        let root = PrefixNode::root(namespace.clone(), block.cidr);
        tx.insert(root.clone())?;

        tracing::info!(
            block_id = %block.id,
            cidr = %block.cidr,
            namespace = %namespace,
            "Registered IP block"
        );

        Ok(root)
    }

    /// Remove `block` from the engine.
    ///
    /// Fails with [`Error::PrefixInUse`] while the block has allocated
    /// children or a full grant. Free child records are dropped. A root node
    /// is deleted; a derived node is released back to its parent. Succeeds
    /// without effect when the block was never registered.
    pub fn unregister_block(&self, tx: &mut Transaction, block: &IpBlock) -> Result<()> {
        tx.lock(&block.resource_key())?;
        let namespace = block.namespace();

        let Some(node) = tx.get(&namespace, &block.cidr)? else {
            return Ok(());
        };
        if !node.is_allocated() {
            return Ok(());
        }

        let children = tx.list_children(&namespace, &block.cidr)?;
        if node.full_grant || children.iter().any(PrefixNode::is_allocated) {
            return Err(Error::PrefixInUse(node.cidr_text()));
        }

        for child in &children {
            tx.remove(&namespace, &child.cidr)?;
        }

        if node.is_root() {
            tx.remove(&namespace, &block.cidr)?;
        } else {
            tx.mark_released(&namespace, &block.cidr)?;
        }

        tracing::info!(
            block_id = %block.id,
            cidr = %block.cidr,
            dropped_records = children.len(),
            "Unregistered IP block"
        );

        Ok(())
    }

    // ==================== Allocation ====================

    /// Carve the first free child of `size` out of `block` for `owner`.
    ///
    /// The lowest-addressed aligned range that overlaps no allocated child
    /// wins. The gateway is the network address offset by the configured
    /// reservation.
    pub fn allocate(
        &self,
        tx: &mut Transaction,
        block: &IpBlock,
        size: impl Into<ChildSize>,
        owner: &str,
    ) -> Result<Allocation> {
        block.ensure_ready()?;

        let prefix_len = size.into().prefix_len()?;
        cidr::validate_child_len(
            block.cidr.prefix_len(),
            prefix_len,
            self.config.gateway_reservation,
            self.config.max_child_prefix_len,
        )?;

        tx.lock(&block.resource_key())?;
        let namespace = block.namespace();

        let parent = self.block_node(tx, &namespace, block)?;
        if parent.full_grant {
            return Err(Error::InsufficientSpace {
                parent: parent.cidr_text(),
                prefix_len,
            });
        }

        let taken = self.allocated_children(tx, &namespace, &block.cidr)?;
        tracing::debug!(
            cidr = %block.cidr,
            prefix_len,
            allocated_children = taken.len(),
            "Scanning for free prefix"
        );

        let mut planner = FirstFitAllocator::new(block.cidr).with_allocated(&taken);
        let child = planner.allocate(prefix_len)?;
        let gateway = cidr::first_usable_address(&child, self.config.gateway_reservation)?;

        let node = PrefixNode::child(namespace, block.cidr, child, owner);
        tx.insert(node.clone())?;

        tracing::info!(
            block_id = %block.id,
            cidr = %child,
            gateway = %gateway,
            owner = %owner,
            tx = %tx.id(),
            "Allocated prefix"
        );

        Ok(Allocation {
            cidr: child,
            gateway,
            node,
        })
    }

    /// Return `child` of `block` to the free pool.
    ///
    /// Idempotent for an already free child. Released space is not merged
    /// with free neighbours.
    pub fn release(
        &self,
        tx: &mut Transaction,
        block: &IpBlock,
        child: &Ipv4Net,
    ) -> Result<PrefixNode> {
        tx.lock(&block.resource_key())?;
        let namespace = block.namespace();

        let is_child = tx
            .get(&namespace, child)?
            .map(|node| node.parent == Some(block.cidr))
            .unwrap_or(false);
        if !is_child {
            return Err(Error::NotFound(format!(
                "prefix {} is not allocated from block {}",
                cidr::format(child),
                cidr::format(&block.cidr)
            )));
        }

        if !self.allocated_children(tx, &namespace, child)?.is_empty() {
            return Err(Error::PrefixInUse(cidr::format(child)));
        }

        let released = tx.mark_released(&namespace, child)?;

        tracing::info!(
            block_id = %block.id,
            cidr = %child,
            owner = ?released.owner,
            tx = %tx.id(),
            "Released prefix"
        );

        Ok(released)
    }

    // ==================== Full Grants ====================

    /// Hand the whole of `block` to `owner`.
    ///
    /// Only possible while the block has no allocated children; afterwards
    /// every `allocate` against it fails with [`Error::InsufficientSpace`].
    pub fn grant_full(&self, tx: &mut Transaction, block: &IpBlock, owner: &str) -> Result<Allocation> {
        block.ensure_ready()?;
        tx.lock(&block.resource_key())?;
        let namespace = block.namespace();

        let mut node = self.block_node(tx, &namespace, block)?;
        if node.full_grant {
            return Err(Error::InsufficientSpace {
                parent: node.cidr_text(),
                prefix_len: block.cidr.prefix_len(),
            });
        }
        if !self.allocated_children(tx, &namespace, &block.cidr)?.is_empty() {
            return Err(Error::PrefixInUse(node.cidr_text()));
        }

        let gateway = cidr::first_usable_address(&block.cidr, self.config.gateway_reservation)?;

        node.full_grant = true;
        node.grantee = Some(owner.to_string());
        tx.update(node.clone())?;

        tracing::info!(
            block_id = %block.id,
            cidr = %block.cidr,
            owner = %owner,
            "Granted full IP block"
        );

        Ok(Allocation {
            cidr: block.cidr,
            gateway,
            node,
        })
    }

    /// Undo [`IpamManager::grant_full`]; a no-op when no grant is held
    pub fn revoke_full_grant(&self, tx: &mut Transaction, block: &IpBlock) -> Result<()> {
        tx.lock(&block.resource_key())?;
        let namespace = block.namespace();

        let mut node = self.block_node(tx, &namespace, block)?;
        if !node.full_grant {
            return Ok(());
        }

        let grantee = node.grantee.take();
        node.full_grant = false;
        tx.update(node)?;

        tracing::info!(
            block_id = %block.id,
            cidr = %block.cidr,
            grantee = ?grantee,
            "Revoked full IP block grant"
        );

        Ok(())
    }

    // ==================== Queries ====================

    /// Address usage of `block`, including the transaction's staged writes
    pub fn usage(&self, tx: &Transaction, block: &IpBlock) -> Result<UsageSummary> {
        tx.usage_summary(&block.namespace(), &block.cidr)
    }

    /// Allocated children of `block`, ascending address order
    pub fn list_allocations(&self, tx: &Transaction, block: &IpBlock) -> Result<Vec<PrefixNode>> {
        Ok(tx
            .list_children(&block.namespace(), &block.cidr)?
            .into_iter()
            .filter(PrefixNode::is_allocated)
            .collect())
    }

    // ==================== Helpers ====================

    fn block_node(&self, tx: &Transaction, namespace: &Namespace, block: &IpBlock) -> Result<PrefixNode> {
        tx.get(namespace, &block.cidr)?
            .filter(PrefixNode::is_allocated)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "IP block {} ({}) is not registered",
                    block.id,
                    cidr::format(&block.cidr)
                ))
            })
    }

    fn allocated_children(
        &self,
        tx: &Transaction,
        namespace: &Namespace,
        parent: &Ipv4Net,
    ) -> Result<Vec<Ipv4Net>> {
        Ok(tx
            .list_children(namespace, parent)?
            .into_iter()
            .filter(PrefixNode::is_allocated)
            .map(|node| node.cidr)
            .collect())
    }
}
