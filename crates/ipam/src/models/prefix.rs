//! Prefix node and allocation result models

use crate::cidr;
use crate::namespace::Namespace;
use crate::Result;
use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Allocation state of a prefix node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationState {
    /// Released, eligible for reuse
    Free,
    /// Held by an owner
    Allocated,
}

/// One allocated or released range within a namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixNode {
    /// Identity of this allocation record
    pub id: Uuid,
    /// Range covered by the node
    pub cidr: Ipv4Net,
    /// Namespace the node lives in
    pub namespace: Namespace,
    /// Parent range (None for namespace roots)
    pub parent: Option<Ipv4Net>,
    /// Allocation state
    pub state: AllocationState,
    /// Opaque identifier of the consuming record (e.g. a subnet id)
    pub owner: Option<String>,
    /// Whole block handed to `owner`
    #[serde(default)]
    pub full_grant: bool,
    /// Holder of the full grant
    #[serde(default)]
    pub grantee: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Release timestamp
    pub released_at: Option<DateTime<Utc>>,
}

impl PrefixNode {
    /// Create a namespace-root node for a registered block
    pub fn root(namespace: Namespace, cidr: Ipv4Net) -> Self {
        Self {
            id: Uuid::new_v4(),
            cidr,
            namespace,
            parent: None,
            state: AllocationState::Allocated,
            owner: None,
            full_grant: false,
            grantee: None,
            created_at: Utc::now(),
            released_at: None,
        }
    }

    /// Create an allocated child of `parent`
    pub fn child(
        namespace: Namespace,
        parent: Ipv4Net,
        cidr: Ipv4Net,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            cidr,
            namespace,
            parent: Some(parent),
            state: AllocationState::Allocated,
            owner: Some(owner.into()),
            full_grant: false,
            grantee: None,
            created_at: Utc::now(),
            released_at: None,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.state == AllocationState::Allocated
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn cidr_text(&self) -> String {
        cidr::format(&self.cidr)
    }

    /// Mark the node free; a no-op when it already is
    pub fn release(&mut self) {
        if self.is_allocated() {
            self.state = AllocationState::Free;
            self.released_at = Some(Utc::now());
        }
    }
}

/// Requested size of a child prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildSize {
    /// Explicit prefix length
    PrefixLen(u8),
    /// Number of addresses, rounded up to the smallest block holding them
    AddressCount(u64),
}

impl ChildSize {
    /// Resolve to a prefix length
    pub fn prefix_len(&self) -> Result<u8> {
        match *self {
            ChildSize::PrefixLen(len) => Ok(len),
            ChildSize::AddressCount(count) => cidr::prefix_len_for_count(count),
        }
    }
}

impl From<u8> for ChildSize {
    fn from(len: u8) -> Self {
        ChildSize::PrefixLen(len)
    }
}

/// Result of a successful allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Allocated child range
    pub cidr: Ipv4Net,
    /// Reserved gateway address inside the child
    pub gateway: Ipv4Addr,
    /// Persisted node
    pub node: PrefixNode,
}

impl Allocation {
    pub fn cidr_text(&self) -> String {
        cidr::format(&self.cidr)
    }

    pub fn gateway_text(&self) -> String {
        self.gateway.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace;

    #[test]
    fn test_child_node() {
        let ns = namespace::resolve("Public", "p", "s");
        let node = PrefixNode::child(
            ns.clone(),
            "10.0.0.0/16".parse().unwrap(),
            "10.0.1.0/24".parse().unwrap(),
            "subnet-1",
        );
        assert!(node.is_allocated());
        assert!(!node.is_root());
        assert_eq!(node.owner.as_deref(), Some("subnet-1"));
        assert_eq!(node.cidr_text(), "10.0.1.0/24");
        assert_eq!(node.namespace, ns);
    }

    #[test]
    fn test_release_is_idempotent() {
        let ns = namespace::resolve("Public", "p", "s");
        let mut node = PrefixNode::root(ns, "10.0.0.0/16".parse().unwrap());
        node.release();
        let first = node.released_at;
        assert_eq!(node.state, AllocationState::Free);
        assert!(first.is_some());

        node.release();
        assert_eq!(node.released_at, first);
    }

    #[test]
    fn test_child_size() {
        assert_eq!(ChildSize::PrefixLen(24).prefix_len().unwrap(), 24);
        assert_eq!(ChildSize::AddressCount(200).prefix_len().unwrap(), 24);
        assert_eq!(ChildSize::AddressCount(1024).prefix_len().unwrap(), 22);
        assert!(ChildSize::AddressCount(0).prefix_len().is_err());
        assert_eq!(ChildSize::from(26), ChildSize::PrefixLen(26));
    }
}
