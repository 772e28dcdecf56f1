//! IPAM Prefix Engine
//!
//! Carves child IPv4 prefixes out of provider-owned IP blocks:
//! - Namespaced prefix trees (one per routing scope, provider and site)
//! - Deterministic first-fit allocation with gateway reservation
//! - Transactional staging with per-block resource locks
//! - Full-block grants and usage reporting
//!
//! Features:
//! - In-memory and file-backed prefix stores
//! - Configurable lock wait policy (fail fast, block, retry with backoff)
//! - YAML configuration

pub mod allocator;
pub mod cidr;
pub mod config;
pub mod error;
pub mod lock;
pub mod models;
pub mod namespace;
pub mod service;
pub mod store;
pub mod txn;

// Re-export core types
pub use config::IpamConfig;
pub use error::{Error, Result};
pub use lock::{LocalLockCoordinator, LockCoordinator, LockWaitPolicy, ResourceKey};
pub use models::{
    Allocation, AllocationState, ChildSize, IpBlock, IpBlockStatus, PrefixNode, RoutingScope,
    UsageSummary,
};
pub use namespace::Namespace;
pub use service::IpamManager;
pub use store::{FilePrefixStore, MemoryPrefixStore, PrefixStore};
pub use txn::Transaction;
