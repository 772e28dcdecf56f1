//! Parent IP block model

use crate::lock::ResourceKey;
use crate::namespace::{self, Namespace};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Routing scope of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingScope {
    /// Publicly routable addresses
    Public,
    /// Addresses routed only inside the datacenter
    DatacenterOnly,
}

impl RoutingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingScope::Public => "Public",
            RoutingScope::DatacenterOnly => "DatacenterOnly",
        }
    }
}

impl fmt::Display for RoutingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpBlockStatus {
    Pending,
    Provisioning,
    /// Block is provisioned and may be carved
    Ready,
    Error,
    Deleting,
}

impl fmt::Display for IpBlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IpBlockStatus::Pending => "Pending",
            IpBlockStatus::Provisioning => "Provisioning",
            IpBlockStatus::Ready => "Ready",
            IpBlockStatus::Error => "Error",
            IpBlockStatus::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

/// A provider-owned (or tenant-derived) block that child prefixes are carved from.
///
/// Owned by the provisioning layer; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpBlock {
    /// Unique block identifier
    pub id: Uuid,
    /// Base network and prefix length
    pub cidr: Ipv4Net,
    /// Routing scope
    pub routing_scope: RoutingScope,
    /// Owning infrastructure provider
    pub provider_id: Uuid,
    /// Owning site, if site-scoped
    pub site_id: Option<Uuid>,
    /// Owning tenant, for blocks derived from a provider block
    pub tenant_id: Option<Uuid>,
    /// Lifecycle status
    pub status: IpBlockStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl IpBlock {
    /// Create a pending block
    pub fn new(
        cidr: Ipv4Net,
        routing_scope: RoutingScope,
        provider_id: Uuid,
        site_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            cidr,
            routing_scope,
            provider_id,
            site_id,
            tenant_id: None,
            status: IpBlockStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Set the owning tenant
    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: IpBlockStatus) -> Self {
        self.status = status;
        self
    }

    /// Namespace shared by every block of the same scope, provider and site
    pub fn namespace(&self) -> Namespace {
        let site = self.site_id.map(|s| s.to_string()).unwrap_or_default();
        namespace::resolve(
            self.routing_scope.as_str(),
            &self.provider_id.to_string(),
            &site,
        )
    }

    /// Lock key serializing allocations against this block
    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(self.tenant_id, self.id)
    }

    /// Fail unless the block is `Ready`
    pub fn ensure_ready(&self) -> Result<()> {
        if self.status != IpBlockStatus::Ready {
            return Err(Error::BlockNotReady {
                block: self.id.to_string(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }
}
