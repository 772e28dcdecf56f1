//! Usage reporting for a parent prefix

use super::PrefixNode;
use crate::cidr;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// Address usage of one parent prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Parent range
    pub cidr: Ipv4Net,
    /// Addresses in the parent
    pub total_address_count: u64,
    /// Addresses covered by allocated children
    pub allocated_address_count: u64,
    /// Addresses not covered by any allocated child
    pub available_address_count: u64,
    /// Number of allocated children
    pub allocated_prefixes: usize,
    /// Maximal aligned free blocks, ascending
    pub available_prefixes: Vec<Ipv4Net>,
}

impl UsageSummary {
    /// Summarize `parent` given its direct children (free children are ignored)
    pub fn compute(parent: &PrefixNode, children: &[PrefixNode]) -> Self {
        let total = cidr::address_count(parent.cidr.prefix_len());

        if parent.full_grant {
            return Self {
                cidr: parent.cidr,
                total_address_count: total,
                allocated_address_count: total,
                available_address_count: 0,
                allocated_prefixes: 1,
                available_prefixes: Vec::new(),
            };
        }

        let mut allocated: Vec<&PrefixNode> =
            children.iter().filter(|c| c.is_allocated()).collect();
        allocated.sort_by_key(|c| (u32::from(c.cidr.network()), c.cidr.prefix_len()));

        let (first, last) = cidr::range(&parent.cidr);
        let mut allocated_count = 0u64;
        let mut available_prefixes = Vec::new();
        let mut cursor = u64::from(first);

        for child in &allocated {
            let (c_first, c_last) = cidr::range(&child.cidr);
            allocated_count += cidr::address_count(child.cidr.prefix_len());
            if u64::from(c_first) > cursor {
                available_prefixes.extend(cidr::cover_range(cursor as u32, c_first - 1));
            }
            cursor = cursor.max(u64::from(c_last) + 1);
        }
        if cursor <= u64::from(last) {
            available_prefixes.extend(cidr::cover_range(cursor as u32, last));
        }

        Self {
            cidr: parent.cidr,
            total_address_count: total,
            allocated_address_count: allocated_count,
            available_address_count: total - allocated_count,
            allocated_prefixes: allocated.len(),
            available_prefixes,
        }
    }

    /// Allocated fraction in `[0.0, 1.0]`
    pub fn utilization(&self) -> f64 {
        if self.total_address_count == 0 {
            return 0.0;
        }
        self.allocated_address_count as f64 / self.total_address_count as f64
    }
}
