//! First-fit prefix planner
//!
//! Finds the lowest-addressed free sub-range of a requested length inside a
//! parent prefix, given a snapshot of its allocated children. Candidates are
//! the aligned blocks tiling the parent in ascending order; the first one
//! overlapping no allocated child wins. The scan jumps past each allocated
//! child, so it is linear in the number of children.

use crate::cidr::{self, MAX_CHILD_PREFIX_LEN};
use crate::{Error, Result};
use ipnet::Ipv4Net;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Allocation planner for one parent prefix
#[derive(Debug, Clone)]
pub struct FirstFitAllocator {
    /// Parent range
    parent: Ipv4Net,
    /// Allocated children keyed by the u32 form of their network address
    allocated: BTreeMap<u32, Ipv4Net>,
}

impl FirstFitAllocator {
    /// Planner for an empty parent
    pub fn new(parent: Ipv4Net) -> Self {
        Self {
            parent,
            allocated: BTreeMap::new(),
        }
    }

    /// Load allocated children; ranges outside the parent are ignored
    pub fn with_allocated<'a>(mut self, children: impl IntoIterator<Item = &'a Ipv4Net>) -> Self {
        for child in children {
            if cidr::contains(&self.parent, child) {
                self.allocated.insert(u32::from(child.network()), *child);
            }
        }
        self
    }

    pub fn parent(&self) -> Ipv4Net {
        self.parent
    }

    /// Every aligned block of `prefix_len` tiling the parent, ascending
    pub fn candidates(&self, prefix_len: u8) -> impl Iterator<Item = Ipv4Net> {
        self.parent.subnets(prefix_len).into_iter().flatten()
    }

    /// Round `addr` up to the next multiple of `size`
    fn align_up(addr: u64, size: u64) -> u64 {
        addr.div_ceil(size) * size
    }

    /// First aligned block of `prefix_len` that overlaps no allocated child
    fn find_gap(&self, prefix_len: u8) -> Option<Ipv4Net> {
        let block_size = cidr::address_count(prefix_len);
        let (space_start, space_end) = cidr::range(&self.parent);
        let space_end = u64::from(space_end);

        let mut current = u64::from(space_start);

        for child in self.allocated.values() {
            let (child_start, child_end) = cidr::range(child);

            // Gap before this child
            let aligned = Self::align_up(current, block_size);
            if aligned + block_size - 1 < u64::from(child_start) {
                return Self::block(aligned, prefix_len);
            }

            current = current.max(u64::from(child_end) + 1);
        }

        // Space after the last child
        let aligned = Self::align_up(current, block_size);
        if aligned + block_size - 1 <= space_end {
            return Self::block(aligned, prefix_len);
        }

        None
    }

    fn block(start: u64, prefix_len: u8) -> Option<Ipv4Net> {
        Ipv4Net::new(Ipv4Addr::from(start as u32), prefix_len).ok()
    }

    /// Free ranges between allocated children, inclusive, ascending
    fn gaps(&self) -> Vec<(u64, u64)> {
        let (space_start, space_end) = cidr::range(&self.parent);
        let mut gaps = Vec::new();
        let mut current = u64::from(space_start);

        for child in self.allocated.values() {
            let (child_start, child_end) = cidr::range(child);
            if u64::from(child_start) > current {
                gaps.push((current, u64::from(child_start) - 1));
            }
            current = current.max(u64::from(child_end) + 1);
        }
        if current <= u64::from(space_end) {
            gaps.push((current, u64::from(space_end)));
        }
        gaps
    }

    fn check_len(&self, prefix_len: u8) -> Result<()> {
        if prefix_len <= self.parent.prefix_len() {
            return Err(Error::InvalidPrefixLength(format!(
                "given length:{} must be greater than prefix length:{}",
                prefix_len,
                self.parent.prefix_len()
            )));
        }
        if prefix_len > MAX_CHILD_PREFIX_LEN {
            return Err(Error::InvalidPrefixLength(format!(
                "given length:{} cannot hold a gateway and a host",
                prefix_len
            )));
        }
        Ok(())
    }

    /// Pick the first free block of `prefix_len` and record it as allocated
    pub fn allocate(&mut self, prefix_len: u8) -> Result<Ipv4Net> {
        self.check_len(prefix_len)?;

        let cidr = self
            .find_gap(prefix_len)
            .ok_or_else(|| Error::InsufficientSpace {
                parent: cidr::format(&self.parent),
                prefix_len,
            })?;

        self.allocated.insert(u32::from(cidr.network()), cidr);
        Ok(cidr)
    }

    /// Whether exactly `cidr` is allocated
    pub fn is_allocated(&self, cidr: &Ipv4Net) -> bool {
        self.allocated
            .get(&u32::from(cidr.network()))
            .map(|c| c == cidr)
            .unwrap_or(false)
    }

    /// Whether `cidr` overlaps any allocated child
    pub fn overlaps(&self, cidr: &Ipv4Net) -> bool {
        self.allocated
            .values()
            .any(|existing| cidr::overlaps(existing, cidr))
    }

    /// How many more blocks of `prefix_len` could be allocated
    pub fn available_count(&self, prefix_len: u8) -> u64 {
        if self.check_len(prefix_len).is_err() {
            return 0;
        }

        let block_size = cidr::address_count(prefix_len);
        self.gaps()
            .into_iter()
            .map(|(start, end)| {
                let first = Self::align_up(start, block_size);
                if first + block_size - 1 > end {
                    0
                } else {
                    (end + 1 - first) / block_size
                }
            })
            .sum()
    }

    /// Allocated children, ascending
    pub fn allocated_blocks(&self) -> Vec<Ipv4Net> {
        self.allocated.values().cloned().collect()
    }
}
