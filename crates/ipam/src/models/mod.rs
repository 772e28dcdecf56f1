//! Data models for prefix management

mod block;
mod prefix;
mod usage;

pub use block::{IpBlock, IpBlockStatus, RoutingScope};
pub use prefix::{Allocation, AllocationState, ChildSize, PrefixNode};
pub use usage::UsageSummary;
