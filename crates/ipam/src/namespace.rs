//! Namespace resolution
//!
//! A namespace isolates the address space of one (routing scope, provider,
//! site) triple. Two blocks with the same CIDR text in different namespaces
//! never collide.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Isolation key for prefix bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Key text, e.g. `Public/<provider>/<site>`
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the namespace for a routing scope, provider and site.
///
/// Components are joined with `/`. A `%` or `/` inside a component is
/// percent-escaped, so distinct triples always produce distinct keys.
pub fn resolve(routing_scope: &str, provider_id: &str, site_id: &str) -> Namespace {
    Namespace(format!(
        "{}/{}/{}",
        escape(routing_scope),
        escape(provider_id),
        escape(site_id)
    ))
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            _ => out.push(c),
        }
    }
    out
}
