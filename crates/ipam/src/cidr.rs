//! CIDR arithmetic
//!
//! Pure functions over IPv4 prefixes. All range math runs on the `u32` form
//! of the address so comparisons never depend on text representation.

use crate::{Error, Result};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Width of an IPv4 address in bits
pub const IPV4_BITS: u8 = 32;

/// Longest prefix that can still hold a gateway and a host (/31 and /32 cannot)
pub const MAX_CHILD_PREFIX_LEN: u8 = IPV4_BITS - 2;

/// Parse CIDR text into a network.
///
/// Rejects IPv6, text without a length, and addresses with host bits set
/// beyond the given length (`10.0.0.1/24`).
pub fn parse(text: &str) -> Result<Ipv4Net> {
    if text.contains(':') {
        return Err(Error::MalformedCidr(format!(
            "{}: IPv6 prefixes are not supported",
            text
        )));
    }

    let net: Ipv4Net = text
        .parse()
        .map_err(|e| Error::MalformedCidr(format!("{}: {}", text, e)))?;

    if net.trunc() != net {
        return Err(Error::MalformedCidr(format!(
            "{}: host bits set beyond /{}",
            text,
            net.prefix_len()
        )));
    }

    Ok(net)
}

/// Format a network as CIDR text, the inverse of [`parse`]
pub fn format(net: &Ipv4Net) -> String {
    net.to_string()
}

/// Build a network from its base address text and prefix length
pub fn cidr_from_parts(address: &str, prefix_len: u8) -> Result<Ipv4Net> {
    parse(&format!("{}/{}", address, prefix_len))
}

/// Number of addresses in a block of the given prefix length
pub fn address_count(prefix_len: u8) -> u64 {
    1u64 << (IPV4_BITS - prefix_len.min(IPV4_BITS))
}

/// Inclusive `[first, last]` integer range of a network
pub fn range(net: &Ipv4Net) -> (u32, u32) {
    (u32::from(net.network()), u32::from(net.broadcast()))
}

/// Network address offset by the gateway reservation.
///
/// Fails with [`Error::RangeTooSmall`] unless the block can hold the
/// reservation plus at least one host.
pub fn first_usable_address(net: &Ipv4Net, reserved_count: u32) -> Result<Ipv4Addr> {
    if u64::from(reserved_count) + 1 > address_count(net.prefix_len()) {
        return Err(Error::RangeTooSmall {
            cidr: format(net),
            reserved: reserved_count,
        });
    }

    let (first, _) = range(net);
    Ok(Ipv4Addr::from(first + reserved_count))
}

/// True iff every address of `child` lies inside `parent`
pub fn contains(parent: &Ipv4Net, child: &Ipv4Net) -> bool {
    let (p_first, p_last) = range(parent);
    let (c_first, c_last) = range(child);
    p_first <= c_first && c_last <= p_last
}

/// True iff the two ranges share at least one address
pub fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    let (a_first, a_last) = range(a);
    let (b_first, b_last) = range(b);
    a_first <= b_last && b_first <= a_last
}

/// Smallest prefix length whose block holds `count` addresses
pub fn prefix_len_for_count(count: u64) -> Result<u8> {
    if count == 0 || count > address_count(0) {
        return Err(Error::InvalidPrefixLength(format!(
            "address count {} is outside 1..={}",
            count,
            address_count(0)
        )));
    }

    let bits = if count == 1 {
        0
    } else {
        64 - (count - 1).leading_zeros() as u8
    };
    Ok(IPV4_BITS - bits)
}

/// Check that a child length can be carved from a parent.
///
/// The child must be strictly smaller than the parent, no longer than
/// `max_len`, and large enough for `reserved` gateway addresses plus a host.
pub fn validate_child_len(parent_len: u8, child_len: u8, reserved: u32, max_len: u8) -> Result<()> {
    if child_len > IPV4_BITS {
        return Err(Error::InvalidPrefixLength(format!(
            "given length:{} exceeds {} bits",
            child_len, IPV4_BITS
        )));
    }

    if child_len <= parent_len {
        return Err(Error::InvalidPrefixLength(format!(
            "given length:{} must be greater than prefix length:{}",
            child_len, parent_len
        )));
    }

    if child_len > max_len.min(MAX_CHILD_PREFIX_LEN) {
        return Err(Error::InvalidPrefixLength(format!(
            "given length:{} cannot hold a gateway and a host (longest allowed is /{})",
            child_len,
            max_len.min(MAX_CHILD_PREFIX_LEN)
        )));
    }

    if u64::from(reserved) + 1 > address_count(child_len) {
        return Err(Error::InvalidPrefixLength(format!(
            "given length:{} cannot hold {} reserved address(es) plus a host",
            child_len, reserved
        )));
    }

    Ok(())
}

/// Minimal set of aligned networks covering the inclusive range `[start, end]`
pub fn cover_range(start: u32, end: u32) -> Vec<Ipv4Net> {
    let mut blocks = Vec::new();
    let mut current = u64::from(start);
    let end = u64::from(end);

    while current <= end {
        // Largest block aligned at `current`
        let align_bits = if current == 0 {
            u32::from(IPV4_BITS)
        } else {
            current.trailing_zeros().min(u32::from(IPV4_BITS))
        };
        // Largest block that fits in what is left
        let remaining = end - current + 1;
        let fit_bits = 63 - remaining.leading_zeros();

        let bits = align_bits.min(fit_bits) as u8;
        if let Ok(net) = Ipv4Net::new(Ipv4Addr::from(current as u32), IPV4_BITS - bits) {
            blocks.push(net);
        }
        current += 1u64 << bits;
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        parse(s).unwrap()
    }

    #[test]
    fn test_parse_valid() {
        let n = net("192.168.0.0/16");
        assert_eq!(n.network(), Ipv4Addr::new(192, 168, 0, 0));
        assert_eq!(n.prefix_len(), 16);
        assert_eq!(format(&n), "192.168.0.0/16");
    }

    #[test]
    fn test_parse_rejects_host_bits() {
        let result = parse("10.0.0.1/24");
        assert!(matches!(result, Err(Error::MalformedCidr(_))));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for text in ["", "10.0.0.0", "10.0.0.0/33", "10.0.0/8", "not-a-cidr", "10.0.0.0/-1"] {
            assert!(
                matches!(parse(text), Err(Error::MalformedCidr(_))),
                "{} should be rejected",
                text
            );
        }
    }

    #[test]
    fn test_parse_rejects_ipv6() {
        assert!(matches!(parse("fd00::/64"), Err(Error::MalformedCidr(_))));
    }

    #[test]
    fn test_cidr_from_parts() {
        assert_eq!(format(&cidr_from_parts("10.1.0.0", 16).unwrap()), "10.1.0.0/16");
        assert!(cidr_from_parts("10.1.0.1", 16).is_err());
    }

    #[test]
    fn test_first_usable_address() {
        let n = net("192.168.1.0/24");
        assert_eq!(first_usable_address(&n, 1).unwrap(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(first_usable_address(&n, 2).unwrap(), Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(first_usable_address(&n, 0).unwrap(), Ipv4Addr::new(192, 168, 1, 0));
    }

    #[test]
    fn test_first_usable_address_too_small() {
        // /30 = 4 addresses, reserving 4 leaves no host
        let n = net("10.0.0.0/30");
        assert!(first_usable_address(&n, 3).is_ok());
        assert!(matches!(
            first_usable_address(&n, 4),
            Err(Error::RangeTooSmall { reserved: 4, .. })
        ));

        let single = net("10.0.0.7/32");
        assert!(matches!(
            first_usable_address(&single, 1),
            Err(Error::RangeTooSmall { .. })
        ));
    }

    #[test]
    fn test_contains() {
        let parent = net("10.0.0.0/16");
        assert!(contains(&parent, &net("10.0.5.0/24")));
        assert!(contains(&parent, &parent));
        assert!(!contains(&parent, &net("10.1.0.0/24")));
        assert!(!contains(&net("10.0.5.0/24"), &parent));
    }

    #[test]
    fn test_overlaps() {
        assert!(overlaps(&net("10.0.0.0/16"), &net("10.0.255.0/24")));
        assert!(overlaps(&net("10.0.255.0/24"), &net("10.0.0.0/16")));
        assert!(!overlaps(&net("10.0.0.0/24"), &net("10.0.1.0/24")));
        assert!(overlaps(&net("0.0.0.0/0"), &net("255.255.255.0/24")));
    }

    #[test]
    fn test_prefix_len_for_count() {
        assert_eq!(prefix_len_for_count(1).unwrap(), 32);
        assert_eq!(prefix_len_for_count(2).unwrap(), 31);
        assert_eq!(prefix_len_for_count(3).unwrap(), 30);
        assert_eq!(prefix_len_for_count(256).unwrap(), 24);
        assert_eq!(prefix_len_for_count(257).unwrap(), 23);
        assert_eq!(prefix_len_for_count(1 << 32).unwrap(), 0);
        assert!(prefix_len_for_count(0).is_err());
        assert!(prefix_len_for_count((1 << 32) + 1).is_err());
    }

    #[test]
    fn test_validate_child_len() {
        assert!(validate_child_len(16, 24, 1, 30).is_ok());
        assert!(validate_child_len(16, 30, 2, 30).is_ok());

        for (parent, child) in [(16, 16), (16, 15), (16, 31), (16, 32), (16, 40)] {
            assert!(
                matches!(
                    validate_child_len(parent, child, 1, 30),
                    Err(Error::InvalidPrefixLength(_))
                ),
                "/{} from /{} should be rejected",
                child,
                parent
            );
        }

        // /30 holds 4 addresses, a reservation of 4 leaves no host
        assert!(validate_child_len(16, 30, 4, 30).is_err());
        // Configured ceiling below the structural one
        assert!(validate_child_len(16, 28, 1, 26).is_err());
    }

    #[test]
    fn test_cover_range() {
        let (first, last) = range(&net("10.0.0.0/24"));
        assert_eq!(cover_range(first, last), vec![net("10.0.0.0/24")]);

        // 10.0.0.128 - 10.0.1.255 = /25 + /24
        let start = u32::from(Ipv4Addr::new(10, 0, 0, 128));
        let end = u32::from(Ipv4Addr::new(10, 0, 1, 255));
        assert_eq!(
            cover_range(start, end),
            vec![net("10.0.0.128/25"), net("10.0.1.0/24")]
        );

        assert_eq!(cover_range(0, u32::MAX), vec![net("0.0.0.0/0")]);
        assert_eq!(cover_range(5, 5), vec![net("0.0.0.5/32")]);
    }
}
