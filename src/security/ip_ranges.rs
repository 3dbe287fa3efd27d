//! Reserved address ranges that outbound requests must never reach

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// An IPv4 CIDR block
#[derive(Debug, Clone, Copy)]
struct V4Range {
    network: u32,
    prefix: u8,
    label: &'static str,
}

impl V4Range {
    const fn new(octets: [u8; 4], prefix: u8, label: &'static str) -> Self {
        Self {
            network: u32::from_be_bytes(octets),
            prefix,
            label,
        }
    }

    fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix as u32)
        };
        (u32::from(addr) & mask) == (self.network & mask)
    }
}

/// An IPv6 CIDR block
#[derive(Debug, Clone, Copy)]
struct V6Range {
    network: u128,
    prefix: u8,
    label: &'static str,
}

impl V6Range {
    const fn new(segments: [u16; 8], prefix: u8, label: &'static str) -> Self {
        let mut network: u128 = 0;
        let mut i = 0;
        while i < 8 {
            network = (network << 16) | segments[i] as u128;
            i += 1;
        }
        Self {
            network,
            prefix,
            label,
        }
    }

    fn contains(&self, addr: Ipv6Addr) -> bool {
        let mask = if self.prefix == 0 {
            0
        } else {
            u128::MAX << (128 - self.prefix as u32)
        };
        (u128::from(addr) & mask) == (self.network & mask)
    }
}

const BLOCKED_V4: &[V4Range] = &[
    V4Range::new([0, 0, 0, 0], 8, "this network"),
    V4Range::new([10, 0, 0, 0], 8, "private"),
    V4Range::new([100, 64, 0, 0], 10, "carrier-grade NAT"),
    V4Range::new([127, 0, 0, 0], 8, "loopback"),
    V4Range::new([169, 254, 0, 0], 16, "link-local"),
    V4Range::new([172, 16, 0, 0], 12, "private"),
    V4Range::new([192, 0, 0, 0], 24, "IETF protocol assignments"),
    V4Range::new([192, 0, 2, 0], 24, "documentation"),
    V4Range::new([192, 168, 0, 0], 16, "private"),
    V4Range::new([198, 18, 0, 0], 15, "benchmarking"),
    V4Range::new([198, 51, 100, 0], 24, "documentation"),
    V4Range::new([203, 0, 113, 0], 24, "documentation"),
    V4Range::new([224, 0, 0, 0], 4, "multicast"),
    V4Range::new([240, 0, 0, 0], 4, "reserved"),
    V4Range::new([255, 255, 255, 255], 32, "broadcast"),
];

const BLOCKED_V6: &[V6Range] = &[
    V6Range::new([0, 0, 0, 0, 0, 0, 0, 0], 128, "unspecified"),
    V6Range::new([0, 0, 0, 0, 0, 0, 0, 1], 128, "loopback"),
    V6Range::new([0x64, 0xff9b, 0, 0, 0, 0, 0, 0], 96, "NAT64"),
    V6Range::new([0x100, 0, 0, 0, 0, 0, 0, 0], 64, "discard-only"),
    V6Range::new([0x2001, 0xdb8, 0, 0, 0, 0, 0, 0], 32, "documentation"),
    V6Range::new([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7, "unique local"),
    V6Range::new([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10, "link-local"),
    V6Range::new([0xff00, 0, 0, 0, 0, 0, 0, 0], 8, "multicast"),
];

/// Returns the name of the reserved range containing `ip`, if any
///
/// IPv4-mapped and IPv4-compatible IPv6 addresses are checked as IPv4.
pub fn blocked_range(ip: &IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => blocked_v4(*v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return blocked_v4(mapped);
            }
            BLOCKED_V6
                .iter()
                .find(|range| range.contains(*v6))
                .map(|range| range.label)
        }
    }
}

/// Returns true if `ip` falls in any reserved range
pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    blocked_range(ip).is_some()
}

fn blocked_v4(addr: Ipv4Addr) -> Option<&'static str> {
    BLOCKED_V4
        .iter()
        .find(|range| range.contains(addr))
        .map(|range| range.label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_private_and_loopback_v4() {
        for addr in [
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "127.0.0.1",
            "0.0.0.0",
            "100.64.0.1",
            "255.255.255.255",
        ] {
            assert!(is_blocked_ip(&ip(addr)), "{} should be blocked", addr);
        }
    }

    #[test]
    fn test_metadata_address_is_link_local() {
        assert_eq!(blocked_range(&ip("169.254.169.254")), Some("link-local"));
    }

    #[test]
    fn test_public_v4_allowed() {
        for addr in ["8.8.8.8", "93.184.216.34", "172.32.0.1", "100.128.0.1"] {
            assert!(!is_blocked_ip(&ip(addr)), "{} should be allowed", addr);
        }
    }

    #[test]
    fn test_v6_ranges() {
        assert!(is_blocked_ip(&ip("::1")));
        assert!(is_blocked_ip(&ip("::")));
        assert!(is_blocked_ip(&ip("fe80::1")));
        assert!(is_blocked_ip(&ip("fd12:3456::1")));
        assert!(is_blocked_ip(&ip("ff02::1")));
        assert!(is_blocked_ip(&ip("2001:db8::1")));
        assert!(!is_blocked_ip(&ip("2606:4700:4700::1111")));
    }

    #[test]
    fn test_v4_mapped_checked_as_v4() {
        assert!(is_blocked_ip(&ip("::ffff:127.0.0.1")));
        assert!(is_blocked_ip(&ip("::ffff:169.254.169.254")));
        assert!(!is_blocked_ip(&ip("::ffff:8.8.8.8")));
    }
}
