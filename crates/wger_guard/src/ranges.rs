//! Address ranges a configured base URL must never point into.

use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const RESTRICTED_CIDRS: &[(&str, &str)] = &[
    // IPv4
    ("0.0.0.0/8", "current network"),
    ("10.0.0.0/8", "RFC1918 private network"),
    ("100.64.0.0/10", "shared address space"),
    ("127.0.0.0/8", "loopback"),
    ("169.254.0.0/16", "link-local"),
    ("172.16.0.0/12", "RFC1918 private network"),
    ("192.0.0.0/24", "IETF protocol assignments"),
    ("192.0.2.0/24", "documentation"),
    ("192.88.99.0/24", "6to4 relay anycast"),
    ("192.168.0.0/16", "RFC1918 private network"),
    ("198.18.0.0/15", "benchmarking"),
    ("198.51.100.0/24", "documentation"),
    ("203.0.113.0/24", "documentation"),
    ("224.0.0.0/4", "multicast"),
    ("240.0.0.0/4", "reserved"),
    ("255.255.255.255/32", "broadcast"),
    // IPv6
    ("::/128", "IPv6 unspecified"),
    ("::1/128", "IPv6 loopback"),
    ("100::/64", "IPv6 discard-only"),
    ("2001:db8::/32", "IPv6 documentation"),
    ("fc00::/7", "IPv6 unique local"),
    ("fe80::/10", "IPv6 link-local"),
    ("ff00::/8", "IPv6 multicast"),
];

#[derive(Debug, Clone)]
pub struct RestrictedRange {
    pub network: IpNetwork,
    pub label: &'static str,
}

pub static RESTRICTED_RANGES: Lazy<Vec<RestrictedRange>> = Lazy::new(|| {
    RESTRICTED_CIDRS
        .iter()
        .filter_map(|&(cidr, label)| {
            cidr.parse()
                .ok()
                .map(|network| RestrictedRange { network, label })
        })
        .collect()
});

/// Prefix of the NAT64 well-known range (64:ff9b::/96).
const NAT64_PREFIX: [u16; 6] = [0x64, 0xff9b, 0, 0, 0, 0];

/// Strip IPv6 wrappers that carry an IPv4 address (IPv4-mapped,
/// IPv4-compatible, NAT64, 6to4).
pub fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match embedded_ipv4(&v6) {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        IpAddr::V4(_) => ip,
    }
}

fn embedded_ipv4(v6: &Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = v6.to_ipv4_mapped() {
        return Some(v4);
    }
    let segments = v6.segments();
    let octets = v6.octets();
    let [.., a, b, c, d] = octets;

    // ::a.b.c.d, but `::` and `::1` keep their IPv6 meaning.
    let compatible = segments[..6] == [0; 6] && !(segments[6] == 0 && segments[7] <= 1);
    if compatible || segments[..6] == NAT64_PREFIX {
        return Some(Ipv4Addr::new(a, b, c, d));
    }
    // 2002:AABB:CCDD::/48 carries AA.BB.CC.DD.
    if segments[0] == 0x2002 {
        return Some(Ipv4Addr::new(octets[2], octets[3], octets[4], octets[5]));
    }
    None
}

/// The restricted range `ip` falls in, if any. Wrapped IPv4 is unwrapped first.
pub fn restricted_range(ip: IpAddr) -> Option<&'static RestrictedRange> {
    let ip = canonical(ip);
    RESTRICTED_RANGES.iter().find(|range| range.network.contains(ip))
}

pub fn is_loopback(ip: IpAddr) -> bool {
    canonical(ip).is_loopback()
}
