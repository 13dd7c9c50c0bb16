//! IPv4 address normalisation for the visit guard.
//!
//! The guard is keyed by raw octets and never stores textual addresses.
//! Text input must be exactly four dot-separated decimal fields, each in
//! `0..=255`. Anything else is malformed and rejected without touching the
//! trie.

use std::net::{IpAddr, Ipv4Addr};

/// Parse a dotted-quad string into its four octets.
///
/// Leading zeros are accepted (`"010.0.0.1"` is `10.0.0.1`), surrounding
/// whitespace and signs are not.
pub fn parse_octets(input: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut fields = input.split('.');

    for slot in octets.iter_mut() {
        let field = fields.next()?;
        if field.is_empty() || field.len() > 3 || !field.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: u16 = field.parse().ok()?;
        *slot = u8::try_from(value).ok()?;
    }

    if fields.next().is_some() {
        return None;
    }
    Some(octets)
}

/// Reduce a peer address to IPv4 octets.
///
/// IPv4-mapped IPv6 peers (`::ffff:a.b.c.d`, as reported by dual-stack
/// listeners) are unwrapped. Native IPv6 peers are not tracked.
#[inline]
pub fn ip_octets(ip: IpAddr) -> Option<[u8; 4]> {
    match ip {
        IpAddr::V4(v4) => Some(v4.octets()),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(|v4| v4.octets()),
    }
}

/// Convert octets back to a `u32` key (big-endian, octet order preserved).
#[inline]
pub(crate) fn octets_to_u32(octets: [u8; 4]) -> u32 {
    u32::from_be_bytes(octets)
}

/// Render octets as an `Ipv4Addr`.
#[inline]
pub(crate) fn octets_to_addr(octets: [u8; 4]) -> Ipv4Addr {
    Ipv4Addr::from(octets)
}
