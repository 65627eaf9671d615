// SPDX-License-Identifier: AGPL-3.0-or-later

//! Small free functions shared by more than one dissector.

/// Case-insensitive ASCII prefix match, used throughout the email and
/// SMB dissectors for header/command matching without allocating.
pub fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Parses a dotted-quad IPv4 address the same way the original
/// `inet_addr`-backed `IP_HASH` field type did: the literal broadcast
/// address `255.255.255.255` is rejected rather than accepted, because
/// `inet_addr` returns the all-ones bit pattern both for that address
/// and for a malformed string, and the original code treated that
/// return value as "parse failed" either way. Kept for bug-compatible
/// output; anything that wants the real broadcast address should parse
/// `str::parse::<Ipv4Addr>()` directly instead of this helper.
pub fn parse_ipv4_hash(s: &str) -> Option<std::net::Ipv4Addr> {
    let addr: std::net::Ipv4Addr = s.trim().parse().ok()?;
    if addr == std::net::Ipv4Addr::new(255, 255, 255, 255) {
        None
    } else {
        Some(addr)
    }
}
