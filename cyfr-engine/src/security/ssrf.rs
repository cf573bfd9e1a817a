//! SSRF protection for mediated HTTP.
//!
//! Before any outbound connection, the target hostname is resolved and
//! every returned address is checked against the private/internal ranges.
//! A host that resolves to any private address is refused, which also
//! covers DNS-rebinding setups that mix public and private records.
//!
//! The engine does not pin the outbound connection to the resolved IP:
//! pinning breaks TLS SNI and CDN routing. The residual TOCTOU window
//! between resolution and connect is an accepted tradeoff.

// Layer 1: Standard library imports
use std::net::IpAddr;

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};

/// Whether an address belongs to a private or internal range.
///
/// IPv4: `127/8`, `10/8`, `172.16/12`, `192.168/16`, `169.254/16`, `0/8`.
/// IPv6: `::1`, `::`, `fc00::/7`, `fe80::/10`; IPv4-mapped addresses
/// recurse into the IPv4 check.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()           // 127.0.0.0/8
                || v4.is_private()     // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
                || v4.is_link_local()  // 169.254.0.0/16
                || v4.octets()[0] == 0 // 0.0.0.0/8
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_ip(IpAddr::V4(mapped));
            }
            v6.is_loopback()                              // ::1
                || v6.is_unspecified()                    // ::
                || (v6.segments()[0] & 0xFE00) == 0xFC00  // fc00::/7 unique local
                || (v6.segments()[0] & 0xFFC0) == 0xFE80  // fe80::/10 link local
        }
    }
}

/// Resolve `host` and refuse private or internal targets.
///
/// IP literals are checked directly. Hostnames are resolved (A and AAAA);
/// resolution failure is a `dns_error`, and any private address among the
/// results is a `private_ip_blocked`.
pub async fn ensure_public_host(host: &str, port: u16) -> EngineResult<()> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(EngineError::private_ip_blocked(format!(
                "{host} is a private or internal address"
            )));
        }
        return Ok(());
    }

    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| EngineError::dns_error(host, e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(EngineError::dns_error(host, "no addresses returned"));
    }

    for addr in addrs {
        if is_private_ip(addr.ip()) {
            return Err(EngineError::private_ip_blocked(format!(
                "{host} resolved to private address {}",
                addr.ip()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_private_ipv4_ranges() {
        for addr in [
            "127.0.0.1",
            "127.255.255.254",
            "10.0.0.1",
            "10.255.0.1",
            "172.16.0.1",
            "172.31.255.1",
            "192.168.1.1",
            "169.254.0.1",
            "0.0.0.0",
            "0.1.2.3",
        ] {
            assert!(is_private_ip(ip(addr)), "{addr} should be private");
        }
    }

    #[test]
    fn test_public_ipv4() {
        for addr in ["1.1.1.1", "8.8.8.8", "93.184.216.34", "172.32.0.1", "172.15.0.1"] {
            assert!(!is_private_ip(ip(addr)), "{addr} should be public");
        }
    }

    #[test]
    fn test_private_ipv6_ranges() {
        for addr in ["::1", "::", "fc00::1", "fdff::1", "fe80::1", "febf::1"] {
            assert!(is_private_ip(ip(addr)), "{addr} should be private");
        }
    }

    #[test]
    fn test_public_ipv6() {
        assert!(!is_private_ip(ip("2606:4700:4700::1111")));
        assert!(!is_private_ip(ip("fec0::1")));
    }

    #[test]
    fn test_mapped_ipv4_recurses() {
        assert!(is_private_ip(ip("::ffff:127.0.0.1")));
        assert!(is_private_ip(ip("::ffff:192.168.0.10")));
        assert!(!is_private_ip(ip("::ffff:8.8.8.8")));
    }

    #[tokio::test]
    async fn test_ip_literal_is_checked_directly() {
        let err = ensure_public_host("127.0.0.1", 80).await.unwrap_err();
        assert_eq!(err.kind(), "private_ip_blocked");

        assert!(ensure_public_host("1.1.1.1", 80).await.is_ok());
    }

    #[tokio::test]
    async fn test_localhost_resolves_private() {
        let err = ensure_public_host("localhost", 80).await.unwrap_err();
        assert_eq!(err.kind(), "private_ip_blocked");
    }
}
