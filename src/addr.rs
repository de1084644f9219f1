//! Address normalization.
//!
//! The registry keys live connections by canonical host string so that the
//! same peer cannot occupy two slots under different textual representations
//! of one address.

use std::net::{IpAddr, SocketAddr};

/// Canonical host string for a socket address.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) collapse to their IPv4
/// form so dual-stack listeners see one identity per remote host. The port
/// is not part of the key: admission control is per-host.
pub fn normalize(addr: &SocketAddr) -> String {
    match addr.ip() {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_v4() {
        let addr: SocketAddr = "10.0.0.5:8444".parse().unwrap();
        assert_eq!(normalize(&addr), "10.0.0.5");
    }

    #[test]
    fn test_normalize_strips_port() {
        let a: SocketAddr = "10.0.0.5:1111".parse().unwrap();
        let b: SocketAddr = "10.0.0.5:2222".parse().unwrap();
        assert_eq!(normalize(&a), normalize(&b));
    }

    #[test]
    fn test_normalize_v4_mapped_v6() {
        let mapped: SocketAddr = "[::ffff:10.0.0.5]:8444".parse().unwrap();
        let plain: SocketAddr = "10.0.0.5:8444".parse().unwrap();
        assert_eq!(normalize(&mapped), normalize(&plain));
    }

    #[test]
    fn test_normalize_v6() {
        let addr: SocketAddr = "[2001:db8::1]:8444".parse().unwrap();
        assert_eq!(normalize(&addr), "2001:db8::1");
    }
}
