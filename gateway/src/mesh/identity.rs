//! Who this node is on the network.

use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, warn};

/// Hostname and addresses of the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    hostname: String,
    primary_ip: IpAddr,
    addresses: Vec<IpAddr>,
    http_port: u16,
}

impl LocalIdentity {
    /// Builds an identity from explicit parts. `primary_ip` is always part of the address set.
    #[must_use]
    pub fn new(
        hostname: impl Into<String>,
        primary_ip: IpAddr,
        mut addresses: Vec<IpAddr>,
        http_port: u16,
    ) -> Self {
        if !addresses.contains(&primary_ip) {
            addresses.push(primary_ip);
        }
        Self {
            hostname: hostname.into(),
            primary_ip,
            addresses,
            http_port,
        }
    }

    /// Probes the host: configured or OS hostname, outbound IP and every interface address.
    #[must_use]
    pub fn detect(hostname_override: Option<&str>, http_port: u16) -> Self {
        let hostname = hostname_override
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(
                || gethostname::gethostname().to_string_lossy().to_string(),
                str::to_owned,
            );

        let primary_ip = local_ip_address::local_ip().unwrap_or_else(|e| {
            warn!(error = %e, "Unable to determine primary local IP");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        });

        let addresses = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces.iter().map(if_addrs::Interface::ip).collect(),
            Err(e) => {
                warn!(error = %e, "Unable to enumerate network interfaces");
                Vec::new()
            }
        };

        debug!(%hostname, %primary_ip, count = addresses.len(), "Local identity detected");
        Self::new(hostname, primary_ip, addresses, http_port)
    }

    /// Name this node reports in its status.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Address self entries are normalised to.
    #[must_use]
    pub fn primary_ip(&self) -> IpAddr {
        self.primary_ip
    }

    /// All local addresses, loopback included.
    #[must_use]
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    /// Port the HTTP API listens on.
    #[must_use]
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Returns `true` if `ip` belongs to this machine.
    #[must_use]
    pub fn is_local_address(&self, ip: IpAddr) -> bool {
        ip.is_loopback() || self.addresses.contains(&ip)
    }

    /// A datagram is our own iff it came from one of our addresses and carries our hostname.
    #[must_use]
    pub fn is_self(&self, sender: IpAddr, hostname: &str) -> bool {
        self.addresses.contains(&sender) && hostname.eq_ignore_ascii_case(&self.hostname)
    }

    /// Returns `true` if a known server entry (`host` or `host:port`) points back at this node.
    #[must_use]
    pub fn is_loopback_host(&self, host_and_port: &str) -> bool {
        let (host, port) = split_host_port(host_and_port);
        let host_is_local = host.eq_ignore_ascii_case("localhost")
            || host
                .parse::<IpAddr>()
                .is_ok_and(|ip| self.is_local_address(ip));

        host_is_local && port.unwrap_or(self.http_port) == self.http_port
    }
}

/// Splits `host[:port]`, handling bracketed IPv6 literals.
///
/// A bare IPv6 address is returned whole with no port.
#[must_use]
pub fn split_host_port(value: &str) -> (&str, Option<u16>) {
    let value = value.trim();

    if let Some(rest) = value.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
        return (value, None);
    }

    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (value, None),
        },
        _ => (value, None),
    }
}

/// URL of `path` on a peer, using `default_port` unless the host names one.
#[must_use]
pub fn peer_url(host_and_port: &str, default_port: u16, path: &str) -> String {
    let (host, port) = split_host_port(host_and_port);
    let port = port.unwrap_or(default_port);
    let path = path.trim_start_matches('/');

    if host.contains(':') {
        format!("http://[{host}]:{port}/{path}")
    } else {
        format!("http://{host}:{port}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> LocalIdentity {
        LocalIdentity::new(
            "Node-A",
            "192.168.1.20".parse().unwrap(),
            vec!["127.0.0.1".parse().unwrap()],
            32168,
        )
    }

    #[test]
    fn self_needs_both_address_and_hostname() {
        let id = identity();
        let primary: IpAddr = "192.168.1.20".parse().unwrap();

        assert!(id.is_self(primary, "node-a"));
        assert!(!id.is_self(primary, "node-b"));
        assert!(!id.is_self("192.168.1.99".parse().unwrap(), "node-a"));
    }

    #[test]
    fn loopback_requires_our_port() {
        let id = identity();

        assert!(id.is_loopback_host("localhost"));
        assert!(id.is_loopback_host("127.0.0.1:32168"));
        assert!(id.is_loopback_host("192.168.1.20"));
        assert!(!id.is_loopback_host("127.0.0.1:40000"));
        assert!(!id.is_loopback_host("node-b"));
    }

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("node-b"), ("node-b", None));
        assert_eq!(split_host_port("node-b:8080"), ("node-b", Some(8080)));
        assert_eq!(split_host_port("[::1]:9000"), ("::1", Some(9000)));
        assert_eq!(split_host_port("fe80::1"), ("fe80::1", None));
    }

    #[test]
    fn peer_urls() {
        assert_eq!(
            peer_url("node-b", 32168, "/v1/server/mesh/status"),
            "http://node-b:32168/v1/server/mesh/status"
        );
        assert_eq!(
            peer_url("127.0.0.1:4000", 32168, "v1/x"),
            "http://127.0.0.1:4000/v1/x"
        );
        assert_eq!(peer_url("::1", 80, "v1/x"), "http://[::1]:80/v1/x");
    }
}
