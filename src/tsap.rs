//! TSAP addressing.
//!
//! A transport service access point is identified by an IP address together
//! with a variable-length transport selector (TSEL) of up to 64 octets. The
//! TCP port is part of the address too; it defaults to the RFC 1006 port 102.

use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};
use std::str::FromStr;

use bytes::Bytes;

use crate::error::Error;
use crate::tpkt;

/// Maximum transport selector length in octets.
pub const TSEL_MAX_LEN: usize = 64;

/// Network selector accepted by the public API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    /// TCP over either address family.
    Any,
    /// TCP over IPv4 only.
    V4,
    /// TCP over IPv6 only.
    V6,
}

impl Network {
    pub(crate) fn matches(self, ip: IpAddr) -> bool {
        match self {
            Network::Any => true,
            Network::V4 => ip.is_ipv4(),
            Network::V6 => ip.is_ipv6(),
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "cotp" => Ok(Network::Any),
            "cotp4" => Ok(Network::V4),
            "cotp6" => Ok(Network::V6),
            _ => Err(Error::InvalidNetwork(s.to_string())),
        }
    }
}

/// TSAP address: an IP address, a TCP port and a transport selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TsapAddr {
    ip: IpAddr,
    port: u16,
    tsel: Bytes,
}

impl TsapAddr {
    /// Creates a new `TsapAddr` on the default RFC 1006 port.
    pub fn new(ip: IpAddr, tsel: &[u8]) -> Result<Self, Error> {
        if tsel.len() > TSEL_MAX_LEN {
            return Err(Error::InvalidAddress(format!(
                "transport selector too long: {} octets",
                tsel.len()
            )));
        }

        Ok(TsapAddr {
            ip,
            port: tpkt::TCP_PORT,
            tsel: Bytes::copy_from_slice(tsel),
        })
    }

    /// Replaces the TCP port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn tsel(&self) -> &[u8] {
        &self.tsel
    }

    pub(crate) fn tsel_bytes(&self) -> Bytes {
        self.tsel.clone()
    }

    /// Parses and resolves `addr` as a TSAP address on the given network,
    /// which must be `cotp`, `cotp4` or `cotp6`.
    ///
    /// The accepted forms are `host`, `host:tsel` and `host:port:tsel`. The
    /// host may be an IP literal (IPv6 in square brackets) or a domain name,
    /// which is resolved on the requested address family. The TSEL is taken
    /// as raw bytes and may be empty; `10.20.30.40:hello` is a valid address.
    pub fn resolve(net: &str, addr: &str) -> Result<Self, Error> {
        let network: Network = net.parse()?;
        let (host, port, tsel) = split_addr(addr)?;
        let port = port.unwrap_or(tpkt::TCP_PORT);

        let ip = match host.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => lookup_host(host, port, network)?,
        };

        if !network.matches(ip) {
            return Err(Error::InvalidAddress(format!(
                "`{host}` is not a {net} address"
            )));
        }

        Ok(TsapAddr::new(ip, tsel.as_bytes())?.with_port(port))
    }
}

impl fmt::Display for TsapAddr {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(fmt, "{ip}")?,
            IpAddr::V6(ip) => write!(fmt, "[{ip}]")?,
        }

        if self.port != tpkt::TCP_PORT {
            write!(fmt, ":{}", self.port)?;
        }

        if !self.tsel.is_empty() || self.port != tpkt::TCP_PORT {
            write!(fmt, ":{}", String::from_utf8_lossy(&self.tsel))?;
        }

        Ok(())
    }
}

impl FromStr for TsapAddr {
    type Err = Error;

    /// Parses the textual form without consulting the resolver; the host
    /// must be an IP literal.
    fn from_str(s: &str) -> Result<Self, Error> {
        let (host, port, tsel) = split_addr(s)?;

        let ip: IpAddr = host
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("`{host}` is not an IP literal")))?;

        Ok(TsapAddr::new(ip, tsel.as_bytes())?.with_port(port.unwrap_or(tpkt::TCP_PORT)))
    }
}

/// Splits `host`, `host:tsel` or `host:port:tsel`, with the host optionally
/// a bracketed IPv6 literal.
fn split_addr(addr: &str) -> Result<(&str, Option<u16>, &str), Error> {
    // A bare IPv6 literal contains colons but no TSEL.
    if addr.parse::<IpAddr>().is_ok() {
        return Ok((addr, None, ""));
    }

    let (host, rest) = if let Some(stripped) = addr.strip_prefix('[') {
        let end = stripped
            .find(']')
            .ok_or_else(|| Error::InvalidAddress(format!("unclosed `[` in `{addr}`")))?;
        (&stripped[..end], &stripped[end + 1..])
    } else {
        match addr.find(':') {
            Some(idx) => (&addr[..idx], &addr[idx..]),
            None => (addr, ""),
        }
    };

    if host.is_empty() {
        return Err(Error::InvalidAddress(format!("missing host in `{addr}`")));
    }

    let rest = match rest.strip_prefix(':') {
        Some(rest) => rest,
        None if rest.is_empty() => return Ok((host, None, "")),
        None => {
            return Err(Error::InvalidAddress(format!(
                "unexpected `{rest}` after host in `{addr}`"
            )))
        }
    };

    // The remainder is either `tsel` or `port:tsel`.
    match rest.split_once(':') {
        Some((port, tsel)) => {
            let port = port.parse::<u16>().map_err(|_| {
                Error::InvalidAddress(format!("invalid port `{port}` in `{addr}`"))
            })?;
            Ok((host, Some(port), tsel))
        }
        None => Ok((host, None, rest)),
    }
}

fn lookup_host(host: &str, port: u16, network: Network) -> Result<IpAddr, Error> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|err| Error::InvalidAddress(format!("cannot resolve `{host}`: {err}")))?;

    addrs
        .map(|addr| addr.ip())
        .find(|&ip| network.matches(ip))
        .ok_or_else(|| Error::InvalidAddress(format!("no matching address for `{host}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_v4_with_tsel() {
        let addr = TsapAddr::resolve("cotp", "10.20.30.40:hello").unwrap();

        assert_eq!(addr.ip(), "10.20.30.40".parse::<IpAddr>().unwrap());
        assert_eq!(addr.port(), 102);
        assert_eq!(addr.tsel(), b"hello");
    }

    #[test]
    fn resolve_v4_with_port_and_tsel() {
        let addr = TsapAddr::resolve("cotp", "127.0.0.1:8107:100").unwrap();

        assert_eq!(addr.port(), 8107);
        assert_eq!(addr.tsel(), b"100");
    }

    #[test]
    fn resolve_v4_without_tsel() {
        let addr = TsapAddr::resolve("cotp", "127.0.0.1").unwrap();

        assert!(addr.tsel().is_empty());
        assert_eq!(addr.port(), 102);
    }

    #[test]
    fn resolve_v6_bracketed() {
        let addr = TsapAddr::resolve("cotp6", "[::1]:svc").unwrap();

        assert_eq!(addr.ip(), "::1".parse::<IpAddr>().unwrap());
        assert_eq!(addr.tsel(), b"svc");
    }

    #[test]
    fn resolve_v6_bare_literal() {
        let addr = TsapAddr::resolve("cotp", "::1").unwrap();

        assert_eq!(addr.ip(), "::1".parse::<IpAddr>().unwrap());
        assert!(addr.tsel().is_empty());
    }

    #[test]
    fn resolve_empty_tsel() {
        let addr = TsapAddr::resolve("cotp", "127.0.0.1:").unwrap();

        assert!(addr.tsel().is_empty());
    }

    #[test]
    fn resolve_rejects_unknown_network() {
        let result = TsapAddr::resolve("tcp", "127.0.0.1:100");

        assert!(matches!(result, Err(Error::InvalidNetwork(_))));
    }

    #[test]
    fn resolve_rejects_family_mismatch() {
        let result = TsapAddr::resolve("cotp6", "127.0.0.1:100");

        assert!(matches!(result, Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn resolve_rejects_bad_port() {
        let result = TsapAddr::resolve("cotp", "127.0.0.1:99999:100");

        assert!(matches!(result, Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn new_rejects_long_tsel() {
        let result = TsapAddr::new("127.0.0.1".parse().unwrap(), &[0u8; 65]);

        assert!(matches!(result, Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn display_default_port() {
        let addr = TsapAddr::new("10.0.0.1".parse().unwrap(), b"svc").unwrap();

        assert_eq!(addr.to_string(), "10.0.0.1:svc");
    }

    #[test]
    fn display_custom_port() {
        let addr = TsapAddr::new("10.0.0.1".parse().unwrap(), b"svc")
            .unwrap()
            .with_port(8107);

        assert_eq!(addr.to_string(), "10.0.0.1:8107:svc");
    }

    #[test]
    fn display_v6_bracketed() {
        let addr = TsapAddr::new("::1".parse().unwrap(), b"svc").unwrap();

        assert_eq!(addr.to_string(), "[::1]:svc");
    }

    #[test]
    fn display_without_tsel() {
        let addr = TsapAddr::new("10.0.0.1".parse().unwrap(), b"").unwrap();

        assert_eq!(addr.to_string(), "10.0.0.1");
    }

    #[test]
    fn from_str_round_trip() {
        let addr: TsapAddr = "10.0.0.1:8107:svc".parse().unwrap();

        assert_eq!(addr.to_string().parse::<TsapAddr>().unwrap(), addr);
    }

    #[test]
    fn from_str_rejects_domain_name() {
        let result = "localhost:100".parse::<TsapAddr>();

        assert!(matches!(result, Err(Error::InvalidAddress(_))));
    }
}
