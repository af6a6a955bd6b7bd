//! Outbound IP allow-listing
//!
//! Before an agent dials a host for the first time, every address the
//! hostname resolves to must fall inside one of the configured ranges.
//! Entries may be single IPs (`10.1.2.3`) or CIDR ranges (`10.0.0.0/8`).
//! IPv4-mapped IPv6 addresses are normalized to IPv4 before checking.

use std::net::IpAddr;

use ipnet::IpNet;
use tracing::debug;

use super::error::{Protocol, TransferError};
use super::path_utils::parse_host_port;

/// Parsed set of allowed networks
#[derive(Debug, Clone, Default)]
pub struct AllowedRanges {
    nets: Vec<IpNet>,
}

impl AllowedRanges {
    pub fn parse(entries: &[String]) -> Result<Self, String> {
        let mut nets = Vec::with_capacity(entries.len());
        for entry in entries {
            let net = match entry.parse::<IpNet>() {
                Ok(net) => net,
                Err(_) => entry
                    .parse::<IpAddr>()
                    .map(IpNet::from)
                    .map_err(|_| format!("invalid IP or CIDR range: {}", entry))?,
            };
            nets.push(net);
        }
        Ok(Self { nets })
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = normalize_ip(ip);
        self.nets.iter().any(|net| net.contains(&ip))
    }
}

fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// Fail when `hostname` resolves outside of `allowed`. An empty list allows
/// every host and performs no lookup.
pub async fn reject_outbound_ip_range(
    protocol: Protocol,
    allowed: &[String],
    hostname: &str,
) -> Result<(), TransferError> {
    let ranges = AllowedRanges::parse(allowed).map_err(|e| TransferError::config(protocol, e))?;
    if ranges.is_empty() {
        return Ok(());
    }

    let (host, port) =
        parse_host_port(hostname, 1).map_err(|e| TransferError::config(protocol, e))?;

    let addrs: Vec<IpAddr> = match host.parse::<IpAddr>() {
        Ok(ip) => vec![ip],
        Err(_) => tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| {
                TransferError::connection(protocol, format!("failed to resolve {}: {}", host, e))
            })?
            .map(|addr| addr.ip())
            .collect(),
    };

    check_addresses(protocol, &ranges, hostname, &addrs)
}

fn check_addresses(
    protocol: Protocol,
    ranges: &AllowedRanges,
    hostname: &str,
    addrs: &[IpAddr],
) -> Result<(), TransferError> {
    if addrs.is_empty() {
        return Err(TransferError::connection(
            protocol,
            format!("{} resolved to no addresses", hostname),
        ));
    }
    if let Some(ip) = addrs.iter().find(|ip| !ranges.contains(**ip)) {
        return Err(TransferError::config(
            protocol,
            format!("{} is not whitelisted: {} is outside the allowed IP ranges", hostname, ip),
        ));
    }
    debug!("{}: {} allowed by outbound IP ranges", protocol, hostname);
    Ok(())
}
