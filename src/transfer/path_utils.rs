//! Remote path and address helpers
//!
//! Remote paths always use `/` as separator (FTP and SFTP servers present
//! Unix style paths), regardless of the local OS.

use std::net::Ipv6Addr;

/// Join remote path components using `/` separator.
///
/// An empty base means the session's working directory.
pub fn join_remote_path(base: &str, component: &str) -> String {
    if base.is_empty() || base == "." {
        component.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Final component of a caller supplied filename.
///
/// Upload targets are always `outbound/<base name>` so a filename like
/// `../../etc/passwd` can never escape the outbound directory.
pub fn base_name(filename: &str) -> &str {
    let trimmed = filename.trim_end_matches(['/', '\\']);
    let base = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed);
    match base {
        "" | "." | ".." => "",
        other => other,
    }
}

/// Split `host:port`, `[v6]:port` or a bare host into its parts.
///
/// Fails without touching the network when the port is not a number or the
/// host part is empty.
pub fn parse_host_port(hostname: &str, default_port: u16) -> Result<(String, u16), String> {
    let hostname = hostname.trim();
    if hostname.is_empty() {
        return Err("empty hostname".to_string());
    }

    // [2001:db8::1]:22
    if let Some(rest) = hostname.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| format!("missing ']' in {}", hostname))?;
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(format!("invalid IPv6 address in {}", hostname));
        }
        let port = match tail {
            "" => default_port,
            t => parse_port(t.strip_prefix(':').ok_or_else(|| {
                format!("unexpected characters after ']' in {}", hostname)
            })?, hostname)?,
        };
        return Ok((host.to_string(), port));
    }

    // bare IPv6 without brackets carries no port
    if hostname.parse::<Ipv6Addr>().is_ok() {
        return Ok((hostname.to_string(), default_port));
    }

    match hostname.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(format!("missing host in {}", hostname));
            }
            if host.contains(':') {
                return Err(format!("too many colons in {}", hostname));
            }
            Ok((host.to_string(), parse_port(port, hostname)?))
        }
        None => Ok((hostname.to_string(), default_port)),
    }
}

fn parse_port(port: &str, hostname: &str) -> Result<u16, String> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port {:?} in {}", port, hostname)),
        Ok(p) => Ok(p),
    }
}
