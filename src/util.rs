use std::net::{Ipv4Addr, SocketAddr};

const DEFAULT_HTTP_PORT: u16 = 10902;

const DEFAULT_STORE_PORT: u16 = 10901;

const DEFAULT_ALERTMANAGER_PORT: u16 = 9093;

pub fn get_default_http_address() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::new(0, 0, 0, 0), DEFAULT_HTTP_PORT))
}

pub fn get_default_store_port() -> u16 {
    DEFAULT_STORE_PORT
}

pub fn get_default_query_port() -> u16 {
    DEFAULT_HTTP_PORT
}

pub fn get_default_alertmanager_port() -> u16 {
    DEFAULT_ALERTMANAGER_PORT
}

const LOG_LEVEL: &str = "MESHWATCH_LOG";

const DEFAULT_LOG_LEVEL: tracing::Level = tracing::Level::DEBUG;

pub fn get_log_level() -> tracing::Level {
    let level_from_env = std::env::var(LOG_LEVEL);
    level_from_env.map_or(DEFAULT_LOG_LEVEL, |res| {
        res.parse().unwrap_or(DEFAULT_LOG_LEVEL)
    })
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
///
/// Returns `None` if the address carries no port.
pub fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    // a bare IPv6 address without brackets has colons but no port
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return None;
    }
    let port = port.parse().ok()?;
    Some((host.trim_start_matches('[').trim_end_matches(']'), port))
}

/// Append `default_port` to `addr` unless it already has one.
pub fn with_default_port(addr: &str, default_port: u16) -> String {
    if split_host_port(addr).is_some() {
        return addr.to_string();
    }
    if addr.contains(':') && !addr.starts_with('[') {
        return format!("[{addr}]:{default_port}");
    }
    format!("{addr}:{default_port}")
}

/// Join a host and port, bracketing IPv6 hosts.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com:9090"), Some(("example.com", 9090)));
        assert_eq!(split_host_port("[::1]:9090"), Some(("::1", 9090)));
        assert_eq!(split_host_port("example.com"), None);
        assert_eq!(split_host_port("::1"), None);
        assert_eq!(split_host_port("example.com:http"), None);
    }

    #[test]
    fn test_with_default_port() {
        assert_eq!(with_default_port("alertmanager", 9093), "alertmanager:9093");
        assert_eq!(with_default_port("alertmanager:1234", 9093), "alertmanager:1234");
        assert_eq!(with_default_port("::1", 9093), "[::1]:9093");
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("10.0.0.1", 80), "10.0.0.1:80");
        assert_eq!(join_host_port("::1", 80), "[::1]:80");
    }
}
