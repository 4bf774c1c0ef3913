use std::collections::HashSet;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::de::DeserializeOwned;
use tracing::trace;
use url::Url;

use crate::Labels;
use crate::discovery::{PeerMetadata, PeerState, PeerType};
use crate::util::{
    get_default_alertmanager_port, get_default_http_address, get_default_query_port,
    get_default_store_port,
};

/// Statically configured member of the gossip cluster
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PeerConfig {
    pub id: String,

    #[serde(rename = "type")]
    pub peer_type: PeerType,

    /// Address other nodes reach the peer's store API on
    #[serde(default)]
    pub store_api_address: String,

    /// Address other nodes reach the peer's query API on
    #[serde(default)]
    pub query_api_address: String,

    #[serde(default)]
    pub labels: Labels,

    /// Oldest timestamp (ms) the peer holds data for
    #[serde(default = "default_min_time")]
    pub min_time: i64,

    /// Newest timestamp (ms) the peer holds data for
    #[serde(default = "default_max_time")]
    pub max_time: i64,
}

impl PeerConfig {
    pub fn to_state(&self) -> PeerState {
        PeerState {
            peer_type: self.peer_type,
            store_api_addr: self.store_api_address.clone(),
            query_api_addr: self.query_api_address.clone(),
            metadata: PeerMetadata {
                labels: self.labels.clone(),
                min_time: self.min_time,
                max_time: self.max_time,
            },
        }
    }
}

/// Configuration of `meshwatch-query`
#[derive(Debug, Clone, serde::Deserialize)]
pub struct QueryNodeConfig {
    #[serde(default = "get_default_http_address")]
    pub http_address: SocketAddr,

    /// Static store addresses, optionally `dns+` / `dnssrv+` prefixed
    #[serde(default)]
    pub stores: Vec<String>,

    /// Glob patterns of store discovery files
    #[serde(default)]
    pub store_sd_files: Vec<String>,

    #[serde(default = "default_sd_interval", with = "humantime_serde")]
    pub store_sd_interval: Duration,

    #[serde(default = "default_dns_interval", with = "humantime_serde")]
    pub store_sd_dns_interval: Duration,

    #[serde(default = "default_store_refresh_interval", with = "humantime_serde")]
    pub store_refresh_interval: Duration,

    /// Consecutive failed probes after which a store is evicted
    #[serde(default = "default_unreachable_after")]
    pub store_unreachable_after: usize,

    #[serde(default = "get_default_store_port")]
    pub store_default_port: u16,

    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

impl QueryNodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_addresses("stores", &self.stores)?;
        validate_peers(&self.peers)?;
        validate_durations(&[
            ("store_sd_interval", self.store_sd_interval),
            ("store_sd_dns_interval", self.store_sd_dns_interval),
            ("store_refresh_interval", self.store_refresh_interval),
        ])
    }
}

/// Configuration of `meshwatch-rule`
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RuleNodeConfig {
    #[serde(default = "get_default_http_address")]
    pub http_address: SocketAddr,

    /// External labels attached to every outgoing alert
    #[serde(default)]
    pub labels: Labels,

    /// Glob patterns of rule files
    #[serde(default)]
    pub rule_files: Vec<String>,

    #[serde(default = "default_eval_interval", with = "humantime_serde")]
    pub eval_interval: Duration,

    /// Static query peer addresses, optionally `dns+` / `dnssrv+` prefixed
    #[serde(default)]
    pub queries: Vec<String>,

    #[serde(default)]
    pub query_sd_files: Vec<String>,

    #[serde(default = "default_sd_interval", with = "humantime_serde")]
    pub query_sd_interval: Duration,

    #[serde(default = "default_dns_interval", with = "humantime_serde")]
    pub query_sd_dns_interval: Duration,

    #[serde(default = "get_default_query_port")]
    pub query_default_port: u16,

    #[serde(default = "default_query_timeout", with = "humantime_serde")]
    pub query_timeout: Duration,

    /// Notification endpoint URLs, optionally `dns+` / `dnssrv+` prefixed
    #[serde(default)]
    pub alertmanagers: Vec<String>,

    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub alertmanagers_send_timeout: Duration,

    #[serde(default = "get_default_alertmanager_port")]
    pub alertmanager_default_port: u16,

    /// Base URL used to build generator links of outgoing alerts
    #[serde(default = "default_alert_query_url")]
    pub alert_query_url: String,

    /// Labels removed from alerts before they are sent
    #[serde(default)]
    pub alert_label_drop: Vec<String>,

    #[serde(default = "default_queue_capacity")]
    pub alert_queue_capacity: usize,

    #[serde(default = "default_queue_batch_size")]
    pub alert_queue_batch_size: usize,

    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

impl RuleNodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_addresses("queries", &self.queries)?;
        validate_addresses("alertmanagers", &self.alertmanagers)?;
        validate_peers(&self.peers)?;
        validate_durations(&[
            ("eval_interval", self.eval_interval),
            ("query_sd_interval", self.query_sd_interval),
            ("query_sd_dns_interval", self.query_sd_dns_interval),
            ("query_timeout", self.query_timeout),
            ("alertmanagers_send_timeout", self.alertmanagers_send_timeout),
        ])?;
        Url::parse(&self.alert_query_url)
            .with_context(|| format!("invalid alert_query_url {:?}", self.alert_query_url))?;
        if self.alert_queue_capacity == 0 || self.alert_queue_batch_size == 0 {
            bail!("alert queue capacity and batch size must be positive");
        }
        Ok(())
    }
}

fn default_min_time() -> i64 {
    i64::MIN
}

fn default_max_time() -> i64 {
    i64::MAX
}

fn default_sd_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_dns_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_store_refresh_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_unreachable_after() -> usize {
    3
}

fn default_eval_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_alert_query_url() -> String {
    format!("http://localhost:{}", get_default_query_port())
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_queue_batch_size() -> usize {
    100
}

fn validate_addresses(field: &str, addrs: &[String]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for addr in addrs {
        if addr.trim().is_empty() {
            bail!("{field}: empty address");
        }
        if !seen.insert(addr) {
            bail!("{field}: address {addr} is duplicated");
        }
    }
    Ok(())
}

fn validate_durations(durations: &[(&str, Duration)]) -> anyhow::Result<()> {
    for (field, duration) in durations {
        if duration.is_zero() {
            bail!("{field}: must be positive");
        }
    }
    Ok(())
}

fn validate_peers(peers: &[PeerConfig]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for peer in peers {
        if !seen.insert(&peer.id) {
            bail!("peers: id {} is duplicated", peer.id);
        }
    }
    Ok(())
}

pub fn read_config_file<C>(path: impl AsRef<Path>) -> anyhow::Result<C>
where
    C: DeserializeOwned + Debug,
{
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration file {}", path.display()))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse<C: DeserializeOwned>(json: &str) -> C {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_query_node_defaults() {
        let config: QueryNodeConfig = parse("{}");
        assert_eq!(config.http_address, get_default_http_address());
        assert_eq!(config.store_refresh_interval, Duration::from_secs(5));
        assert_eq!(config.store_sd_interval, Duration::from_secs(300));
        assert_eq!(config.store_unreachable_after, 3);
        assert_eq!(config.store_default_port, 10901);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rule_node_defaults() {
        let config: RuleNodeConfig = parse("{}");
        assert_eq!(config.alert_queue_capacity, 10_000);
        assert_eq!(config.alert_queue_batch_size, 100);
        assert_eq!(config.query_timeout, Duration::from_secs(120));
        assert_eq!(config.alertmanagers_send_timeout, Duration::from_secs(10));
        assert_eq!(config.alertmanager_default_port, 9093);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_humantime_durations() {
        let config: RuleNodeConfig = parse(r#"{"eval_interval": "15s", "query_timeout": "1m 30s"}"#);
        assert_eq!(config.eval_interval, Duration::from_secs(15));
        assert_eq!(config.query_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_duplicate_static_address_rejected() {
        let config: QueryNodeConfig = parse(r#"{"stores": ["a:1", "b:1", "a:1"]}"#);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("a:1"));
    }

    #[test]
    fn test_empty_static_address_rejected() {
        let config: RuleNodeConfig = parse(r#"{"alertmanagers": [" "]}"#);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_query_url_rejected() {
        let config: RuleNodeConfig = parse(r#"{"alert_query_url": "not a url"}"#);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let config: RuleNodeConfig = parse(r#"{"eval_interval": "0s"}"#);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("eval_interval"));

        let config: QueryNodeConfig = parse(r#"{"store_refresh_interval": "0s"}"#);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("store_refresh_interval"));

        let config: QueryNodeConfig = parse(r#"{"store_sd_dns_interval": "0ms"}"#);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_peer_config() {
        let config: QueryNodeConfig = parse(
            r#"{"peers": [{"id": "p1", "type": "store", "store_api_address": "10.0.0.1:10901",
                "labels": {"replica": "a"}}]}"#,
        );
        let state = config.peers[0].to_state();
        assert_eq!(state.peer_type, PeerType::Store);
        assert_eq!(state.store_api_addr, "10.0.0.1:10901");
        assert_eq!(state.metadata.labels.get("replica"), Some("a"));
        assert_eq!(state.metadata.min_time, i64::MIN);
    }

    #[test]
    fn test_read_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"rule_files": ["rules/*.yml"]}}"#).unwrap();

        let config: RuleNodeConfig = read_config_file(file.path()).unwrap();
        assert_eq!(config.rule_files, vec!["rules/*.yml".to_string()]);

        let missing = read_config_file::<RuleNodeConfig>("/nonexistent/meshwatch.json");
        assert!(missing.is_err());
    }
}
