//! Discovery pipeline: file SD → cache → DNS provider → reconciled peers
//!
//! These tests verify that:
//! - Targets from discovery files are resolved and reconciled
//! - Gossip peers come first and win over duplicate addresses
//! - A broken discovery file keeps the previously known targets

use std::sync::Arc;
use std::time::Duration;

use meshwatch::Labels;
use meshwatch::discovery::reconcile::{QueryDiscovery, StoreDiscovery};
use meshwatch::discovery::{
    Cache, FileDiscovery, Membership, PeerMetadata, PeerState, PeerType, Provider,
};
use meshwatch::query::PeerAddresses;
use meshwatch::store::StoreSpecSource;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::{TableResolver, metric_value, subsystem, write_file};

fn peer(peer_type: PeerType, store: &str, query: &str) -> PeerState {
    PeerState {
        peer_type,
        store_api_addr: store.to_string(),
        query_api_addr: query.to_string(),
        metadata: PeerMetadata {
            labels: Labels::from_pairs([("region", "eu")]),
            ..PeerMetadata::default()
        },
    }
}

#[tokio::test]
async fn test_store_specs_from_gossip_and_files() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "stores.json",
        r#"[{"targets": ["dns+store.example", "10.0.0.9:10901"], "labels": {"env": "prod"}}]"#,
    );

    let (registry, subsystem) = subsystem("query");
    let mut file_sd = FileDiscovery::new(
        vec![format!("{}/*.json", dir.path().display())],
        Duration::from_secs(60),
        &subsystem,
    )
    .unwrap();
    let cache = Cache::new();
    cache.update(file_sd.refresh());
    assert_eq!(cache.addresses(), vec!["dns+store.example", "10.0.0.9:10901"]);

    let resolver = Arc::new(TableResolver::with(&[(
        "store.example:10901",
        &["10.0.0.1:10901", "10.0.0.2:10901"],
    )]));
    let provider = Arc::new(Provider::new(resolver, Some(10901), &subsystem).unwrap());
    provider.resolve(&cache.addresses()).await;

    let membership = Arc::new(Membership::with_peers([
        ("store-b".to_string(), peer(PeerType::Store, "10.0.0.2:10901", "")),
        ("store-a".to_string(), peer(PeerType::Source, "10.0.0.3:10901", "")),
        ("query-a".to_string(), peer(PeerType::Query, "", "10.0.1.1:10902")),
    ]));
    let discovery = StoreDiscovery::new(membership, provider, &subsystem).unwrap();

    let specs = discovery.specs();
    let addrs: Vec<&str> = specs.iter().map(|spec| spec.addr()).collect();
    assert_eq!(
        addrs,
        vec!["10.0.0.3:10901", "10.0.0.2:10901", "10.0.0.1:10901", "10.0.0.9:10901"]
    );
    assert_eq!(specs[0].peer_id(), Some("store-a"));
    assert_eq!(specs[2].peer_id(), None);
    assert_eq!(
        metric_value(&registry, "meshwatch_query_duplicated_store_address"),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_query_peers_from_gossip_and_static_list() {
    let (registry, subsystem) = subsystem("rule");
    let resolver = Arc::new(TableResolver::default());
    let provider = Arc::new(Provider::new(resolver, Some(10902), &subsystem).unwrap());
    provider
        .resolve(&["10.0.1.2:10902".to_string(), "10.0.1.1:10902".to_string()])
        .await;

    let membership = Arc::new(Membership::with_peers([
        ("query-b".to_string(), peer(PeerType::Query, "", "10.0.1.1:10902")),
        ("store-a".to_string(), peer(PeerType::Store, "10.0.0.1:10901", "")),
    ]));
    let discovery = QueryDiscovery::new(membership.clone(), provider, &subsystem).unwrap();

    assert_eq!(discovery.addresses(), vec!["10.0.1.1:10902", "10.0.1.2:10902"]);
    assert_eq!(
        metric_value(&registry, "meshwatch_rule_duplicated_query_address"),
        Some(1.0)
    );

    membership.leave("query-b");
    assert_eq!(discovery.addresses(), vec!["10.0.1.2:10902", "10.0.1.1:10902"]);
}

#[tokio::test]
async fn test_broken_file_keeps_previous_targets() {
    let dir = tempdir().unwrap();
    let path = write_file(dir.path(), "queries.yml", "- targets: ['10.0.1.1:10902']\n");

    let (_registry, subsystem) = subsystem("rule");
    let mut file_sd = FileDiscovery::new(
        vec![format!("{}/*.yml", dir.path().display())],
        Duration::from_secs(60),
        &subsystem,
    )
    .unwrap();
    let cache = Cache::new();
    cache.update(file_sd.refresh());

    std::fs::write(&path, "- targets: [unterminated\n").unwrap();
    cache.update(file_sd.refresh());
    assert_eq!(cache.addresses(), vec!["10.0.1.1:10902"]);

    std::fs::remove_file(&path).unwrap();
    cache.update(file_sd.refresh());
    assert!(cache.addresses().is_empty());
}
