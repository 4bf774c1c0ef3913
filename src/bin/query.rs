use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use meshwatch::{
    api::{self, QueryApiState},
    config::{QueryNodeConfig, read_config_file},
    discovery::{
        Cache, DnsResolver, FileDiscovery, Membership, Provider, Resolver, file::forward_updates,
        reconcile::StoreDiscovery,
    },
    metrics::Subsystem,
    store::{HttpStoreDialer, StoreSet},
    supervisor::{self, repeat},
    util::get_log_level,
};
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let level = LevelFilter::from_level(get_log_level());
    let filter = filter::Targets::new().with_targets(vec![
        ("meshwatch", level),
        ("meshwatch_query", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config: QueryNodeConfig = read_config_file(&args.file)?;
    config.validate().context("invalid configuration")?;

    run(config).await
}

async fn run(config: QueryNodeConfig) -> anyhow::Result<()> {
    let registry = Registry::new();
    let subsystem = Subsystem::new(&registry, "query");

    let membership = Arc::new(Membership::with_peers(
        config.peers.iter().map(|peer| (peer.id.clone(), peer.to_state())),
    ));
    let resolver: Arc<dyn Resolver> = Arc::new(DnsResolver::new());
    let provider = Arc::new(Provider::new(
        resolver,
        Some(config.store_default_port),
        &subsystem,
    )?);
    let cache = Arc::new(Cache::new());

    let discovery = Arc::new(StoreDiscovery::new(membership, provider.clone(), &subsystem)?);
    let dialer = Arc::new(HttpStoreDialer::new(config.store_refresh_interval)?);
    let stores = Arc::new(StoreSet::new(
        discovery,
        dialer,
        config.store_unreachable_after,
        config.store_refresh_interval,
        &subsystem,
    )?);

    let listener = TcpListener::bind(config.http_address)
        .await
        .with_context(|| format!("binding {}", config.http_address))?;

    let mut group = supervisor::Group::new();

    {
        let cancel = CancellationToken::new();
        group.add_cancellable("signals", cancel.clone(), async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = supervisor::wait_for_shutdown_signal() => {
                    result?;
                    info!("received shutdown signal");
                }
            }
            Ok(())
        });
    }

    {
        let cancel = CancellationToken::new();
        let provider = provider.clone();
        let cache = cache.clone();
        let statics = config.stores.clone();
        group.add_cancellable(
            "dns-discovery",
            cancel.clone(),
            repeat(config.store_sd_dns_interval, cancel, move || {
                let provider = provider.clone();
                let addrs = [statics.clone(), cache.addresses()].concat();
                async move {
                    provider.resolve(&addrs).await;
                    Ok(())
                }
            }),
        );
    }

    if !config.store_sd_files.is_empty() {
        let (updates_tx, updates_rx) = mpsc::channel(1);

        let cancel = CancellationToken::new();
        let file_sd = FileDiscovery::new(
            config.store_sd_files.clone(),
            config.store_sd_interval,
            &subsystem,
        )?;
        group.add_cancellable(
            "file-discovery",
            cancel.clone(),
            file_sd.run(cancel, updates_tx),
        );

        let cancel = CancellationToken::new();
        let provider = provider.clone();
        let stores = stores.clone();
        let statics = config.stores.clone();
        let forward_cache = cache.clone();
        group.add_cancellable(
            "file-discovery-updates",
            cancel.clone(),
            forward_updates(cache.clone(), updates_rx, cancel, move || {
                let provider = provider.clone();
                let stores = stores.clone();
                let addrs = [statics.clone(), forward_cache.addresses()].concat();
                async move {
                    provider.resolve(&addrs).await;
                    stores.update().await;
                }
            }),
        );
    }

    {
        let cancel = CancellationToken::new();
        let stores = stores.clone();
        let interval = config.store_refresh_interval;
        group.add_cancellable("store-set", cancel.clone(), async move {
            stores.run(interval, cancel).await
        });
    }

    {
        let cancel = CancellationToken::new();
        let router = api::query_router(QueryApiState {
            registry: registry.clone(),
            stores,
        });
        group.add_cancellable("api", cancel.clone(), api::serve(listener, router, cancel));
    }

    info!("starting query node with {} tasks", group.len());
    group.run().await
}
