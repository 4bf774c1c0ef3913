use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use meshwatch::{
    alert::{AlertmanagerSet, Notifier, Queue, Sender},
    api::{self, RuleApiState},
    config::{RuleNodeConfig, read_config_file},
    discovery::{
        Cache, DnsResolver, FileDiscovery, Membership, Provider, Resolver, file::forward_updates,
        reconcile::QueryDiscovery,
    },
    metrics::Subsystem,
    query::QueryExecutor,
    rules::{LogAppender, Manager, ManagerOptions, Reloader, reload::forward_sighup, reload_channel},
    supervisor::{self, repeat},
    util::get_log_level,
};
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// How often Alertmanager addresses are re-resolved
const ALERTMANAGER_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

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
        ("meshwatch_rule", level),
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

    let config: RuleNodeConfig = read_config_file(&args.file)?;
    config.validate().context("invalid configuration")?;

    run(config).await
}

async fn run(config: RuleNodeConfig) -> anyhow::Result<()> {
    let registry = Registry::new();
    let subsystem = Subsystem::new(&registry, "rule");

    let membership = Arc::new(Membership::with_peers(
        config.peers.iter().map(|peer| (peer.id.clone(), peer.to_state())),
    ));
    let resolver: Arc<dyn Resolver> = Arc::new(DnsResolver::new());
    let provider = Arc::new(Provider::new(
        resolver.clone(),
        Some(config.query_default_port),
        &subsystem,
    )?);
    let cache = Arc::new(Cache::new());

    let peers = Arc::new(QueryDiscovery::new(membership, provider.clone(), &subsystem)?);
    let executor = Arc::new(QueryExecutor::new(peers, config.query_timeout, &subsystem)?);

    let queue = Arc::new(Queue::new(
        config.alert_queue_capacity,
        config.alert_queue_batch_size,
        config.labels.clone(),
        &subsystem,
    )?);
    let query_url = Url::parse(&config.alert_query_url)
        .with_context(|| format!("invalid alert query URL {}", config.alert_query_url))?;
    let notifier = Arc::new(Notifier::new(queue.clone(), query_url));

    let rules_cancel = CancellationToken::new();
    let manager = Arc::new(Manager::new(
        ManagerOptions::new(executor, notifier, Arc::new(LogAppender)),
        rules_cancel.clone(),
    ));
    let (reload, reload_requests) = reload_channel();
    let reloader = Reloader::new(
        manager.clone(),
        config.rule_files.clone(),
        config.eval_interval,
        &subsystem,
    )?;

    let alertmanagers = Arc::new(AlertmanagerSet::new(
        &config.alertmanagers,
        resolver,
        config.alertmanager_default_port,
        &subsystem,
    )?);
    let sender = Arc::new(Sender::new(
        alertmanagers.clone(),
        config.alertmanagers_send_timeout,
        config.alert_label_drop.clone(),
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
        let statics = config.queries.clone();
        group.add_cancellable(
            "dns-discovery",
            cancel.clone(),
            repeat(config.query_sd_dns_interval, cancel, move || {
                let provider = provider.clone();
                let addrs = [statics.clone(), cache.addresses()].concat();
                async move {
                    provider.resolve(&addrs).await;
                    Ok(())
                }
            }),
        );
    }

    if !config.query_sd_files.is_empty() {
        let (updates_tx, updates_rx) = mpsc::channel(1);

        let cancel = CancellationToken::new();
        let file_sd = FileDiscovery::new(
            config.query_sd_files.clone(),
            config.query_sd_interval,
            &subsystem,
        )?;
        group.add_cancellable(
            "file-discovery",
            cancel.clone(),
            file_sd.run(cancel, updates_tx),
        );

        let cancel = CancellationToken::new();
        let provider = provider.clone();
        let statics = config.queries.clone();
        let forward_cache = cache.clone();
        group.add_cancellable(
            "file-discovery-updates",
            cancel.clone(),
            forward_updates(cache.clone(), updates_rx, cancel, move || {
                let provider = provider.clone();
                let addrs = [statics.clone(), forward_cache.addresses()].concat();
                async move { provider.resolve(&addrs).await }
            }),
        );
    }

    {
        let cancel = CancellationToken::new();
        group.add_cancellable(
            "rule-reloader",
            cancel.clone(),
            reloader.run(reload_requests, cancel),
        );

        let cancel = CancellationToken::new();
        group.add_cancellable(
            "sighup",
            cancel.clone(),
            forward_sighup(reload.clone(), cancel),
        );
    }

    {
        let manager = manager.clone();
        group.add(
            "rule-manager",
            {
                let rules_cancel = rules_cancel.clone();
                async move {
                    rules_cancel.cancelled().await;
                    manager.stop();
                    manager.wait().await;
                    Ok(())
                }
            },
            move || rules_cancel.cancel(),
        );
    }

    {
        let cancel = CancellationToken::new();
        let alertmanagers = alertmanagers.clone();
        group.add_cancellable(
            "alertmanager-discovery",
            cancel.clone(),
            repeat(ALERTMANAGER_REFRESH_INTERVAL, cancel, move || {
                let alertmanagers = alertmanagers.clone();
                async move {
                    alertmanagers.update().await;
                    Ok(())
                }
            }),
        );
    }

    {
        let cancel = CancellationToken::new();
        group.add_cancellable("alert-sender", cancel.clone(), async move {
            sender.run(queue, cancel).await;
            Ok(())
        });
    }

    {
        let cancel = CancellationToken::new();
        let router = api::rule_router(RuleApiState {
            registry: registry.clone(),
            manager,
            reload,
        });
        group.add_cancellable("api", cancel.clone(), api::serve(listener, router, cancel));
    }

    info!("starting rule node with {} tasks", group.len());
    group.run().await
}
