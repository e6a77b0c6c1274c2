//! Switchyard gateway server.
//!
//! Presents a fixed set of virtual buckets over the S3 wire protocol and
//! spreads their objects across a pool of real S3 backends.
//!
//! # Usage
//!
//! ```text
//! switchyard-server --config config/config.yaml
//! ```
//!
//! Exits non-zero when the configuration cannot be loaded, the database
//! cannot be opened, a backend client cannot be constructed, or the listen
//! socket cannot be bound. Configuration changes after startup are applied
//! live and never abort the process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use switchyard_core::balancer::Balancer;
use switchyard_core::config::Config;
use switchyard_core::health::{HealthConfig, HealthMonitor, MonitorHandle};
use switchyard_core::manager::ConfigManager;
use switchyard_core::metrics::Metrics;
use switchyard_core::reporter::{CounterStore, Reporter};
use switchyard_core::{Registry, stats::{StatsConfig, StatsMonitor}};
use switchyard_http::{Gateway, GatewayService};
use switchyard_store::{MonthlyArchiver, Store};

/// Deadline for draining in-flight requests on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);
/// Cadence of the upload-session garbage collector.
const SESSION_GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser, Debug)]
#[command(author, version, about = "S3-compatible balancing gateway")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config/config.yaml")]
    config: PathBuf,
}

/// The pair of monitor handles currently running.
struct Monitors {
    health: MonitorHandle,
    stats: MonitorHandle,
}

fn start_monitors(registry: &Arc<Registry>, reporter: &Arc<Reporter>, config: &Config) -> Monitors {
    let health = HealthMonitor::new(
        Arc::clone(registry),
        Arc::clone(reporter),
        HealthConfig {
            period: config.balancer.health_period(),
            ..HealthConfig::default()
        },
    )
    .spawn();

    let stats = StatsMonitor::new(
        Arc::clone(registry),
        Arc::clone(reporter),
        StatsConfig {
            period: config.balancer.stats_period(),
            ..StatsConfig::default()
        },
    )
    .spawn();

    Monitors { health, stats }
}

/// Apply a configuration change per the reconfiguration contract: a
/// significant diff (backend identities or credentials) rebuilds the backend
/// table atomically and reinitializes the monitors; an insignificant one
/// only restarts the monitors with the new intervals. Strategy, retry
/// policy, and handler settings swap independently either way.
async fn reconfigure(
    previous: &Arc<Mutex<Arc<Config>>>,
    registry: &Arc<Registry>,
    reporter: &Arc<Reporter>,
    balancer: &Arc<Balancer>,
    gateway: &Arc<Gateway>,
    monitors: &Arc<Mutex<Option<Monitors>>>,
    new_config: Arc<Config>,
) {
    info!("applying configuration change");
    let mut applied = new_config;

    {
        let mut previous = previous.lock().await;
        let rebuild = previous.requires_backend_rebuild(&applied);

        if let Some(running) = monitors.lock().await.take() {
            running.health.stop().await;
            running.stats.stop().await;
        }

        if rebuild {
            info!("backend configuration changed significantly, rebuilding registry");
            match registry.rebuild(&applied) {
                Ok(()) => {
                    reporter.load_persisted_counts().await;
                }
                Err(e) => {
                    // The registry kept the old table; keep serving with the
                    // previous backend set and its intervals.
                    error!(error = %e, "backend rebuild failed, keeping previous backends");
                    applied = Arc::clone(&previous);
                }
            }
        }

        *monitors.lock().await = Some(start_monitors(registry, reporter, &applied));
        *previous = Arc::clone(&applied);
    }

    if let Err(e) = balancer.set_strategy(&applied.balancer.strategy) {
        warn!(error = %e, "failed to update balancer strategy");
    }
    balancer.set_retry_policy(&applied.balancer);
    gateway.update_settings(&applied);

    info!("configuration change applied");
}

/// Accept loop with graceful drain on shutdown signal.
async fn serve(
    listener: TcpListener,
    service: GatewayService,
    read_timeout: Duration,
) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let mut http = HttpConnBuilder::new(TokioExecutor::new());
    http.http1()
        .timer(hyper_util::rt::TokioTimer::new())
        .header_read_timeout(read_timeout);

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = service.clone();
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        warn!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => break,
        }
    }

    tokio::select! {
        () = graceful.shutdown() => info!("all connections drained"),
        () = tokio::time::sleep(SHUTDOWN_DEADLINE) => {
            warn!("shutdown deadline reached, dropping remaining connections");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args = Args::parse();

    let config_manager = ConfigManager::new(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;
    let config = config_manager.current();

    info!(
        strategy = %config.balancer.strategy,
        buckets = config.buckets.len(),
        proxy_mode = config.s3api.proxy_mode,
        "starting switchyard gateway"
    );

    let store = Arc::new(
        Store::connect(&config.database)
            .await
            .context("failed to open database")?,
    );

    let metrics = Arc::new(Metrics::new());
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let registry = Arc::new(
        Registry::new(&config, http.clone()).context("failed to construct backend clients")?,
    );

    let counters: Arc<dyn CounterStore> = Arc::clone(&store) as Arc<dyn CounterStore>;
    let reporter = Arc::new(Reporter::new(
        Arc::clone(&registry),
        Arc::clone(&metrics),
        Some(counters),
    ));
    reporter.load_persisted_counts().await;

    let balancer = Arc::new(
        Balancer::new(
            Arc::clone(&registry),
            &config.balancer,
            Some(Arc::clone(&metrics)),
        )
        .context("failed to construct balancer")?,
    );

    let monitors = Arc::new(Mutex::new(Some(start_monitors(
        &registry, &reporter, &config,
    ))));

    let gateway = Arc::new(Gateway::new(
        Arc::clone(&registry),
        Arc::clone(&balancer),
        Arc::clone(&store),
        Arc::clone(&reporter),
        Arc::clone(&metrics),
        Arc::clone(&config_manager),
        http,
    ));

    // Live reconfiguration: every successful reload or admin update lands
    // here.
    {
        let previous = Arc::new(Mutex::new(Arc::clone(&config)));
        let registry = Arc::clone(&registry);
        let reporter = Arc::clone(&reporter);
        let balancer = Arc::clone(&balancer);
        let gateway = Arc::clone(&gateway);
        let monitors = Arc::clone(&monitors);

        config_manager.on_change(Box::new(move |new_config| {
            let previous = Arc::clone(&previous);
            let registry = Arc::clone(&registry);
            let reporter = Arc::clone(&reporter);
            let balancer = Arc::clone(&balancer);
            let gateway = Arc::clone(&gateway);
            let monitors = Arc::clone(&monitors);
            tokio::spawn(async move {
                reconfigure(
                    &previous, &registry, &reporter, &balancer, &gateway, &monitors, new_config,
                )
                .await;
            });
        }));
    }
    let watcher = config_manager.spawn_watchers();

    // Hourly upload-session garbage collection.
    let (gc_stop_tx, mut gc_stop_rx) = watch::channel(false);
    let gc_task = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_GC_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // skip the immediate tick
            loop {
                tokio::select! {
                    _ = interval.tick() => gateway.cleanup_expired_uploads().await,
                    _ = gc_stop_rx.changed() => return,
                }
            }
        })
    };

    // Hourly monthly-stats archival.
    let archiver = MonthlyArchiver::new(Arc::clone(&store)).spawn();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.server.host, config.server.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    serve(
        listener,
        GatewayService::new(gateway),
        Duration::from_secs(config.server.read_timeout),
    )
    .await?;

    // Orderly teardown: monitors, background tasks, watcher, store.
    if let Some(running) = monitors.lock().await.take() {
        running.health.stop().await;
        running.stats.stop().await;
    }
    let _ = gc_stop_tx.send(true);
    let _ = gc_task.await;
    archiver.stop().await;
    watcher.stop().await;
    store.close().await;

    info!("shutdown complete");
    Ok(())
}
