//! matchgate - process bootstrap
//!
//! Boot order:
//!
//! ```text
//! [1] Config  ->  [2] Logging  ->  [3] Transport  ->  [4] Engines
//!             ->  [5] Gateway + egress  ->  [6] Metrics loop
//! ```
//!
//! Shutdown is cooperative: every worker polls a shared flag and exits at
//! its next loop iteration. Exit code is 0 on clean shutdown, nonzero on
//! bootstrap failure (via the `Err` return from `main`).

use matchgate::config::AppConfig;
use matchgate::egress::{self, EgressStats};
use matchgate::engine::{self, EnginePartition, PartitionStats};
use matchgate::gateway::{self, GatewayStats};
use matchgate::logging;
use matchgate::perf::LatencyStats;
use matchgate::session::SessionRegistry;
use matchgate::transport::{PartitionTransport, ShutdownSignal};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(Path::new(&path))?,
        None => AppConfig::default(),
    };
    config.validate()?;

    let _log_guard = logging::init_logging(&config);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        partitions = config.partitions,
        "matchgate starting"
    );

    let shutdown = Arc::new(ShutdownSignal::new());
    let transport = Arc::new(PartitionTransport::new(
        config.partitions,
        config.inbound_stream_base,
        config.outbound_stream_base,
        config.backpressure_queue_limit,
    ));

    let mut threads = Vec::new();

    // Engine partitions
    let mut partition_stats: Vec<Arc<PartitionStats>> = Vec::new();
    if config.run_engine {
        for p in 0..config.partitions {
            let stats = Arc::new(PartitionStats::new());
            partition_stats.push(Arc::clone(&stats));
            let partition = EnginePartition::new(
                p,
                config.order_pool_capacity,
                config.level_pool_capacity,
                stats,
            );
            let transport = Arc::clone(&transport);
            let shutdown = Arc::clone(&shutdown);
            threads.push(
                thread::Builder::new()
                    .name(format!("engine-{p}"))
                    .spawn(move || engine::run_partition(partition, transport, shutdown))?,
            );
        }
    }

    // Gateway ingress + egress router
    let registry = Arc::new(SessionRegistry::new());
    let gateway_stats = Arc::new(GatewayStats::new());
    let egress_stats = Arc::new(EgressStats::new());
    let ack_latency = Arc::new(Mutex::new(LatencyStats::new(10, 10_000)));

    let gateway_handle = if config.run_gateway {
        let handle = gateway::spawn_gateway(
            &config,
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&shutdown),
            Arc::clone(&gateway_stats),
        )?;

        let transport = Arc::clone(&transport);
        let registry = Arc::clone(&registry);
        let shutdown_egress = Arc::clone(&shutdown);
        let egress_stats = Arc::clone(&egress_stats);
        let ack_latency = Arc::clone(&ack_latency);
        threads.push(thread::Builder::new().name("egress".into()).spawn(move || {
            egress::run_egress(transport, registry, shutdown_egress, egress_stats, ack_latency)
        })?);

        Some(handle)
    } else {
        None
    };

    // Metrics reporter
    if config.metrics_interval_secs > 0 {
        let shutdown = Arc::clone(&shutdown);
        let interval = Duration::from_secs(config.metrics_interval_secs);
        let registry = Arc::clone(&registry);
        let gateway_stats = Arc::clone(&gateway_stats);
        let egress_stats = Arc::clone(&egress_stats);
        let ack_latency = Arc::clone(&ack_latency);
        let partition_stats = partition_stats.clone();
        threads.push(thread::Builder::new().name("metrics".into()).spawn(move || {
            metrics_loop(
                shutdown,
                interval,
                registry,
                gateway_stats,
                egress_stats,
                ack_latency,
                partition_stats,
            )
        })?);
    }

    // The accept thread is the process anchor: when it exits (listener
    // failure or an external shutdown request), everything else winds down.
    if let Some(handle) = gateway_handle {
        handle.join();
        shutdown.request_shutdown();
    } else {
        while !shutdown.is_shutdown_requested() {
            thread::sleep(Duration::from_millis(100));
        }
    }

    for t in threads {
        if t.join().is_err() {
            warn!("worker thread panicked during shutdown");
        }
    }
    info!("matchgate stopped");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn metrics_loop(
    shutdown: Arc<ShutdownSignal>,
    interval: Duration,
    registry: Arc<SessionRegistry>,
    gateway_stats: Arc<GatewayStats>,
    egress_stats: Arc<EgressStats>,
    ack_latency: Arc<Mutex<LatencyStats>>,
    partition_stats: Vec<Arc<PartitionStats>>,
) {
    let tick = Duration::from_millis(100);
    let mut elapsed = Duration::ZERO;
    loop {
        if shutdown.is_shutdown_requested() {
            break;
        }
        thread::sleep(tick);
        elapsed += tick;
        if elapsed < interval {
            continue;
        }
        elapsed = Duration::ZERO;

        let (orders, cancels, fills, engine_rejects, drops) = partition_stats.iter().fold(
            (0u64, 0u64, 0u64, 0u64, 0u64),
            |(o, c, f, r, d), s| {
                (
                    o + s.orders_processed.load(Ordering::Relaxed),
                    c + s.cancels_processed.load(Ordering::Relaxed),
                    f + s.fills_emitted.load(Ordering::Relaxed),
                    r + s.rejects_emitted.load(Ordering::Relaxed),
                    d + s.outbound_drops.load(Ordering::Relaxed),
                )
            },
        );
        info!(
            sessions = registry.len(),
            orders_in = gateway_stats.orders_in.load(Ordering::Relaxed),
            cancels_in = gateway_stats.cancels_in.load(Ordering::Relaxed),
            gateway_rejects = gateway_stats.rejects_emitted.load(Ordering::Relaxed),
            engine_orders = orders,
            engine_cancels = cancels,
            fills,
            engine_rejects,
            outbound_drops = drops,
            routed = egress_stats.events_routed.load(Ordering::Relaxed),
            "stats"
        );
        if let Ok(lat) = ack_latency.lock()
            && let Some(summary) = lat.summary()
        {
            info!(ack_latency = %summary, "latency");
        }
    }
}
