//! Gateway egress router - outbound event fan-in
//!
//! A single dedicated thread round-robins over every partition's outbound
//! stream with a bounded fragment budget per poll, resolves each fragment's
//! session id at its type-specific offset, wraps the fragment in a TCP
//! frame and writes it to the client channel.
//!
//! Unroutable fragments (unknown session, inactive channel, unknown type)
//! are dropped; the client is gone or never existed, and the system keeps
//! running. ACK fragments additionally feed the ack latency histogram.

use crate::codec;
use crate::core_types::now_nanos;
use crate::perf::LatencyStats;
use crate::session::SessionRegistry;
use crate::transport::{IdleBackoff, PartitionTransport, ShutdownSignal};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Fragments drained per stream per round-robin pass.
const POLL_BATCH: usize = 32;

/// Egress counters, shared with the metrics reporter.
#[derive(Debug, Default)]
pub struct EgressStats {
    pub events_routed: AtomicU64,
    pub events_dropped: AtomicU64,
}

impl EgressStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Router loop: runs until shutdown is requested and all outbound streams
/// are drained.
pub fn run_egress(
    transport: Arc<PartitionTransport>,
    registry: Arc<SessionRegistry>,
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<EgressStats>,
    ack_latency: Arc<Mutex<LatencyStats>>,
) {
    info!("egress router started");
    let partitions = transport.partitions();
    let mut backoff = IdleBackoff::new();

    loop {
        let mut delivered = 0usize;
        for p in 0..partitions {
            delivered += transport.outbound(p).poll(POLL_BATCH, |fragment| {
                route_fragment(fragment, &registry, &stats, &ack_latency);
            });
        }

        if delivered > 0 {
            backoff.reset();
            continue;
        }
        if shutdown.is_shutdown_requested()
            && (0..partitions).all(|p| transport.outbound(p).is_empty())
        {
            break;
        }
        backoff.idle();
    }
    info!(
        routed = stats.events_routed.load(Ordering::Relaxed),
        dropped = stats.events_dropped.load(Ordering::Relaxed),
        "egress router stopped"
    );
}

fn route_fragment(
    fragment: &[u8],
    registry: &SessionRegistry,
    stats: &EgressStats,
    ack_latency: &Mutex<LatencyStats>,
) {
    if let Some(ts) = codec::peek_ack_ts_nanos(fragment) {
        let now = now_nanos();
        if let Ok(mut lat) = ack_latency.lock() {
            lat.record(now.saturating_sub(ts).max(0) as u64);
        }
    }

    let Some(session_id) = codec::peek_session_id(fragment) else {
        debug!(
            msg_type = fragment.first().copied().unwrap_or(0),
            "unroutable outbound fragment dropped"
        );
        stats.events_dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let Some(session) = registry.get(session_id) else {
        // Session disconnected between match and routing.
        stats.events_dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    if session.channel().write_frame(fragment) {
        stats.events_routed.fetch_add(1, Ordering::Relaxed);
    } else {
        stats.events_dropped.fetch_add(1, Ordering::Relaxed);
    }
}
