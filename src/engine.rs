//! Engine partition - single-threaded matching worker
//!
//! One worker per partition, owning the books for every instrument with
//! `instrument_id % partitions == partition_id`, plus that partition's order
//! and level pools. The worker consumes the partition's inbound stream,
//! drives the book, and publishes ACK/FILL/REJECT/CANCEL_ACK events on the
//! outbound stream.
//!
//! # Ordering
//!
//! Within a partition, outbound events are published in production order;
//! the ACK for an order always precedes its FILLs. There is no ordering
//! across partitions.
//!
//! # Failure semantics
//!
//! - Pool exhaustion -> `REJECT(SYSTEM_BUSY)` before matching starts.
//! - Cancel miss -> `REJECT(ORDER_NOT_FOUND)`.
//! - Outbound backpressure -> up to 3 publish attempts, then the event is
//!   dropped and logged. No panics in the hot path.

use crate::codec::{
    self, Ack, CancelAck, CancelRequest, MAX_FRAGMENT_SIZE, NewOrderInternal, Reject,
};
use crate::core_types::{InstrumentId, PartitionId, now_nanos};
use crate::models::RejectReason;
use crate::orderbook::LimitOrderBook;
use crate::pool::{LevelPool, Order, OrderPool};
use crate::transport::{IdleBackoff, PartitionTransport, PublishResult, ShutdownSignal, Stream};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Messages drained from the inbound stream per poll.
const POLL_BATCH: usize = 64;

/// Publish attempts against a backpressured outbound stream before the
/// event is dropped.
const OUTBOUND_PUBLISH_ATTEMPTS: u32 = 3;

/// Per-partition counters, shared with the metrics reporter.
#[derive(Debug, Default)]
pub struct PartitionStats {
    pub orders_processed: AtomicU64,
    pub cancels_processed: AtomicU64,
    pub fills_emitted: AtomicU64,
    pub rejects_emitted: AtomicU64,
    pub outbound_drops: AtomicU64,
}

impl PartitionStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A single engine partition: books, pools and outbound emission.
pub struct EnginePartition {
    partition_id: PartitionId,
    books: FxHashMap<InstrumentId, LimitOrderBook>,
    orders: OrderPool,
    levels: LevelPool,
    stats: Arc<PartitionStats>,
}

impl EnginePartition {
    pub fn new(
        partition_id: PartitionId,
        order_pool_capacity: usize,
        level_pool_capacity: usize,
        stats: Arc<PartitionStats>,
    ) -> Self {
        Self {
            partition_id,
            books: FxHashMap::default(),
            orders: OrderPool::with_capacity(order_pool_capacity),
            levels: LevelPool::with_capacity(level_pool_capacity),
            stats,
        }
    }

    #[inline]
    pub fn stats(&self) -> &Arc<PartitionStats> {
        &self.stats
    }

    /// Dispatch one inbound transport fragment.
    pub fn on_message(&mut self, fragment: &[u8], outbound: &Stream) {
        let Some((&msg_type, payload)) = fragment.split_first() else {
            return;
        };
        match msg_type {
            codec::MSG_NEW_ORDER => match codec::decode_new_order_internal(payload) {
                Ok(msg) => self.handle_new_order(&msg, outbound),
                Err(e) => warn!(partition = self.partition_id, error = %e, "dropping bad NEW_ORDER"),
            },
            codec::MSG_CANCEL_REQUEST => match codec::decode_cancel_request(payload) {
                Ok(msg) => self.handle_cancel(&msg, outbound),
                Err(e) => warn!(partition = self.partition_id, error = %e, "dropping bad CANCEL_REQUEST"),
            },
            other => {
                debug!(
                    partition = self.partition_id,
                    msg_type = other,
                    "discarding unexpected inbound message"
                );
            }
        }
    }

    fn handle_new_order(&mut self, msg: &NewOrderInternal, outbound: &Stream) {
        PartitionStats::incr(&self.stats.orders_processed);

        // Exhaustion is checked up front so a rest mid-match cannot fail:
        // matching only ever releases records.
        if self.orders.available() == 0 || self.levels.available() == 0 {
            self.emit_reject(
                outbound,
                msg.session_id,
                msg.client_seq_no,
                RejectReason::SystemBusy,
            );
            return;
        }

        let ts_nanos = now_nanos();
        Self::publish(
            outbound,
            &encode_to_frame(|buf| {
                codec::encode_ack(
                    buf,
                    &Ack {
                        internal_order_id: msg.internal_order_id,
                        client_seq_no: msg.client_seq_no,
                        session_id: msg.session_id,
                        instrument_id: msg.instrument_id,
                        ts_nanos,
                    },
                )
            }),
            &self.stats,
        );

        let order = Order {
            internal_order_id: msg.internal_order_id,
            session_id: msg.session_id,
            client_seq_no: msg.client_seq_no,
            instrument_id: msg.instrument_id,
            side: msg.side,
            tif: msg.tif,
            price: msg.price,
            qty: msg.qty,
            orig_qty: msg.qty,
            recv_ts_nanos: msg.recv_ts_nanos,
            ..Order::default()
        };

        let book = self.books.entry(msg.instrument_id).or_default();
        let stats = &self.stats;
        book.add_order(order, &mut self.orders, &mut self.levels, &mut |exec| {
            let ts = now_nanos();
            // Two FILLs per execution: one addressed to each party, each
            // carrying that party's own side and leaves.
            Self::publish(
                outbound,
                &encode_to_frame(|buf| {
                    codec::encode_fill(
                        buf,
                        &codec::Fill {
                            internal_order_id: exec.aggressor_id,
                            session_id: exec.aggressor_session,
                            instrument_id: exec.instrument_id,
                            side: exec.aggressor_side,
                            fill_price: exec.price,
                            fill_qty: exec.qty,
                            leaves_qty: exec.aggressor_leaves,
                            ts_nanos: ts,
                        },
                    )
                }),
                stats,
            );
            Self::publish(
                outbound,
                &encode_to_frame(|buf| {
                    codec::encode_fill(
                        buf,
                        &codec::Fill {
                            internal_order_id: exec.passive_id,
                            session_id: exec.passive_session,
                            instrument_id: exec.instrument_id,
                            side: exec.aggressor_side.opposite(),
                            fill_price: exec.price,
                            fill_qty: exec.qty,
                            leaves_qty: exec.passive_leaves,
                            ts_nanos: ts,
                        },
                    )
                }),
                stats,
            );
            stats.fills_emitted.fetch_add(2, Ordering::Relaxed);
        });
    }

    fn handle_cancel(&mut self, msg: &CancelRequest, outbound: &Stream) {
        PartitionStats::incr(&self.stats.cancels_processed);

        // The cancel carries the instrument id, so the owning book is
        // addressed directly instead of scanning the partition.
        let cancelled = self
            .books
            .get_mut(&msg.instrument_id)
            .map(|book| book.cancel(msg.internal_order_id, &mut self.orders, &mut self.levels))
            .unwrap_or(false);

        if cancelled {
            Self::publish(
                outbound,
                &encode_to_frame(|buf| {
                    codec::encode_cancel_ack(
                        buf,
                        &CancelAck {
                            internal_order_id: msg.internal_order_id,
                            session_id: msg.session_id,
                        },
                    )
                }),
                &self.stats,
            );
        } else {
            self.emit_reject(
                outbound,
                msg.session_id,
                msg.client_seq_no,
                RejectReason::OrderNotFound,
            );
        }
    }

    fn emit_reject(
        &self,
        outbound: &Stream,
        session_id: u32,
        client_seq_no: u64,
        reason: RejectReason,
    ) {
        PartitionStats::incr(&self.stats.rejects_emitted);
        Self::publish(
            outbound,
            &encode_to_frame(|buf| {
                codec::encode_reject(
                    buf,
                    &Reject {
                        session_id,
                        client_seq_no,
                        reason,
                    },
                )
            }),
            &self.stats,
        );
    }

    /// Publish with bounded retry; beyond that the event is dropped and
    /// logged (accepted risk, documented).
    fn publish(outbound: &Stream, fragment: &[u8], stats: &PartitionStats) {
        for _ in 0..OUTBOUND_PUBLISH_ATTEMPTS {
            match outbound.publish(fragment) {
                PublishResult::Ok => return,
                PublishResult::Backpressured | PublishResult::AdminBlocked => {}
                PublishResult::Failed => break,
            }
        }
        PartitionStats::incr(&stats.outbound_drops);
        warn!(
            stream = outbound.stream_id(),
            msg_type = fragment.first().copied().unwrap_or(0),
            "outbound event dropped after retries"
        );
    }
}

/// Encode one message into a stack frame and hand back its bytes.
#[inline]
fn encode_to_frame(encode: impl FnOnce(&mut [u8]) -> usize) -> FrameBytes {
    let mut buf = [0u8; MAX_FRAGMENT_SIZE];
    let len = encode(&mut buf);
    FrameBytes { buf, len }
}

struct FrameBytes {
    buf: [u8; MAX_FRAGMENT_SIZE],
    len: usize,
}

impl std::ops::Deref for FrameBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Partition worker loop: poll inbound, dispatch, spin-then-yield when
/// idle, drain on shutdown.
pub fn run_partition(
    mut engine: EnginePartition,
    transport: Arc<PartitionTransport>,
    shutdown: Arc<ShutdownSignal>,
) {
    let partition_id = engine.partition_id;
    let inbound = Arc::clone(transport.inbound(partition_id));
    let outbound = Arc::clone(transport.outbound(partition_id));
    info!(partition = partition_id, "engine partition started");

    let mut backoff = IdleBackoff::new();
    loop {
        let delivered = inbound.poll(POLL_BATCH, |fragment| {
            engine.on_message(fragment, &outbound);
        });

        if delivered > 0 {
            backoff.reset();
            continue;
        }
        if shutdown.is_shutdown_requested() && inbound.is_empty() {
            break;
        }
        backoff.idle();
    }

    info!(
        partition = partition_id,
        orders = engine.stats.orders_processed.load(Ordering::Relaxed),
        fills = engine.stats.fills_emitted.load(Ordering::Relaxed),
        "engine partition stopped"
    );
}
