//! Partition transport - per-partition message streams between gateway and
//! engine
//!
//! For each partition there is one inbound stream (gateway -> engine) and
//! one outbound stream (engine -> gateway), each a fixed-capacity lock-free
//! ring (`crossbeam_queue::ArrayQueue`) of inline frames.
//!
//! # Key design
//!
//! - **SPSC per stream**: ingress workers publish inbound (serialised by a
//!   per-stream mutex-free copy-in; frames are self-contained values), the
//!   owning engine partition is the only consumer; the reverse holds for
//!   outbound streams and the egress router.
//! - **Backpressure, not blocking**: a full ring returns
//!   [`PublishResult::Backpressured`]; the publisher decides whether to
//!   retry, drop, or reject upstream. Nothing in the hot path sleeps.
//! - **Per-stream FIFO**: `ArrayQueue` preserves publish order; messages are
//!   never fragmented (the largest internal message is 63 bytes).
//!
//! Stream ids follow the configured bases: inbound `inbound_base + p`,
//! outbound `outbound_base + p`.

use crate::codec::MAX_FRAGMENT_SIZE;
use crate::core_types::{InstrumentId, PartitionId};
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Inline message frame: length-tagged copy of one fragment.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    len: u8,
    data: [u8; MAX_FRAGMENT_SIZE],
}

impl Frame {
    /// Copy a fragment into an inline frame. Fragments longer than
    /// [`MAX_FRAGMENT_SIZE`] do not exist in this protocol.
    #[inline]
    pub fn from_slice(fragment: &[u8]) -> Self {
        let mut data = [0u8; MAX_FRAGMENT_SIZE];
        data[..fragment.len()].copy_from_slice(fragment);
        Self {
            len: fragment.len() as u8,
            data,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Outcome of a publish attempt. `Backpressured` and `AdminBlocked` are
/// transient; `Failed` is not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishResult {
    Ok,
    Backpressured,
    AdminBlocked,
    Failed,
}

/// One unidirectional FIFO message stream.
#[derive(Debug)]
pub struct Stream {
    stream_id: u32,
    ring: ArrayQueue<Frame>,
    open: AtomicBool,
}

impl Stream {
    pub fn new(stream_id: u32, capacity: usize) -> Self {
        Self {
            stream_id,
            ring: ArrayQueue::new(capacity),
            open: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Publish one complete message.
    #[inline]
    pub fn publish(&self, fragment: &[u8]) -> PublishResult {
        if fragment.is_empty() || fragment.len() > MAX_FRAGMENT_SIZE {
            return PublishResult::Failed;
        }
        if !self.open.load(Ordering::Acquire) {
            return PublishResult::AdminBlocked;
        }
        match self.ring.push(Frame::from_slice(fragment)) {
            Ok(()) => PublishResult::Ok,
            Err(_) => PublishResult::Backpressured,
        }
    }

    /// Deliver up to `max_fragments` complete messages to `handler`.
    /// Returns the number delivered.
    #[inline]
    pub fn poll(&self, max_fragments: usize, mut handler: impl FnMut(&[u8])) -> usize {
        let mut delivered = 0;
        while delivered < max_fragments {
            match self.ring.pop() {
                Some(frame) => {
                    handler(frame.as_slice());
                    delivered += 1;
                }
                None => break,
            }
        }
        delivered
    }

    /// Administratively close the stream; subsequent publishes see
    /// `AdminBlocked`. Already-queued messages remain pollable.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// The full set of per-partition stream pairs.
#[derive(Debug)]
pub struct PartitionTransport {
    inbound: Vec<Arc<Stream>>,
    outbound: Vec<Arc<Stream>>,
}

impl PartitionTransport {
    pub fn new(
        partitions: u32,
        inbound_base: u32,
        outbound_base: u32,
        queue_capacity: usize,
    ) -> Self {
        let inbound = (0..partitions)
            .map(|p| Arc::new(Stream::new(inbound_base + p, queue_capacity)))
            .collect();
        let outbound = (0..partitions)
            .map(|p| Arc::new(Stream::new(outbound_base + p, queue_capacity)))
            .collect();
        Self { inbound, outbound }
    }

    #[inline]
    pub fn partitions(&self) -> u32 {
        self.inbound.len() as u32
    }

    #[inline]
    pub fn inbound(&self, partition: PartitionId) -> &Arc<Stream> {
        &self.inbound[partition as usize]
    }

    #[inline]
    pub fn outbound(&self, partition: PartitionId) -> &Arc<Stream> {
        &self.outbound[partition as usize]
    }
}

/// Partition owning an instrument: `instrument_id % partitions`. The only
/// routing key in the system.
#[inline]
pub fn partition_of(instrument_id: InstrumentId, partitions: u32) -> PartitionId {
    instrument_id % partitions
}

// ============================================================
// SHUTDOWN
// ============================================================

/// Cooperative shutdown flag shared by every poll loop.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    requested: AtomicBool,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Spin-then-yield pacing for idle poll loops: busy-spin briefly to stay hot
/// under load, yield to the scheduler once genuinely idle.
#[derive(Debug, Default)]
pub struct IdleBackoff {
    spins: u32,
}

impl IdleBackoff {
    const SPIN_LIMIT: u32 = 100;

    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn idle(&mut self) {
        self.spins += 1;
        if self.spins > Self::SPIN_LIMIT {
            std::thread::yield_now();
            self.spins = 0;
        } else {
            std::hint::spin_loop();
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.spins = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_poll_fifo() {
        let stream = Stream::new(1000, 8);
        assert_eq!(stream.publish(&[1, 10, 11]), PublishResult::Ok);
        assert_eq!(stream.publish(&[2, 20]), PublishResult::Ok);
        assert_eq!(stream.publish(&[3]), PublishResult::Ok);

        let mut seen: Vec<Vec<u8>> = Vec::new();
        let n = stream.poll(16, |bytes| seen.push(bytes.to_vec()));
        assert_eq!(n, 3);
        assert_eq!(seen, vec![vec![1, 10, 11], vec![2, 20], vec![3]]);
    }

    #[test]
    fn test_poll_respects_fragment_budget() {
        let stream = Stream::new(1000, 8);
        for i in 0..5u8 {
            stream.publish(&[i]);
        }
        let mut count = 0;
        assert_eq!(stream.poll(2, |_| count += 1), 2);
        assert_eq!(count, 2);
        assert_eq!(stream.poll(16, |_| {}), 3);
    }

    #[test]
    fn test_backpressure_when_full() {
        let stream = Stream::new(1000, 2);
        assert_eq!(stream.publish(&[1]), PublishResult::Ok);
        assert_eq!(stream.publish(&[2]), PublishResult::Ok);
        assert_eq!(stream.publish(&[3]), PublishResult::Backpressured);

        stream.poll(1, |_| {});
        assert_eq!(stream.publish(&[3]), PublishResult::Ok);
    }

    #[test]
    fn test_admin_blocked_after_close() {
        let stream = Stream::new(1000, 4);
        stream.publish(&[1]);
        stream.close();
        assert_eq!(stream.publish(&[2]), PublishResult::AdminBlocked);
        // Queued messages still drain.
        assert_eq!(stream.poll(16, |_| {}), 1);
    }

    #[test]
    fn test_oversize_fragment_fails() {
        let stream = Stream::new(1000, 4);
        let big = [0u8; MAX_FRAGMENT_SIZE + 1];
        assert_eq!(stream.publish(&big), PublishResult::Failed);
        assert_eq!(stream.publish(&[]), PublishResult::Failed);
    }

    #[test]
    fn test_transport_stream_ids() {
        let t = PartitionTransport::new(4, 1000, 2000, 8);
        assert_eq!(t.partitions(), 4);
        assert_eq!(t.inbound(0).stream_id(), 1000);
        assert_eq!(t.inbound(3).stream_id(), 1003);
        assert_eq!(t.outbound(0).stream_id(), 2000);
        assert_eq!(t.outbound(3).stream_id(), 2003);
    }

    #[test]
    fn test_partition_of() {
        assert_eq!(partition_of(0, 32), 0);
        assert_eq!(partition_of(33, 32), 1);
        assert_eq!(partition_of(31, 32), 31);
    }

    #[test]
    fn test_shutdown_signal() {
        let s = ShutdownSignal::new();
        assert!(!s.is_shutdown_requested());
        s.request_shutdown();
        assert!(s.is_shutdown_requested());
    }
}
