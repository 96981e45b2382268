//! Fixed-capacity object pools for order and price-level records
//!
//! The matcher's records live in contiguous arenas and link to each other by
//! `u32` slot index instead of pointer. Intrusive `prev`/`next` links and the
//! order -> level back-reference are plain indices with a `NIL` sentinel, so
//! O(1) unlink on cancel needs no auxiliary maps and no reference cycles.
//!
//! Pools are LIFO free-lists over the arena. `alloc` hands out a cleared
//! slot or signals exhaustion (the engine turns that into a SYSTEM_BUSY
//! reject); `free` clears the record and returns the slot. Each pool is
//! owned by exactly one engine partition and never crosses threads.

use crate::core_types::{InstrumentId, OrderId, SeqNo, SessionId};
use crate::models::{Side, TimeInForce};

/// Null slot index.
pub const NIL: u32 = u32::MAX;

// ============================================================
// RECORDS
// ============================================================

/// A resting order. Engine-owned, pooled.
///
/// Invariants while resting: `0 < qty <= orig_qty`, `level` names exactly
/// one live price level, and the id appears exactly once in the owning
/// book's order index.
#[derive(Debug, Clone, Copy)]
pub struct Order {
    pub internal_order_id: OrderId,
    pub session_id: SessionId,
    pub client_seq_no: SeqNo,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub tif: TimeInForce,
    /// Scaled price (decimal * 10^6).
    pub price: i64,
    /// Remaining quantity.
    pub qty: u64,
    pub orig_qty: u64,
    pub recv_ts_nanos: i64,
    /// Intrusive FIFO links within the owning price level.
    pub prev: u32,
    pub next: u32,
    /// Back-reference to the owning level's slot.
    pub level: u32,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            internal_order_id: 0,
            session_id: 0,
            client_seq_no: 0,
            instrument_id: 0,
            side: Side::Buy,
            tif: TimeInForce::Gtc,
            price: 0,
            qty: 0,
            orig_qty: 0,
            recv_ts_nanos: 0,
            prev: NIL,
            next: NIL,
            level: NIL,
        }
    }
}

/// One price level: the endpoints of an intrusive FIFO of orders resting at
/// `price`, plus the incrementally maintained quantity sum.
///
/// `total_qty == sum of qty over the linked orders`;
/// `head == NIL <=> tail == NIL <=> empty`.
#[derive(Debug, Clone, Copy)]
pub struct PriceLevel {
    pub price: i64,
    pub total_qty: u64,
    pub head: u32,
    pub tail: u32,
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self {
            price: 0,
            total_qty: 0,
            head: NIL,
            tail: NIL,
        }
    }
}

// ============================================================
// POOLS
// ============================================================

/// Fixed-capacity LIFO pool over a contiguous arena of `T`.
///
/// | Operation | Time |
/// |-----------|------|
/// | alloc     | O(1) |
/// | free      | O(1) |
/// | get/get_mut | O(1) |
#[derive(Debug)]
pub struct Pool<T> {
    slots: Vec<T>,
    free: Vec<u32>,
}

/// Pool of [`Order`] records, partition-private.
pub type OrderPool = Pool<Order>;

/// Pool of [`PriceLevel`] records, partition-private.
pub type LevelPool = Pool<PriceLevel>;

impl<T: Default + Clone> Pool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = vec![T::default(); capacity];
        // Reversed so the first alloc hands out slot 0.
        let free: Vec<u32> = (0..capacity as u32).rev().collect();
        Self { slots, free }
    }

    /// Pop a cleared slot, or `None` on exhaustion.
    #[inline]
    pub fn alloc(&mut self) -> Option<u32> {
        self.free.pop()
    }

    /// Clear the record and return its slot to the free list.
    #[inline]
    pub fn free(&mut self, idx: u32) {
        self.slots[idx as usize] = T::default();
        self.free.push(idx);
    }

    #[inline]
    pub fn get(&self, idx: u32) -> &T {
        &self.slots[idx as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, idx: u32) -> &mut T {
        &mut self.slots[idx as usize]
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free_accounting() {
        let mut pool = OrderPool::with_capacity(4);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.in_use(), 0);

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_eq!(pool.in_use() + pool.available(), pool.capacity());
        assert_eq!(pool.in_use(), 2);

        pool.free(a);
        assert_eq!(pool.in_use(), 1);
        pool.free(b);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_exhaustion() {
        let mut pool = LevelPool::with_capacity(2);
        let a = pool.alloc().unwrap();
        let _b = pool.alloc().unwrap();
        assert_eq!(pool.alloc(), None);

        pool.free(a);
        assert!(pool.alloc().is_some());
    }

    #[test]
    fn test_free_clears_record() {
        let mut pool = OrderPool::with_capacity(1);
        let idx = pool.alloc().unwrap();
        {
            let o = pool.get_mut(idx);
            o.internal_order_id = 42;
            o.qty = 100;
            o.next = 7;
        }
        pool.free(idx);
        let idx2 = pool.alloc().unwrap();
        assert_eq!(idx, idx2); // LIFO reuse
        let o = pool.get(idx2);
        assert_eq!(o.internal_order_id, 0);
        assert_eq!(o.qty, 0);
        assert_eq!(o.next, NIL);
    }

    #[test]
    fn test_lifo_reuse_order() {
        let mut pool = OrderPool::with_capacity(3);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        pool.free(a);
        pool.free(b);
        // Last freed comes back first.
        assert_eq!(pool.alloc(), Some(b));
        assert_eq!(pool.alloc(), Some(a));
    }
}
