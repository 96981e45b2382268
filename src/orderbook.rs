//! Limit order book - BTreeMap price ladders over pooled, intrusively
//! linked orders
//!
//! One book per instrument. Price-time priority matching with maker-price
//! fills; the matching loop walks the opposing ladder best-first and each
//! level's FIFO head-first.
//!
//! # Key design
//! - Asks are keyed by price (ascending, first entry = best ask).
//! - Bids are keyed by negated price, so the first entry is the best
//!   (highest) bid.
//! - Ladder values are level-pool slots; orders hang off levels through
//!   intrusive `prev`/`next` indices, giving O(1) unlink on fill and cancel.
//! - `order_index` maps internal order id -> order slot for O(1) cancel
//!   lookup.
//!
//! The book assumes validated input (`qty > 0`, `price > 0`); the gateway
//! rejects bad values before they reach this layer. Pool exhaustion is
//! checked by the engine before matching, so a rest cannot fail mid-book.

use crate::core_types::{InstrumentId, OrderId, SessionId};
use crate::models::{Side, TimeInForce};
use crate::pool::{LevelPool, NIL, Order, OrderPool};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Sentinel returned by [`LimitOrderBook::best_bid`] when the bid side is
/// empty.
pub const NO_BID: i64 = i64::MIN;
/// Sentinel returned by [`LimitOrderBook::best_ask`] when the ask side is
/// empty.
pub const NO_ASK: i64 = i64::MAX;

/// One executed quantity, reported to the matching callback.
///
/// The fill price is the passive order's price; the aggressor's price only
/// gates whether the cross happens. `aggressor_leaves`/`passive_leaves` are
/// each side's remaining quantity after this execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    pub aggressor_id: OrderId,
    pub passive_id: OrderId,
    pub aggressor_session: SessionId,
    pub passive_session: SessionId,
    pub instrument_id: InstrumentId,
    pub aggressor_side: Side,
    pub price: i64,
    pub qty: u64,
    pub aggressor_leaves: u64,
    pub passive_leaves: u64,
}

/// Per-instrument limit order book.
#[derive(Debug, Default)]
pub struct LimitOrderBook {
    /// Buy side: (-price) -> level slot, so the first key is the best bid.
    bids: BTreeMap<i64, u32>,
    /// Sell side: price -> level slot, so the first key is the best ask.
    asks: BTreeMap<i64, u32>,
    /// internal order id -> order slot, for O(1) cancel.
    order_index: FxHashMap<OrderId, u32>,
}

impl LimitOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match `order` against the opposing side, then rest (GTC) or drop
    /// (IOC) any remainder. Returns `true` when the order rested.
    ///
    /// `on_fill` is invoked once per executed quantity, in match order.
    pub fn add_order(
        &mut self,
        mut order: Order,
        orders: &mut OrderPool,
        levels: &mut LevelPool,
        on_fill: &mut impl FnMut(&Execution),
    ) -> bool {
        self.match_incoming(&mut order, orders, levels, on_fill);
        if order.qty == 0 {
            return false;
        }
        if order.tif == TimeInForce::Ioc {
            // Remainder dropped, not rested; no reject is generated.
            return false;
        }
        self.rest(order, orders, levels)
    }

    /// O(1) cancel by internal order id. Returns `false` when the id is not
    /// resting here.
    pub fn cancel(
        &mut self,
        internal_order_id: OrderId,
        orders: &mut OrderPool,
        levels: &mut LevelPool,
    ) -> bool {
        let Some(idx) = self.order_index.remove(&internal_order_id) else {
            return false;
        };
        let (lvl_idx, side, price, qty) = {
            let o = orders.get(idx);
            (o.level, o.side, o.price, o.qty)
        };
        levels.get_mut(lvl_idx).total_qty -= qty;
        unlink(levels, orders, lvl_idx, idx);
        orders.free(idx);
        if levels.get(lvl_idx).head == NIL {
            self.remove_level(side, price);
            levels.free(lvl_idx);
        }
        true
    }

    /// Best bid price, or [`NO_BID`] when the side is empty.
    #[inline]
    pub fn best_bid(&self) -> i64 {
        self.bids.first_key_value().map(|(k, _)| -k).unwrap_or(NO_BID)
    }

    /// Best ask price, or [`NO_ASK`] when the side is empty.
    #[inline]
    pub fn best_ask(&self) -> i64 {
        self.asks.first_key_value().map(|(k, _)| *k).unwrap_or(NO_ASK)
    }

    /// Number of price levels on each side (bid_depth, ask_depth).
    #[inline]
    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Number of resting orders.
    #[inline]
    pub fn resting(&self) -> usize {
        self.order_index.len()
    }

    #[inline]
    pub fn contains(&self, internal_order_id: OrderId) -> bool {
        self.order_index.contains_key(&internal_order_id)
    }

    /// Total resting quantity at a price level.
    pub fn qty_at_price(&self, price: i64, side: Side, levels: &LevelPool) -> u64 {
        let slot = match side {
            Side::Buy => self.bids.get(&-price),
            Side::Sell => self.asks.get(&price),
        };
        slot.map(|&l| levels.get(l).total_qty).unwrap_or(0)
    }

    // ============================================================
    // MATCHING
    // ============================================================

    fn match_incoming(
        &mut self,
        agg: &mut Order,
        orders: &mut OrderPool,
        levels: &mut LevelPool,
        on_fill: &mut impl FnMut(&Execution),
    ) {
        while agg.qty > 0 {
            let opposing = match agg.side {
                Side::Buy => &self.asks,
                Side::Sell => &self.bids,
            };
            let Some((&book_key, &lvl_idx)) = opposing.first_key_value() else {
                break;
            };
            let level_price = match agg.side {
                Side::Buy => book_key,
                Side::Sell => -book_key,
            };
            let crosses = match agg.side {
                Side::Buy => agg.price >= level_price,
                Side::Sell => agg.price <= level_price,
            };
            if !crosses {
                break;
            }

            let mut passive_idx = levels.get(lvl_idx).head;
            while passive_idx != NIL && agg.qty > 0 {
                let fill_qty = agg.qty.min(orders.get(passive_idx).qty);
                agg.qty -= fill_qty;
                let (passive_id, passive_session, passive_leaves, next) = {
                    let p = orders.get_mut(passive_idx);
                    p.qty -= fill_qty;
                    (p.internal_order_id, p.session_id, p.qty, p.next)
                };
                levels.get_mut(lvl_idx).total_qty -= fill_qty;

                on_fill(&Execution {
                    aggressor_id: agg.internal_order_id,
                    passive_id,
                    aggressor_session: agg.session_id,
                    passive_session,
                    instrument_id: agg.instrument_id,
                    aggressor_side: agg.side,
                    price: level_price,
                    qty: fill_qty,
                    aggressor_leaves: agg.qty,
                    passive_leaves,
                });

                if passive_leaves == 0 {
                    unlink(levels, orders, lvl_idx, passive_idx);
                    self.order_index.remove(&passive_id);
                    orders.free(passive_idx);
                }
                passive_idx = next;
            }

            if levels.get(lvl_idx).head == NIL {
                match agg.side {
                    Side::Buy => self.asks.remove(&book_key),
                    Side::Sell => self.bids.remove(&book_key),
                };
                levels.free(lvl_idx);
            }
        }
    }

    fn rest(&mut self, order: Order, orders: &mut OrderPool, levels: &mut LevelPool) -> bool {
        let Some(slot) = orders.alloc() else {
            return false;
        };
        let key = match order.side {
            Side::Buy => -order.price,
            Side::Sell => order.price,
        };
        let side_map = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let lvl_idx = match side_map.get(&key) {
            Some(&l) => l,
            None => {
                let Some(l) = levels.alloc() else {
                    orders.free(slot);
                    return false;
                };
                levels.get_mut(l).price = order.price;
                side_map.insert(key, l);
                l
            }
        };
        let id = order.internal_order_id;
        *orders.get_mut(slot) = order;
        push_back(levels, orders, lvl_idx, slot);
        self.order_index.insert(id, slot);
        true
    }

    fn remove_level(&mut self, side: Side, price: i64) {
        match side {
            Side::Buy => self.bids.remove(&-price),
            Side::Sell => self.asks.remove(&price),
        };
    }
}

// ============================================================
// INTRUSIVE LEVEL LIST
// ============================================================

/// Append an order slot at the level's FIFO tail. O(1).
fn push_back(levels: &mut LevelPool, orders: &mut OrderPool, lvl_idx: u32, idx: u32) {
    let qty = orders.get(idx).qty;
    let old_tail = {
        let lvl = levels.get_mut(lvl_idx);
        let old_tail = lvl.tail;
        lvl.tail = idx;
        if lvl.head == NIL {
            lvl.head = idx;
        }
        lvl.total_qty += qty;
        old_tail
    };
    {
        let o = orders.get_mut(idx);
        o.prev = old_tail;
        o.next = NIL;
        o.level = lvl_idx;
    }
    if old_tail != NIL {
        orders.get_mut(old_tail).next = idx;
    }
}

/// Unlink an order slot from its level. O(1). The caller maintains
/// `total_qty`.
fn unlink(levels: &mut LevelPool, orders: &mut OrderPool, lvl_idx: u32, idx: u32) {
    let (prev, next) = {
        let o = orders.get(idx);
        (o.prev, o.next)
    };
    if prev != NIL {
        orders.get_mut(prev).next = next;
    } else {
        levels.get_mut(lvl_idx).head = next;
    }
    if next != NIL {
        orders.get_mut(next).prev = prev;
    } else {
        levels.get_mut(lvl_idx).tail = prev;
    }
    let o = orders.get_mut(idx);
    o.prev = NIL;
    o.next = NIL;
    o.level = NIL;
}
