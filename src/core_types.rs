//! Core types used throughout the system
//!
//! Fundamental type aliases and constants shared by every module. They carry
//! semantic meaning and keep field types consistent across the wire codec,
//! the gateway and the engine.

use std::time::{SystemTime, UNIX_EPOCH};

/// Session ID - assigned monotonically by the gateway on logon.
///
/// # Constraints:
/// - **Immutable**: once assigned, never changes for the life of the session
/// - **Monotonic**: the registry counter starts at 1 and only grows
pub type SessionId = u32;

/// Client ID - opaque identifier echoed from the logon message.
pub type ClientId = u64;

/// Internal order ID - globally unique, gateway-assigned monotonic counter.
pub type OrderId = u64;

/// Per-session client sequence number.
///
/// A session's orders must arrive as `last_seq_no + 1`; earlier values are
/// duplicates, later values are gaps.
pub type SeqNo = u64;

/// Instrument ID - the only routing key: `instrument_id % partitions`
/// selects the owning engine partition.
pub type InstrumentId = u32;

/// Engine partition ID.
pub type PartitionId = u32;

/// Fixed price scale: prices travel as `i64 = decimal * 10^6`.
pub const PRICE_SCALE: i64 = 1_000_000;

/// Wall-clock nanoseconds since the Unix epoch.
///
/// Used for `recv_ts_nanos` stamping at the gateway and event timestamps in
/// the engine.
#[inline]
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
