//! Wire codec - fixed-layout binary messages over little-endian buffers
//!
//! Two framings coexist:
//!
//! - **TCP frame** (client <-> gateway): `[len: u16 LE][type: u8][payload]`
//!   where `len = 1 + payload_size` (everything after the length field).
//! - **Partition-transport fragment** (gateway <-> engine): `[type: u8][payload]`,
//!   no length prefix - message boundaries come from the transport substrate.
//!
//! Encoders write into caller-supplied scratch buffers and return the
//! fragment length; the codec never allocates. Decoders validate payload
//! length and enum codes only; an unknown type or bad enum is a soft error
//! (callers log and drop the frame).

use crate::core_types::{ClientId, InstrumentId, OrderId, SeqNo, SessionId};
use crate::models::{RejectReason, Side, TimeInForce};
use thiserror::Error;

// ============================================================
// MESSAGE TYPES (closed set)
// ============================================================

pub const MSG_LOGON: u8 = 1;
pub const MSG_NEW_ORDER: u8 = 2;
pub const MSG_CANCEL_REQUEST: u8 = 3;
pub const MSG_LOGON_ACK: u8 = 20;
pub const MSG_ACK: u8 = 21;
pub const MSG_REJECT: u8 = 22;
pub const MSG_FILL: u8 = 23;
pub const MSG_CANCEL_ACK: u8 = 24;
pub const MSG_HEARTBEAT: u8 = 30;

// Payload sizes (bytes after the type byte).
pub const LOGON_PAYLOAD_SIZE: usize = 12;
pub const LOGON_ACK_PAYLOAD_SIZE: usize = 4;
pub const NEW_ORDER_TCP_PAYLOAD_SIZE: usize = 50;
pub const NEW_ORDER_INTERNAL_PAYLOAD_SIZE: usize = 62;
pub const CANCEL_REQUEST_PAYLOAD_SIZE: usize = 24;
pub const ACK_PAYLOAD_SIZE: usize = 32;
pub const REJECT_PAYLOAD_SIZE: usize = 13;
pub const FILL_PAYLOAD_SIZE: usize = 49;
pub const CANCEL_ACK_PAYLOAD_SIZE: usize = 12;
pub const HEARTBEAT_PAYLOAD_SIZE: usize = 0;

/// TCP frame length prefix.
pub const FRAME_HEADER_SIZE: usize = 2;

/// Largest fragment the system produces (internal NEW_ORDER, 1 + 62).
pub const MAX_FRAGMENT_SIZE: usize = 1 + NEW_ORDER_INTERNAL_PAYLOAD_SIZE;

/// Fragment offset of `session_id` for outbound message types, used by the
/// egress router to pick the client channel without a full decode.
#[inline]
pub fn session_id_offset(msg_type: u8) -> Option<usize> {
    match msg_type {
        MSG_LOGON_ACK => Some(1),
        MSG_ACK => Some(1 + 16),
        MSG_REJECT => Some(1),
        MSG_FILL => Some(1 + 8),
        MSG_CANCEL_ACK => Some(1 + 8),
        _ => None,
    }
}

/// Fragment offset of `ts_nanos` on an ACK (latency sampling).
pub const ACK_TS_OFFSET: usize = 1 + 24;

// ============================================================
// ERRORS
// ============================================================

/// Decode failure. Always recoverable: log, drop the frame, keep going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("short payload for type {msg_type}: got {len}, need {need}")]
    ShortPayload {
        msg_type: u8,
        len: usize,
        need: usize,
    },
    #[error("bad {field} code {value}")]
    BadEnum { field: &'static str, value: u8 },
}

// ============================================================
// MESSAGE STRUCTS
// ============================================================

/// LOGON (client -> gateway). `session_id` is ignored on the way in; the
/// gateway assigns one and echoes it in LOGON_ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Logon {
    pub session_id: SessionId,
    pub client_id: ClientId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogonAck {
    pub session_id: SessionId,
}

/// NEW_ORDER as received on the TCP leg (50-byte payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOrderTcp {
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub client_seq_no: SeqNo,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub tif: TimeInForce,
    pub price: i64,
    pub qty: u64,
    pub recv_ts_nanos: i64,
}

/// NEW_ORDER on the partition transport: `internal_order_id` prepended to
/// the TCP payload, identical thereafter (62-byte payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOrderInternal {
    pub internal_order_id: OrderId,
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub client_seq_no: SeqNo,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub tif: TimeInForce,
    pub price: i64,
    pub qty: u64,
    pub recv_ts_nanos: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequest {
    pub session_id: SessionId,
    pub client_seq_no: SeqNo,
    pub internal_order_id: OrderId,
    pub instrument_id: InstrumentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub internal_order_id: OrderId,
    pub client_seq_no: SeqNo,
    pub session_id: SessionId,
    pub instrument_id: InstrumentId,
    pub ts_nanos: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reject {
    pub session_id: SessionId,
    pub client_seq_no: SeqNo,
    pub reason: RejectReason,
}

/// Execution report for one side of a match.
///
/// `side` is the side of the party this FILL is addressed to: the aggressor
/// receives its own side, the passive party receives the opposite of the
/// aggressor's (which is its own). `leaves_qty` is that party's remaining
/// open quantity after the fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    pub internal_order_id: OrderId,
    pub session_id: SessionId,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub fill_price: i64,
    pub fill_qty: u64,
    pub leaves_qty: u64,
    pub ts_nanos: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelAck {
    pub internal_order_id: OrderId,
    pub session_id: SessionId,
}

// ============================================================
// BUFFER PRIMITIVES
// ============================================================

// Readers assume the caller has length-checked the payload; every decoder
// below checks before walking offsets.

#[inline]
fn read_u16(b: &[u8], off: usize) -> u16 {
    let mut a = [0u8; 2];
    a.copy_from_slice(&b[off..off + 2]);
    u16::from_le_bytes(a)
}

#[inline]
fn read_u32(b: &[u8], off: usize) -> u32 {
    let mut a = [0u8; 4];
    a.copy_from_slice(&b[off..off + 4]);
    u32::from_le_bytes(a)
}

#[inline]
fn read_u64(b: &[u8], off: usize) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(a)
}

#[inline]
fn read_i64(b: &[u8], off: usize) -> i64 {
    read_u64(b, off) as i64
}

#[inline]
fn write_u16(b: &mut [u8], off: usize, v: u16) {
    b[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn write_u32(b: &mut [u8], off: usize, v: u32) {
    b[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn write_u64(b: &mut [u8], off: usize, v: u64) {
    b[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn write_i64(b: &mut [u8], off: usize, v: i64) {
    write_u64(b, off, v as u64);
}

#[inline]
fn check_len(msg_type: u8, payload: &[u8], need: usize) -> Result<(), CodecError> {
    if payload.len() < need {
        return Err(CodecError::ShortPayload {
            msg_type,
            len: payload.len(),
            need,
        });
    }
    Ok(())
}

/// Read the session id at its type-specific fragment offset.
#[inline]
pub fn peek_session_id(fragment: &[u8]) -> Option<SessionId> {
    let off = session_id_offset(*fragment.first()?)?;
    if fragment.len() < off + 4 {
        return None;
    }
    Some(read_u32(fragment, off))
}

/// Read the ACK timestamp without a full decode.
#[inline]
pub fn peek_ack_ts_nanos(fragment: &[u8]) -> Option<i64> {
    if fragment.first() != Some(&MSG_ACK) || fragment.len() < ACK_TS_OFFSET + 8 {
        return None;
    }
    Some(read_i64(fragment, ACK_TS_OFFSET))
}

/// Prepend the TCP length prefix for a fragment: returns the total frame
/// length written into `buf` (`FRAME_HEADER_SIZE + fragment.len()`).
#[inline]
pub fn write_tcp_frame(buf: &mut [u8], fragment: &[u8]) -> usize {
    write_u16(buf, 0, fragment.len() as u16);
    buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + fragment.len()].copy_from_slice(fragment);
    FRAME_HEADER_SIZE + fragment.len()
}

/// Parse the TCP length prefix. Returns the fragment length, or `None` when
/// fewer than two bytes are buffered.
#[inline]
pub fn read_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < FRAME_HEADER_SIZE {
        return None;
    }
    Some(read_u16(buf, 0) as usize)
}

// ============================================================
// ENCODERS (fragment = [type][payload])
// ============================================================

pub fn encode_logon(buf: &mut [u8], m: &Logon) -> usize {
    buf[0] = MSG_LOGON;
    write_u32(buf, 1, m.session_id);
    write_u64(buf, 5, m.client_id);
    1 + LOGON_PAYLOAD_SIZE
}

pub fn encode_logon_ack(buf: &mut [u8], m: &LogonAck) -> usize {
    buf[0] = MSG_LOGON_ACK;
    write_u32(buf, 1, m.session_id);
    1 + LOGON_ACK_PAYLOAD_SIZE
}

pub fn encode_new_order_tcp(buf: &mut [u8], m: &NewOrderTcp) -> usize {
    buf[0] = MSG_NEW_ORDER;
    encode_order_fields(&mut buf[1..], m);
    1 + NEW_ORDER_TCP_PAYLOAD_SIZE
}

pub fn encode_new_order_internal(buf: &mut [u8], m: &NewOrderInternal) -> usize {
    buf[0] = MSG_NEW_ORDER;
    write_u64(buf, 1, m.internal_order_id);
    encode_order_fields(
        &mut buf[9..],
        &NewOrderTcp {
            session_id: m.session_id,
            client_id: m.client_id,
            client_seq_no: m.client_seq_no,
            instrument_id: m.instrument_id,
            side: m.side,
            tif: m.tif,
            price: m.price,
            qty: m.qty,
            recv_ts_nanos: m.recv_ts_nanos,
        },
    );
    1 + NEW_ORDER_INTERNAL_PAYLOAD_SIZE
}

/// Promote a validated 50-byte TCP order payload to the internal layout by
/// prepending the assigned id. Avoids a decode/re-encode on the hot path.
pub fn promote_new_order(buf: &mut [u8], internal_order_id: OrderId, tcp_payload: &[u8]) -> usize {
    buf[0] = MSG_NEW_ORDER;
    write_u64(buf, 1, internal_order_id);
    buf[9..9 + NEW_ORDER_TCP_PAYLOAD_SIZE]
        .copy_from_slice(&tcp_payload[..NEW_ORDER_TCP_PAYLOAD_SIZE]);
    1 + NEW_ORDER_INTERNAL_PAYLOAD_SIZE
}

fn encode_order_fields(b: &mut [u8], m: &NewOrderTcp) {
    write_u32(b, 0, m.session_id);
    write_u64(b, 4, m.client_id);
    write_u64(b, 12, m.client_seq_no);
    write_u32(b, 20, m.instrument_id);
    b[24] = m.side.as_u8();
    b[25] = m.tif.as_u8();
    write_i64(b, 26, m.price);
    write_u64(b, 34, m.qty);
    write_i64(b, 42, m.recv_ts_nanos);
}

pub fn encode_cancel_request(buf: &mut [u8], m: &CancelRequest) -> usize {
    buf[0] = MSG_CANCEL_REQUEST;
    write_u32(buf, 1, m.session_id);
    write_u64(buf, 5, m.client_seq_no);
    write_u64(buf, 13, m.internal_order_id);
    write_u32(buf, 21, m.instrument_id);
    1 + CANCEL_REQUEST_PAYLOAD_SIZE
}

pub fn encode_ack(buf: &mut [u8], m: &Ack) -> usize {
    buf[0] = MSG_ACK;
    write_u64(buf, 1, m.internal_order_id);
    write_u64(buf, 9, m.client_seq_no);
    write_u32(buf, 17, m.session_id);
    write_u32(buf, 21, m.instrument_id);
    write_i64(buf, 25, m.ts_nanos);
    1 + ACK_PAYLOAD_SIZE
}

pub fn encode_reject(buf: &mut [u8], m: &Reject) -> usize {
    buf[0] = MSG_REJECT;
    write_u32(buf, 1, m.session_id);
    write_u64(buf, 5, m.client_seq_no);
    buf[13] = m.reason.as_u8();
    1 + REJECT_PAYLOAD_SIZE
}

pub fn encode_fill(buf: &mut [u8], m: &Fill) -> usize {
    buf[0] = MSG_FILL;
    write_u64(buf, 1, m.internal_order_id);
    write_u32(buf, 9, m.session_id);
    write_u32(buf, 13, m.instrument_id);
    buf[17] = m.side.as_u8();
    write_i64(buf, 18, m.fill_price);
    write_u64(buf, 26, m.fill_qty);
    write_u64(buf, 34, m.leaves_qty);
    write_i64(buf, 42, m.ts_nanos);
    1 + FILL_PAYLOAD_SIZE
}

pub fn encode_cancel_ack(buf: &mut [u8], m: &CancelAck) -> usize {
    buf[0] = MSG_CANCEL_ACK;
    write_u64(buf, 1, m.internal_order_id);
    write_u32(buf, 9, m.session_id);
    1 + CANCEL_ACK_PAYLOAD_SIZE
}

pub fn encode_heartbeat(buf: &mut [u8]) -> usize {
    buf[0] = MSG_HEARTBEAT;
    1 + HEARTBEAT_PAYLOAD_SIZE
}

// ============================================================
// DECODERS (payload = bytes after the type byte)
// ============================================================

pub fn decode_logon(payload: &[u8]) -> Result<Logon, CodecError> {
    check_len(MSG_LOGON, payload, LOGON_PAYLOAD_SIZE)?;
    Ok(Logon {
        session_id: read_u32(payload, 0),
        client_id: read_u64(payload, 4),
    })
}

pub fn decode_logon_ack(payload: &[u8]) -> Result<LogonAck, CodecError> {
    check_len(MSG_LOGON_ACK, payload, LOGON_ACK_PAYLOAD_SIZE)?;
    Ok(LogonAck {
        session_id: read_u32(payload, 0),
    })
}

pub fn decode_new_order_tcp(payload: &[u8]) -> Result<NewOrderTcp, CodecError> {
    check_len(MSG_NEW_ORDER, payload, NEW_ORDER_TCP_PAYLOAD_SIZE)?;
    decode_order_fields(payload)
}

pub fn decode_new_order_internal(payload: &[u8]) -> Result<NewOrderInternal, CodecError> {
    check_len(MSG_NEW_ORDER, payload, NEW_ORDER_INTERNAL_PAYLOAD_SIZE)?;
    let internal_order_id = read_u64(payload, 0);
    let tcp = decode_order_fields(&payload[8..])?;
    Ok(NewOrderInternal {
        internal_order_id,
        session_id: tcp.session_id,
        client_id: tcp.client_id,
        client_seq_no: tcp.client_seq_no,
        instrument_id: tcp.instrument_id,
        side: tcp.side,
        tif: tcp.tif,
        price: tcp.price,
        qty: tcp.qty,
        recv_ts_nanos: tcp.recv_ts_nanos,
    })
}

fn decode_order_fields(b: &[u8]) -> Result<NewOrderTcp, CodecError> {
    let side = Side::from_u8(b[24]).ok_or(CodecError::BadEnum {
        field: "side",
        value: b[24],
    })?;
    let tif = TimeInForce::from_u8(b[25]).ok_or(CodecError::BadEnum {
        field: "tif",
        value: b[25],
    })?;
    Ok(NewOrderTcp {
        session_id: read_u32(b, 0),
        client_id: read_u64(b, 4),
        client_seq_no: read_u64(b, 12),
        instrument_id: read_u32(b, 20),
        side,
        tif,
        price: read_i64(b, 26),
        qty: read_u64(b, 34),
        recv_ts_nanos: read_i64(b, 42),
    })
}

pub fn decode_cancel_request(payload: &[u8]) -> Result<CancelRequest, CodecError> {
    check_len(MSG_CANCEL_REQUEST, payload, CANCEL_REQUEST_PAYLOAD_SIZE)?;
    Ok(CancelRequest {
        session_id: read_u32(payload, 0),
        client_seq_no: read_u64(payload, 4),
        internal_order_id: read_u64(payload, 12),
        instrument_id: read_u32(payload, 20),
    })
}

pub fn decode_ack(payload: &[u8]) -> Result<Ack, CodecError> {
    check_len(MSG_ACK, payload, ACK_PAYLOAD_SIZE)?;
    Ok(Ack {
        internal_order_id: read_u64(payload, 0),
        client_seq_no: read_u64(payload, 8),
        session_id: read_u32(payload, 16),
        instrument_id: read_u32(payload, 20),
        ts_nanos: read_i64(payload, 24),
    })
}

pub fn decode_reject(payload: &[u8]) -> Result<Reject, CodecError> {
    check_len(MSG_REJECT, payload, REJECT_PAYLOAD_SIZE)?;
    let reason = RejectReason::from_u8(payload[12]).ok_or(CodecError::BadEnum {
        field: "reason",
        value: payload[12],
    })?;
    Ok(Reject {
        session_id: read_u32(payload, 0),
        client_seq_no: read_u64(payload, 4),
        reason,
    })
}

pub fn decode_fill(payload: &[u8]) -> Result<Fill, CodecError> {
    check_len(MSG_FILL, payload, FILL_PAYLOAD_SIZE)?;
    let side = Side::from_u8(payload[16]).ok_or(CodecError::BadEnum {
        field: "side",
        value: payload[16],
    })?;
    Ok(Fill {
        internal_order_id: read_u64(payload, 0),
        session_id: read_u32(payload, 8),
        instrument_id: read_u32(payload, 12),
        side,
        fill_price: read_i64(payload, 17),
        fill_qty: read_u64(payload, 25),
        leaves_qty: read_u64(payload, 33),
        ts_nanos: read_i64(payload, 41),
    })
}

pub fn decode_cancel_ack(payload: &[u8]) -> Result<CancelAck, CodecError> {
    check_len(MSG_CANCEL_ACK, payload, CANCEL_ACK_PAYLOAD_SIZE)?;
    Ok(CancelAck {
        internal_order_id: read_u64(payload, 0),
        session_id: read_u32(payload, 8),
    })
}

/// Expected payload size for an inbound engine-side message type.
pub fn internal_payload_size(msg_type: u8) -> Result<usize, CodecError> {
    match msg_type {
        MSG_NEW_ORDER => Ok(NEW_ORDER_INTERNAL_PAYLOAD_SIZE),
        MSG_CANCEL_REQUEST => Ok(CANCEL_REQUEST_PAYLOAD_SIZE),
        MSG_HEARTBEAT => Ok(HEARTBEAT_PAYLOAD_SIZE),
        other => Err(CodecError::UnknownMessageType(other)),
    }
}
