//! Gateway ingress - TCP accept loop and non-blocking I/O workers
//!
//! One accept thread hands connections round-robin to two ingress workers.
//! Each worker owns its connections outright (scratch buffer, session
//! pointer, read half) and multiplexes them with non-blocking reads; no
//! other thread touches a connection's ingress state.
//!
//! Per-connection state machine:
//!
//! ```text
//! UNAUTH --LOGON--> READY --TCP close--> CLOSED (session removed)
//! ```
//!
//! NEW_ORDER processing: parse, sequence-validate, range-check, assign the
//! internal order id, stamp the receive timestamp, publish the 62-byte
//! internal message to `instrument_id % P`. Backpressure turns into
//! `REJECT(SYSTEM_BUSY)`; the order is not retried.

use crate::codec::{
    self, FRAME_HEADER_SIZE, LogonAck, MAX_FRAGMENT_SIZE, NEW_ORDER_TCP_PAYLOAD_SIZE, Reject,
};
use crate::config::AppConfig;
use crate::core_types::{OrderId, now_nanos};
use crate::models::RejectReason;
use crate::session::{ClientChannel, SeqCheck, Session, SessionRegistry};
use crate::transport::{IdleBackoff, PartitionTransport, PublishResult, ShutdownSignal, partition_of};
use crossbeam_queue::ArrayQueue;
use std::io::{self, ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Ingress I/O worker threads.
const INGRESS_WORKERS: usize = 2;

/// Pending handoffs from the accept thread to one worker.
const INTAKE_CAPACITY: usize = 1024;

/// Per-connection reassembly buffer start size; grows only for oversized
/// (and therefore doomed) frames.
const RX_BUF_CAPACITY: usize = 4096;

/// Gateway-side counters, shared with the metrics reporter.
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub connections_accepted: AtomicU64,
    pub orders_in: AtomicU64,
    pub cancels_in: AtomicU64,
    pub rejects_emitted: AtomicU64,
    pub frames_dropped: AtomicU64,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Shared ingress context, cheap to clone into worker threads.
#[derive(Clone)]
struct GatewayCtx {
    transport: Arc<PartitionTransport>,
    registry: Arc<SessionRegistry>,
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<GatewayStats>,
    /// Gateway-wide monotonic internal order id source.
    next_order_id: Arc<AtomicU64>,
    partitions: u32,
}

/// Running gateway: bound address plus the accept/worker threads.
pub struct GatewayHandle {
    pub local_addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

impl GatewayHandle {
    /// Wait for the accept thread and both workers to exit.
    pub fn join(self) {
        for t in self.threads {
            let _ = t.join();
        }
    }
}

/// Bind the listener and start the accept thread plus the ingress workers.
pub fn spawn_gateway(
    config: &AppConfig,
    transport: Arc<PartitionTransport>,
    registry: Arc<SessionRegistry>,
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<GatewayStats>,
) -> io::Result<GatewayHandle> {
    let listener = TcpListener::bind(("0.0.0.0", config.gateway_port))?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "gateway listening");

    let ctx = GatewayCtx {
        transport,
        registry,
        shutdown,
        stats,
        next_order_id: Arc::new(AtomicU64::new(1)),
        partitions: config.partitions,
    };

    let intakes: Vec<Arc<ArrayQueue<Connection>>> = (0..INGRESS_WORKERS)
        .map(|_| Arc::new(ArrayQueue::new(INTAKE_CAPACITY)))
        .collect();

    let mut threads = Vec::with_capacity(1 + INGRESS_WORKERS);
    for (worker_id, intake) in intakes.iter().enumerate() {
        let intake = Arc::clone(intake);
        let ctx = ctx.clone();
        threads.push(
            thread::Builder::new()
                .name(format!("ingress-{worker_id}"))
                .spawn(move || ingress_worker(worker_id, intake, ctx))?,
        );
    }

    let accept_ctx = ctx.clone();
    threads.push(
        thread::Builder::new()
            .name("accept".into())
            .spawn(move || accept_loop(listener, intakes, accept_ctx))?,
    );

    Ok(GatewayHandle {
        local_addr,
        threads,
    })
}

// ============================================================
// ACCEPT LOOP
// ============================================================

fn accept_loop(listener: TcpListener, intakes: Vec<Arc<ArrayQueue<Connection>>>, ctx: GatewayCtx) {
    let mut next_worker = 0usize;
    loop {
        if ctx.shutdown.is_shutdown_requested() {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => match Connection::establish(stream) {
                Ok(conn) => {
                    ctx.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(%peer, worker = next_worker, "connection accepted");
                    if intakes[next_worker].push(conn).is_err() {
                        warn!(%peer, "ingress intake full, dropping connection");
                    }
                    next_worker = (next_worker + 1) % intakes.len();
                }
                Err(e) => {
                    warn!(%peer, error = %e, "failed to set up connection");
                }
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
    info!("accept loop stopped");
}

// ============================================================
// CONNECTION
// ============================================================

/// Per-connection ingress state, owned by exactly one worker.
struct Connection {
    reader: TcpStream,
    channel: Arc<ClientChannel>,
    session: Option<Arc<Session>>,
    rx: Vec<u8>,
    closed: bool,
}

impl Connection {
    fn establish(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        set_keepalive(&stream);
        stream.set_nonblocking(true)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: stream,
            channel: Arc::new(ClientChannel::new(writer)),
            session: None,
            rx: Vec::with_capacity(RX_BUF_CAPACITY),
            closed: false,
        })
    }
}

#[cfg(unix)]
fn set_keepalive(stream: &TcpStream) {
    use std::os::unix::io::AsRawFd;
    let on: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &on as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        debug!("SO_KEEPALIVE not set");
    }
}

#[cfg(not(unix))]
fn set_keepalive(_stream: &TcpStream) {}

// ============================================================
// INGRESS WORKER
// ============================================================

fn ingress_worker(worker_id: usize, intake: Arc<ArrayQueue<Connection>>, ctx: GatewayCtx) {
    let mut conns: Vec<Connection> = Vec::new();
    let mut read_buf = [0u8; 8192];
    let mut backoff = IdleBackoff::new();
    info!(worker = worker_id, "ingress worker started");

    loop {
        while let Some(conn) = intake.pop() {
            conns.push(conn);
        }

        let mut did_work = false;
        for conn in conns.iter_mut() {
            did_work |= service_connection(conn, &ctx, &mut read_buf);
        }

        let mut i = 0;
        while i < conns.len() {
            if conns[i].closed || !conns[i].channel.is_active() {
                let conn = conns.swap_remove(i);
                conn.channel.deactivate();
                if let Some(session) = &conn.session {
                    ctx.registry.remove(session.session_id);
                    info!(
                        worker = worker_id,
                        session_id = session.session_id,
                        "session disconnected"
                    );
                }
            } else {
                i += 1;
            }
        }

        if ctx.shutdown.is_shutdown_requested() {
            break;
        }
        if did_work {
            backoff.reset();
        } else {
            backoff.idle();
        }
    }
    info!(worker = worker_id, "ingress worker stopped");
}

/// One non-blocking read plus frame processing. Returns `true` when any
/// bytes moved.
fn service_connection(conn: &mut Connection, ctx: &GatewayCtx, read_buf: &mut [u8]) -> bool {
    match conn.reader.read(read_buf) {
        Ok(0) => {
            conn.closed = true;
            true
        }
        Ok(n) => {
            conn.rx.extend_from_slice(&read_buf[..n]);
            process_frames(conn, ctx);
            true
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => false,
        Err(e) if e.kind() == ErrorKind::Interrupted => false,
        Err(e) => {
            debug!(error = %e, "connection read failed");
            conn.closed = true;
            true
        }
    }
}

/// Frame reassembly: peel complete `[len][type][payload]` frames off the
/// front of the scratch buffer.
fn process_frames(conn: &mut Connection, ctx: &GatewayCtx) {
    let mut consumed = 0usize;
    while let Some(len) = codec::read_frame_len(&conn.rx[consumed..]) {
        if len == 0 {
            warn!("zero-length frame, closing connection");
            conn.closed = true;
            break;
        }
        if conn.rx.len() - consumed < FRAME_HEADER_SIZE + len {
            break;
        }
        let start = consumed + FRAME_HEADER_SIZE;
        if len <= MAX_FRAGMENT_SIZE {
            let mut fragment = [0u8; MAX_FRAGMENT_SIZE];
            fragment[..len].copy_from_slice(&conn.rx[start..start + len]);
            handle_fragment(conn, ctx, &fragment[..len]);
        } else {
            // Longer than any message this protocol defines.
            warn!(len, "oversized frame dropped");
            ctx.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        consumed += FRAME_HEADER_SIZE + len;
        if conn.closed {
            break;
        }
    }
    if consumed > 0 {
        conn.rx.drain(..consumed);
    }
}

fn handle_fragment(conn: &mut Connection, ctx: &GatewayCtx, fragment: &[u8]) {
    let msg_type = fragment[0];
    let payload = &fragment[1..];

    if msg_type == codec::MSG_HEARTBEAT {
        return;
    }

    match &conn.session {
        None => match msg_type {
            codec::MSG_LOGON => handle_logon(conn, ctx, payload),
            codec::MSG_NEW_ORDER => {
                // Echo the claimed identifiers so the client can correlate.
                if let Ok(order) = codec::decode_new_order_tcp(payload) {
                    send_reject(
                        &conn.channel,
                        ctx,
                        order.session_id,
                        order.client_seq_no,
                        RejectReason::SessionNotLoggedOn,
                    );
                } else {
                    ctx.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            codec::MSG_CANCEL_REQUEST => {
                if let Ok(cancel) = codec::decode_cancel_request(payload) {
                    send_reject(
                        &conn.channel,
                        ctx,
                        cancel.session_id,
                        cancel.client_seq_no,
                        RejectReason::SessionNotLoggedOn,
                    );
                } else {
                    ctx.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            other => {
                warn!(msg_type = other, "unexpected message before logon");
                ctx.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        },
        Some(session) => {
            let session = Arc::clone(session);
            match msg_type {
                codec::MSG_LOGON => {
                    debug!(session_id = session.session_id, "duplicate logon ignored");
                }
                codec::MSG_NEW_ORDER => handle_new_order(ctx, &session, payload),
                codec::MSG_CANCEL_REQUEST => handle_cancel(ctx, &session, payload),
                other => {
                    warn!(msg_type = other, "unknown message type dropped");
                    ctx.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

fn handle_logon(conn: &mut Connection, ctx: &GatewayCtx, payload: &[u8]) {
    let logon = match codec::decode_logon(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "bad logon dropped");
            ctx.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    let session = ctx
        .registry
        .register(logon.client_id, Arc::clone(&conn.channel));
    info!(
        session_id = session.session_id,
        client_id = logon.client_id,
        "session logged on"
    );

    let mut buf = [0u8; MAX_FRAGMENT_SIZE];
    let n = codec::encode_logon_ack(
        &mut buf,
        &LogonAck {
            session_id: session.session_id,
        },
    );
    conn.channel.write_frame(&buf[..n]);
    conn.session = Some(session);
}

fn handle_new_order(ctx: &GatewayCtx, session: &Session, payload: &[u8]) {
    let order = match codec::decode_new_order_tcp(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!(session_id = session.session_id, error = %e, "bad NEW_ORDER dropped");
            ctx.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    ctx.stats.orders_in.fetch_add(1, Ordering::Relaxed);

    match session.validate_and_advance(order.client_seq_no) {
        SeqCheck::Accept => {}
        SeqCheck::Duplicate => {
            send_reject(
                session.channel(),
                ctx,
                session.session_id,
                order.client_seq_no,
                RejectReason::DuplicateSeqNo,
            );
            return;
        }
        SeqCheck::Gap => {
            send_reject(
                session.channel(),
                ctx,
                session.session_id,
                order.client_seq_no,
                RejectReason::SeqNoGap,
            );
            return;
        }
    }

    // The book assumes validated input; bad ranges stop here.
    if order.qty == 0 {
        send_reject(
            session.channel(),
            ctx,
            session.session_id,
            order.client_seq_no,
            RejectReason::InvalidQty,
        );
        return;
    }
    if order.price <= 0 {
        send_reject(
            session.channel(),
            ctx,
            session.session_id,
            order.client_seq_no,
            RejectReason::InvalidPrice,
        );
        return;
    }

    let internal_order_id: OrderId = ctx.next_order_id.fetch_add(1, Ordering::Relaxed);

    // Stamp the authoritative session id and receive timestamp into the
    // payload, then prepend the assigned id.
    let mut stamped = [0u8; NEW_ORDER_TCP_PAYLOAD_SIZE];
    stamped.copy_from_slice(&payload[..NEW_ORDER_TCP_PAYLOAD_SIZE]);
    stamped[0..4].copy_from_slice(&session.session_id.to_le_bytes());
    stamped[42..50].copy_from_slice(&now_nanos().to_le_bytes());

    let mut internal = [0u8; MAX_FRAGMENT_SIZE];
    let n = codec::promote_new_order(&mut internal, internal_order_id, &stamped);

    let partition = partition_of(order.instrument_id, ctx.partitions);
    match ctx.transport.inbound(partition).publish(&internal[..n]) {
        PublishResult::Ok => {}
        PublishResult::Backpressured | PublishResult::AdminBlocked => {
            send_reject(
                session.channel(),
                ctx,
                session.session_id,
                order.client_seq_no,
                RejectReason::SystemBusy,
            );
        }
        PublishResult::Failed => {
            error!(partition, "inbound publish failed");
            send_reject(
                session.channel(),
                ctx,
                session.session_id,
                order.client_seq_no,
                RejectReason::SystemBusy,
            );
        }
    }
}

fn handle_cancel(ctx: &GatewayCtx, session: &Session, payload: &[u8]) {
    let cancel = match codec::decode_cancel_request(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!(session_id = session.session_id, error = %e, "bad CANCEL_REQUEST dropped");
            ctx.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    ctx.stats.cancels_in.fetch_add(1, Ordering::Relaxed);

    // Cancels skip the sequence check; only the session id is made
    // authoritative before forwarding.
    let mut buf = [0u8; MAX_FRAGMENT_SIZE];
    let n = codec::encode_cancel_request(
        &mut buf,
        &codec::CancelRequest {
            session_id: session.session_id,
            client_seq_no: cancel.client_seq_no,
            internal_order_id: cancel.internal_order_id,
            instrument_id: cancel.instrument_id,
        },
    );

    let partition = partition_of(cancel.instrument_id, ctx.partitions);
    match ctx.transport.inbound(partition).publish(&buf[..n]) {
        PublishResult::Ok => {}
        _ => {
            send_reject(
                session.channel(),
                ctx,
                session.session_id,
                cancel.client_seq_no,
                RejectReason::SystemBusy,
            );
        }
    }
}

fn send_reject(
    channel: &ClientChannel,
    ctx: &GatewayCtx,
    session_id: u32,
    client_seq_no: u64,
    reason: RejectReason,
) {
    ctx.stats.rejects_emitted.fetch_add(1, Ordering::Relaxed);
    debug!(session_id, client_seq_no, reason = reason.as_str(), "reject");
    let mut buf = [0u8; MAX_FRAGMENT_SIZE];
    let n = codec::encode_reject(
        &mut buf,
        &Reject {
            session_id,
            client_seq_no,
            reason,
        },
    );
    channel.write_frame(&buf[..n]);
}
