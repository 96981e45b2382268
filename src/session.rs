//! Session registry and per-session sequence validation
//!
//! The registry is the only structure in the system mutated by more than one
//! thread: ingress workers register/remove on logon/disconnect, the egress
//! router resolves sessions to route engine replies. Contention is
//! negligible (only logon and disconnect write), so a single `RwLock` over
//! an `FxHashMap` is sufficient.
//!
//! `last_seq_no` writes are serialised by the owning connection's I/O
//! worker; acquire/release ordering guarantees any other thread reading it
//! observes a monotonically non-decreasing value.

use crate::codec::{FRAME_HEADER_SIZE, MAX_FRAGMENT_SIZE, write_tcp_frame};
use crate::core_types::{ClientId, SeqNo, SessionId};
use rustc_hash::FxHashMap;
use std::io::{ErrorKind, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Outcome of a per-session sequence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// `seq_no == last + 1`; `last_seq_no` advanced.
    Accept,
    /// `seq_no <= last`; already seen.
    Duplicate,
    /// `seq_no > last + 1`; messages missing in between.
    Gap,
}

// ============================================================
// CLIENT CHANNEL
// ============================================================

/// Bounded spin on a non-blocking socket before a write gives up.
const WRITE_SPIN_LIMIT: u32 = 10_000;

/// Write half of a client TCP connection.
///
/// Shared between the owning ingress worker (synchronous rejects, logon ack)
/// and the egress router (engine replies); a mutex keeps whole frames from
/// interleaving. The socket is non-blocking; a frame write spins through
/// `WouldBlock` up to a bound, then the channel is dropped as inactive.
#[derive(Debug)]
pub struct ClientChannel {
    stream: Mutex<TcpStream>,
    active: AtomicBool,
}

impl ClientChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
            active: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the channel dead; subsequent writes are dropped.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Frame `fragment` with the TCP length prefix and write it out.
    /// Returns `false` when the message was dropped (channel inactive or
    /// broken).
    pub fn write_frame(&self, fragment: &[u8]) -> bool {
        if !self.is_active() || fragment.len() > MAX_FRAGMENT_SIZE {
            return false;
        }
        let mut frame = [0u8; FRAME_HEADER_SIZE + MAX_FRAGMENT_SIZE];
        let total = write_tcp_frame(&mut frame, fragment);

        let Ok(mut stream) = self.stream.lock() else {
            self.deactivate();
            return false;
        };
        let mut written = 0;
        let mut spins = 0u32;
        while written < total {
            match stream.write(&frame[written..total]) {
                Ok(0) => {
                    self.deactivate();
                    return false;
                }
                Ok(n) => {
                    written += n;
                    spins = 0;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    spins += 1;
                    if spins > WRITE_SPIN_LIMIT {
                        debug!("client channel write stalled, dropping frame");
                        return false;
                    }
                    std::thread::yield_now();
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(error = %e, "client channel write failed");
                    self.deactivate();
                    return false;
                }
            }
        }
        true
    }
}

// ============================================================
// SESSION
// ============================================================

/// One logged-on client session. Gateway-owned; the engine only ever sees
/// the numeric `session_id`.
#[derive(Debug)]
pub struct Session {
    pub session_id: SessionId,
    pub client_id: ClientId,
    channel: Arc<ClientChannel>,
    last_seq_no: AtomicU64,
}

impl Session {
    /// Check `seq_no` against `last_seq_no + 1`; only `Accept` advances.
    ///
    /// Single writer (the owning connection's I/O worker); concurrent
    /// readers observe monotonic values.
    pub fn validate_and_advance(&self, seq_no: SeqNo) -> SeqCheck {
        let last = self.last_seq_no.load(Ordering::Acquire);
        if seq_no == last + 1 {
            self.last_seq_no.store(seq_no, Ordering::Release);
            SeqCheck::Accept
        } else if seq_no <= last {
            SeqCheck::Duplicate
        } else {
            SeqCheck::Gap
        }
    }

    #[inline]
    pub fn last_seq_no(&self) -> SeqNo {
        self.last_seq_no.load(Ordering::Acquire)
    }

    #[inline]
    pub fn channel(&self) -> &Arc<ClientChannel> {
        &self.channel
    }
}

// ============================================================
// REGISTRY
// ============================================================

/// Gateway-wide session map. Session ids are assigned monotonically
/// starting at 1 and never reused.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<FxHashMap<SessionId, Arc<Session>>>,
    next_session_id: AtomicU32,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(FxHashMap::default()),
            next_session_id: AtomicU32::new(1),
        }
    }

    /// Create a session for a freshly logged-on client.
    pub fn register(&self, client_id: ClientId, channel: Arc<ClientChannel>) -> Arc<Session> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session {
            session_id,
            client_id,
            channel,
            last_seq_no: AtomicU64::new(0),
        });
        if let Ok(mut map) = self.sessions.write() {
            map.insert(session_id, Arc::clone(&session));
        }
        session
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .ok()
            .and_then(|map| map.get(&session_id).cloned())
    }

    /// Drop a session on disconnect.
    pub fn remove(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.sessions
            .write()
            .ok()
            .and_then(|mut map| map.remove(&session_id))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
