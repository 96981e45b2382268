//! End-to-end tests over real TCP: gateway ingress, partitioned engines,
//! egress routing back to the originating client.

use matchgate::codec::{
    self, CancelRequest, FRAME_HEADER_SIZE, Logon, MAX_FRAGMENT_SIZE, NewOrderTcp,
};
use matchgate::config::AppConfig;
use matchgate::egress::{self, EgressStats};
use matchgate::engine::{self, EnginePartition, PartitionStats};
use matchgate::gateway::{self, GatewayStats};
use matchgate::models::{RejectReason, Side, TimeInForce};
use matchgate::perf::LatencyStats;
use matchgate::session::SessionRegistry;
use matchgate::transport::{PartitionTransport, ShutdownSignal};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const PRICE_100: i64 = 100_000_000;

struct TestSystem {
    addr: SocketAddr,
    shutdown: Arc<ShutdownSignal>,
    gateway: gateway::GatewayHandle,
    workers: Vec<JoinHandle<()>>,
}

impl TestSystem {
    fn boot() -> Self {
        let config = AppConfig {
            partitions: 4,
            gateway_port: 0, // ephemeral
            backpressure_queue_limit: 1024,
            order_pool_capacity: 256,
            level_pool_capacity: 64,
            metrics_interval_secs: 0,
            ..AppConfig::default()
        };

        let shutdown = Arc::new(ShutdownSignal::new());
        let transport = Arc::new(PartitionTransport::new(
            config.partitions,
            config.inbound_stream_base,
            config.outbound_stream_base,
            config.backpressure_queue_limit,
        ));
        let registry = Arc::new(SessionRegistry::new());

        let mut workers = Vec::new();
        for p in 0..config.partitions {
            let partition = EnginePartition::new(
                p,
                config.order_pool_capacity,
                config.level_pool_capacity,
                Arc::new(PartitionStats::new()),
            );
            let transport = Arc::clone(&transport);
            let shutdown = Arc::clone(&shutdown);
            workers.push(thread::spawn(move || {
                engine::run_partition(partition, transport, shutdown)
            }));
        }

        {
            let transport = Arc::clone(&transport);
            let registry = Arc::clone(&registry);
            let shutdown = Arc::clone(&shutdown);
            workers.push(thread::spawn(move || {
                egress::run_egress(
                    transport,
                    registry,
                    shutdown,
                    Arc::new(EgressStats::new()),
                    Arc::new(Mutex::new(LatencyStats::new(1, 1000))),
                )
            }));
        }

        let gateway = gateway::spawn_gateway(
            &config,
            transport,
            registry,
            Arc::clone(&shutdown),
            Arc::new(GatewayStats::new()),
        )
        .expect("gateway failed to start");

        Self {
            addr: gateway.local_addr,
            shutdown,
            gateway,
            workers,
        }
    }

    fn stop(self) {
        self.shutdown.request_shutdown();
        self.gateway.join();
        for w in self.workers {
            let _ = w.join();
        }
    }
}

struct Client {
    stream: TcpStream,
    session_id: u32,
    seq: u64,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            stream,
            session_id: 0,
            seq: 0,
        }
    }

    fn send_fragment(&mut self, fragment: &[u8]) {
        let mut frame = [0u8; FRAME_HEADER_SIZE + MAX_FRAGMENT_SIZE];
        let total = codec::write_tcp_frame(&mut frame, fragment);
        self.stream.write_all(&frame[..total]).expect("write");
    }

    fn read_msg(&mut self) -> (u8, Vec<u8>) {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        self.stream.read_exact(&mut header).expect("frame header");
        let len = u16::from_le_bytes(header) as usize;
        assert!(len >= 1);
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).expect("frame body");
        (body[0], body[1..].to_vec())
    }

    fn logon(&mut self, client_id: u64) {
        let mut buf = [0u8; MAX_FRAGMENT_SIZE];
        let n = codec::encode_logon(
            &mut buf,
            &Logon {
                session_id: 0,
                client_id,
            },
        );
        self.send_fragment(&buf[..n]);
        let (msg_type, payload) = self.read_msg();
        assert_eq!(msg_type, codec::MSG_LOGON_ACK);
        self.session_id = codec::decode_logon_ack(&payload).unwrap().session_id;
        assert!(self.session_id >= 1);
    }

    fn send_order_raw(
        &mut self,
        seq: u64,
        instrument_id: u32,
        side: Side,
        tif: TimeInForce,
        price: i64,
        qty: u64,
    ) {
        let mut buf = [0u8; MAX_FRAGMENT_SIZE];
        let n = codec::encode_new_order_tcp(
            &mut buf,
            &NewOrderTcp {
                session_id: self.session_id,
                client_id: 0,
                client_seq_no: seq,
                instrument_id,
                side,
                tif,
                price,
                qty,
                recv_ts_nanos: 0,
            },
        );
        self.send_fragment(&buf[..n]);
    }

    /// Send the next in-sequence order and return the acked internal id.
    fn send_order(&mut self, instrument_id: u32, side: Side, price: i64, qty: u64) -> u64 {
        self.seq += 1;
        self.send_order_raw(self.seq, instrument_id, side, TimeInForce::Gtc, price, qty);
        let (msg_type, payload) = self.read_msg();
        assert_eq!(msg_type, codec::MSG_ACK, "expected ACK");
        let ack = codec::decode_ack(&payload).unwrap();
        assert_eq!(ack.session_id, self.session_id);
        assert_eq!(ack.client_seq_no, self.seq);
        assert_eq!(ack.instrument_id, instrument_id);
        ack.internal_order_id
    }

    fn send_cancel(&mut self, internal_order_id: u64, instrument_id: u32) {
        // Cancels are not sequence-checked; the seq number is only echoed.
        let mut buf = [0u8; MAX_FRAGMENT_SIZE];
        let n = codec::encode_cancel_request(
            &mut buf,
            &CancelRequest {
                session_id: self.session_id,
                client_seq_no: self.seq,
                internal_order_id,
                instrument_id,
            },
        );
        self.send_fragment(&buf[..n]);
    }
}

#[test]
fn logon_then_order_is_acked() {
    let system = TestSystem::boot();
    let mut client = Client::connect(system.addr);
    client.logon(42);
    assert_eq!(client.session_id, 1);

    let id = client.send_order(7, Side::Buy, PRICE_100, 10);
    assert!(id >= 1);

    system.stop();
}

#[test]
fn cross_routes_fills_to_both_sessions() {
    let system = TestSystem::boot();

    let mut alice = Client::connect(system.addr);
    alice.logon(1);
    let mut bob = Client::connect(system.addr);
    bob.logon(2);

    let passive_id = alice.send_order(7, Side::Sell, PRICE_100, 50);
    let aggressor_id = bob.send_order(7, Side::Buy, PRICE_100, 50);

    // Bob (aggressor) gets a FILL addressed to him, on his side.
    let (msg_type, payload) = bob.read_msg();
    assert_eq!(msg_type, codec::MSG_FILL);
    let fill = codec::decode_fill(&payload).unwrap();
    assert_eq!(fill.internal_order_id, aggressor_id);
    assert_eq!(fill.session_id, bob.session_id);
    assert_eq!(fill.side, Side::Buy);
    assert_eq!(fill.fill_price, PRICE_100);
    assert_eq!(fill.fill_qty, 50);
    assert_eq!(fill.leaves_qty, 0);

    // Alice (passive) gets her own FILL with her side.
    let (msg_type, payload) = alice.read_msg();
    assert_eq!(msg_type, codec::MSG_FILL);
    let fill = codec::decode_fill(&payload).unwrap();
    assert_eq!(fill.internal_order_id, passive_id);
    assert_eq!(fill.session_id, alice.session_id);
    assert_eq!(fill.side, Side::Sell);
    assert_eq!(fill.fill_qty, 50);
    assert_eq!(fill.leaves_qty, 0);

    system.stop();
}

#[test]
fn partial_fill_reports_leaves_on_both_sides() {
    let system = TestSystem::boot();

    let mut alice = Client::connect(system.addr);
    alice.logon(1);
    let mut bob = Client::connect(system.addr);
    bob.logon(2);

    alice.send_order(9, Side::Sell, PRICE_100, 30);
    bob.send_order(9, Side::Buy, PRICE_100, 100);

    let (_, payload) = bob.read_msg();
    let fill = codec::decode_fill(&payload).unwrap();
    assert_eq!(fill.fill_qty, 30);
    assert_eq!(fill.leaves_qty, 70);

    let (_, payload) = alice.read_msg();
    let fill = codec::decode_fill(&payload).unwrap();
    assert_eq!(fill.fill_qty, 30);
    assert_eq!(fill.leaves_qty, 0);

    system.stop();
}

#[test]
fn duplicate_and_gap_sequence_numbers_are_rejected() {
    let system = TestSystem::boot();
    let mut client = Client::connect(system.addr);
    client.logon(5);

    client.send_order(3, Side::Buy, PRICE_100, 10); // seq 1 acked

    // Replay seq 1.
    client.send_order_raw(1, 3, Side::Buy, TimeInForce::Gtc, PRICE_100, 10);
    let (msg_type, payload) = client.read_msg();
    assert_eq!(msg_type, codec::MSG_REJECT);
    let reject = codec::decode_reject(&payload).unwrap();
    assert_eq!(reject.reason, RejectReason::DuplicateSeqNo);
    assert_eq!(reject.client_seq_no, 1);

    // Jump to seq 5.
    client.send_order_raw(5, 3, Side::Buy, TimeInForce::Gtc, PRICE_100, 10);
    let (msg_type, payload) = client.read_msg();
    assert_eq!(msg_type, codec::MSG_REJECT);
    assert_eq!(
        codec::decode_reject(&payload).unwrap().reason,
        RejectReason::SeqNoGap
    );

    // The expected next value still works.
    let id = client.send_order(3, Side::Buy, 99_000_000, 10);
    assert!(id >= 1);

    system.stop();
}

#[test]
fn order_before_logon_is_rejected() {
    let system = TestSystem::boot();
    let mut client = Client::connect(system.addr);

    client.send_order_raw(1, 7, Side::Buy, TimeInForce::Gtc, PRICE_100, 10);
    let (msg_type, payload) = client.read_msg();
    assert_eq!(msg_type, codec::MSG_REJECT);
    assert_eq!(
        codec::decode_reject(&payload).unwrap().reason,
        RejectReason::SessionNotLoggedOn
    );

    system.stop();
}

#[test]
fn invalid_qty_and_price_are_rejected() {
    let system = TestSystem::boot();
    let mut client = Client::connect(system.addr);
    client.logon(5);

    client.seq += 1;
    client.send_order_raw(client.seq, 7, Side::Buy, TimeInForce::Gtc, PRICE_100, 0);
    let (msg_type, payload) = client.read_msg();
    assert_eq!(msg_type, codec::MSG_REJECT);
    assert_eq!(
        codec::decode_reject(&payload).unwrap().reason,
        RejectReason::InvalidQty
    );

    client.seq += 1;
    client.send_order_raw(client.seq, 7, Side::Buy, TimeInForce::Gtc, -5, 10);
    let (msg_type, payload) = client.read_msg();
    assert_eq!(msg_type, codec::MSG_REJECT);
    assert_eq!(
        codec::decode_reject(&payload).unwrap().reason,
        RejectReason::InvalidPrice
    );

    system.stop();
}

#[test]
fn cancel_round_trip_and_miss() {
    let system = TestSystem::boot();
    let mut client = Client::connect(system.addr);
    client.logon(5);

    let id = client.send_order(11, Side::Buy, PRICE_100, 25);

    client.send_cancel(id, 11);
    let (msg_type, payload) = client.read_msg();
    assert_eq!(msg_type, codec::MSG_CANCEL_ACK);
    let ack = codec::decode_cancel_ack(&payload).unwrap();
    assert_eq!(ack.internal_order_id, id);
    assert_eq!(ack.session_id, client.session_id);

    // Cancelling again misses.
    client.send_cancel(id, 11);
    let (msg_type, payload) = client.read_msg();
    assert_eq!(msg_type, codec::MSG_REJECT);
    assert_eq!(
        codec::decode_reject(&payload).unwrap().reason,
        RejectReason::OrderNotFound
    );

    system.stop();
}

#[test]
fn instruments_shard_to_independent_partitions() {
    let system = TestSystem::boot();
    let mut client = Client::connect(system.addr);
    client.logon(5);

    // Instruments 0..4 land on four different partitions with 4 shards;
    // each order is acked by its owning engine.
    for instrument in 0..4u32 {
        let id = client.send_order(instrument, Side::Buy, PRICE_100, 1);
        assert!(id >= 1);
    }

    // Same-instrument cross still matches within its partition.
    let mut other = Client::connect(system.addr);
    other.logon(6);
    other.send_order(2, Side::Sell, PRICE_100, 1);

    let (msg_type, payload) = client.read_msg();
    assert_eq!(msg_type, codec::MSG_FILL);
    assert_eq!(codec::decode_fill(&payload).unwrap().instrument_id, 2);

    system.stop();
}

#[test]
fn frames_split_across_tcp_writes_reassemble() {
    let system = TestSystem::boot();
    let mut client = Client::connect(system.addr);

    // Hand-feed a logon frame one byte at a time.
    let mut frag = [0u8; MAX_FRAGMENT_SIZE];
    let n = codec::encode_logon(
        &mut frag,
        &Logon {
            session_id: 0,
            client_id: 77,
        },
    );
    let mut frame = [0u8; FRAME_HEADER_SIZE + MAX_FRAGMENT_SIZE];
    let total = codec::write_tcp_frame(&mut frame, &frag[..n]);
    for byte in &frame[..total] {
        client.stream.write_all(std::slice::from_ref(byte)).unwrap();
        thread::sleep(Duration::from_millis(1));
    }

    let (msg_type, _) = client.read_msg();
    assert_eq!(msg_type, codec::MSG_LOGON_ACK);

    system.stop();
}
