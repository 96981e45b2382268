//! matchgate - partitioned ultra-low-latency equities OMS
//!
//! Binary order messages arrive on client TCP sessions, are validated and
//! sequenced by the gateway, routed over per-partition streams to a sharded
//! matching engine, and the resulting acks, fills, cancels and rejects are
//! routed back to the originating client channel.
//!
//! ```text
//! client -> frame reassembly -> sequence check -> partition publish
//!        -> engine poll -> match -> outbound publish -> egress router -> client
//! ```
//!
//! # Modules
//!
//! - [`core_types`] - type aliases, price scale, clock
//! - [`config`] - application configuration (YAML)
//! - [`models`] - side / time-in-force / reject-reason enums
//! - [`codec`] - fixed-layout binary message encode/decode
//! - [`pool`] - arena-backed order and price-level pools
//! - [`orderbook`] - per-instrument price-time limit order book
//! - [`engine`] - single-threaded partition workers
//! - [`session`] - session registry and sequence validation
//! - [`gateway`] - TCP accept loop and ingress workers
//! - [`egress`] - outbound event router
//! - [`transport`] - per-partition message streams
//! - [`perf`] - latency sampling
//! - [`logging`] - tracing subscriber setup

// Core types - must be first!
pub mod core_types;

// Configuration and observability
pub mod config;
pub mod logging;
pub mod perf;

// Matching core
pub mod models;
pub mod orderbook;
pub mod pool;

// Messaging fabric
pub mod codec;
pub mod transport;

// Gateway and engine workers
pub mod egress;
pub mod engine;
pub mod gateway;
pub mod session;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use core_types::{
    ClientId, InstrumentId, OrderId, PRICE_SCALE, PartitionId, SeqNo, SessionId,
};
pub use engine::{EnginePartition, PartitionStats};
pub use gateway::{GatewayHandle, GatewayStats};
pub use models::{RejectReason, Side, TimeInForce};
pub use orderbook::{Execution, LimitOrderBook};
pub use session::{SeqCheck, Session, SessionRegistry};
pub use transport::{PartitionTransport, PublishResult, ShutdownSignal, partition_of};
