//! Overlord daemon - real-time notification core
//!
//! This crate provides the push side of the overlord platform:
//! - `registry` - Live push channels keyed by subscriber identity
//! - `broadcast` - Best-effort fan-out with dead-channel pruning
//! - `heartbeat` - Periodic outbound heartbeat and inbound peer liveness
//! - `server` - Unix socket server for push channels
//! - `context` - The `Overlord` context tying the above together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      overlordd daemon                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   PushServer    │────▶│     ConnectionRegistry      │    │
//! │  │ (Unix Socket)   │     │  (open channels by id)      │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             │ snapshot          │
//! │           │ reports                     ▼                   │
//! │  ┌────────▼────────┐     ┌─────────────────────────────┐    │
//! │  │ HeartbeatActor  │────▶│      BroadcastEngine        │    │
//! │  │ (peer liveness) │alert│  (serialize once, fan out)  │    │
//! │  └─────────────────┘     └──────────────▲──────────────┘    │
//! │                                         │ heartbeat         │
//! │                          ┌──────────────┴──────────────┐    │
//! │                          │      HeartbeatEmitter       │    │
//! │                          └─────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod broadcast;
pub mod config;
pub mod context;
pub mod heartbeat;
pub mod registry;
pub mod server;
pub mod transport;

pub use broadcast::{BroadcastEngine, BroadcastError, BroadcastReport};
pub use config::{ConfigError, OverlordConfig};
pub use context::Overlord;
pub use registry::ConnectionRegistry;
pub use server::PushServer;
