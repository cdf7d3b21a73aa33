//! Overlord Protocol - Wire protocol for push channels
//!
//! This crate provides the broadcast envelope delivered to subscribers and
//! the control messages exchanged between clients, peers and the daemon.

pub mod message;
pub mod version;

pub use message::{
    BroadcastMessage, ClientMessage, DaemonMessage, Event, HeartbeatPayload, MessageType,
};
pub use version::ProtocolVersion;
