//! Protocol message types for push channels.
//!
//! Two families of messages travel over a channel:
//! - [`BroadcastMessage`]: the event envelope fanned out to every subscriber,
//!   `{"message": {<kind>: <payload>}}`
//! - [`ClientMessage`] / [`DaemonMessage`]: the control protocol (handshake,
//!   peer heartbeat reports, publish requests, ping)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::version::ProtocolVersion;
use overlord_core::{ErrorReport, MissingHeartbeat, PeerId, SubscriberId, HEARTBEAT_INFO};

// ============================================================================
// Broadcast Envelope
// ============================================================================

/// Payload of a `heartbeat` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Unix timestamp (seconds) of the tick
    pub time: i64,
    /// Informational tag
    pub info: String,
}

/// Event kinds carried by a broadcast.
///
/// Externally tagged, so each variant serializes as `{"<kind>": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// Periodic liveness signal emitted by the daemon
    Heartbeat(HeartbeatPayload),
    /// Operator-facing warning
    Alert(Value),
    /// Generic business event supplied by a collaborator
    Message(Value),
}

impl Event {
    /// Creates a heartbeat event for the given instant.
    pub fn heartbeat(at: DateTime<Utc>, info: impl Into<String>) -> Self {
        Self::Heartbeat(HeartbeatPayload {
            time: at.timestamp(),
            info: info.into(),
        })
    }

    /// Creates the alert raised for a peer whose heartbeat is overdue.
    pub fn missing_heartbeat(missing: &MissingHeartbeat) -> Self {
        Self::Alert(json!({
            "kind": "missing_heartbeat",
            "peer": missing.peer.as_str(),
            "elapsed_ms": missing.elapsed_ms(),
            "timeout_ms": missing.timeout_ms(),
        }))
    }

    /// Returns the wire name of this event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat(_) => "heartbeat",
            Self::Alert(_) => "alert",
            Self::Message(_) => "message",
        }
    }
}

/// Immutable message delivered to every subscriber.
///
/// The creation timestamp is local metadata; only the event is written to
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// The event being broadcast
    pub message: Event,

    /// When this message was built
    #[serde(skip, default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl BroadcastMessage {
    /// Wraps an event, stamping it with the current time.
    pub fn new(message: Event) -> Self {
        Self {
            message,
            created_at: Utc::now(),
        }
    }

    /// Creates the periodic heartbeat broadcast.
    pub fn heartbeat(at: DateTime<Utc>, info: impl Into<String>) -> Self {
        Self {
            message: Event::heartbeat(at, info),
            created_at: at,
        }
    }

    /// Creates a heartbeat carrying the default informational tag.
    pub fn periodic_heartbeat(at: DateTime<Utc>) -> Self {
        Self::heartbeat(at, HEARTBEAT_INFO)
    }

    /// Returns the wire name of the carried event kind.
    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }
}

impl From<Event> for BroadcastMessage {
    fn from(event: Event) -> Self {
        Self::new(event)
    }
}

// ============================================================================
// Client -> Daemon
// ============================================================================

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Channel-open handshake
    Connect {
        /// Free-form client label, used only in logs
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        /// Register this channel for broadcasts; peers that only report
        /// heartbeats or publish events set this to false
        #[serde(default = "default_subscribe")]
        subscribe: bool,
    },

    /// Heartbeat report from a peer process
    Heartbeat {
        /// Identity of the reporting peer
        peer: PeerId,
    },

    /// Request to broadcast an event to all subscribers
    Publish {
        /// The event to broadcast
        message: Event,
    },

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

fn default_subscribe() -> bool {
    true
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Handshake for a subscribing channel.
    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect {
            client_id,
            subscribe: true,
        })
    }

    /// Handshake for a channel that only pushes (peer heartbeats, publishers).
    pub fn connect_publisher(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect {
            client_id,
            subscribe: false,
        })
    }

    pub fn heartbeat(peer: impl Into<PeerId>) -> Self {
        Self::new(MessageType::Heartbeat { peer: peer.into() })
    }

    pub fn publish(message: Event) -> Self {
        Self::new(MessageType::Publish { message })
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

// ============================================================================
// Daemon -> Client
// ============================================================================

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Handshake accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Identity assigned by the registry (absent for non-subscribing channels)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subscriber_id: Option<SubscriberId>,
    },

    /// Handshake rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Outcome of a publish request
    Published {
        /// Subscribers in the snapshot
        recipients: usize,
        /// Subscribers that received the event
        delivered: usize,
    },

    /// Structured error response
    Error {
        /// Human readable message
        message: String,
        /// Underlying failure detail
        errors: String,
    },
}

impl DaemonMessage {
    pub fn connected(subscriber_id: Option<SubscriberId>) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            subscriber_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn published(recipients: usize, delivered: usize) -> Self {
        Self::Published {
            recipients,
            delivered,
        }
    }
}

impl From<ErrorReport> for DaemonMessage {
    fn from(report: ErrorReport) -> Self {
        Self::Error {
            message: report.message,
            errors: report.errors,
        }
    }
}
