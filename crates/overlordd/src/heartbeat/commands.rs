//! Heartbeat actor commands and errors.

use thiserror::Error;
use tokio::sync::oneshot;

use overlord_core::{MissingHeartbeat, PeerId, PeerStatus};

use super::tracker::PeerSnapshot;

/// Commands sent to the heartbeat actor.
///
/// Queries carry a oneshot channel for the reply; reports are
/// fire-and-forget. The command channel is FIFO, so a check issued after a
/// report always observes it.
#[derive(Debug)]
pub enum HeartbeatCommand {
    /// Record a heartbeat from a peer.
    Report {
        peer: PeerId,
    },

    /// Find peers past the timeout and mark them overdue.
    CheckLiveness {
        respond_to: oneshot::Sender<Vec<MissingHeartbeat>>,
    },

    /// Look up a single peer's status.
    GetStatus {
        peer: PeerId,
        respond_to: oneshot::Sender<Option<PeerStatus>>,
    },

    /// List every known peer.
    ListPeers {
        respond_to: oneshot::Sender<Vec<PeerSnapshot>>,
    },
}

/// Errors that can occur when talking to the heartbeat actor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeartbeatError {
    /// The actor has shut down.
    #[error("heartbeat channel closed")]
    ChannelClosed,
}
