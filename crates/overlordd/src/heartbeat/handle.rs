//! Client interface for the heartbeat actor.

use tokio::sync::{mpsc, oneshot};

use overlord_core::{MissingHeartbeat, PeerId, PeerStatus};

use super::commands::{HeartbeatCommand, HeartbeatError};
use super::tracker::PeerSnapshot;

/// Cheap-to-clone handle to the heartbeat actor.
///
/// This is the seam for inbound heartbeat transports: anything that can
/// learn "peer X is alive" calls [`report`](Self::report).
#[derive(Clone)]
pub struct HeartbeatHandle {
    sender: mpsc::Sender<HeartbeatCommand>,
}

impl HeartbeatHandle {
    pub fn new(sender: mpsc::Sender<HeartbeatCommand>) -> Self {
        Self { sender }
    }

    /// Records a heartbeat from `peer` at the current instant.
    ///
    /// # Errors
    ///
    /// - `HeartbeatError::ChannelClosed` if the actor has shut down
    pub async fn report(&self, peer: impl Into<PeerId>) -> Result<(), HeartbeatError> {
        self.sender
            .send(HeartbeatCommand::Report { peer: peer.into() })
            .await
            .map_err(|_| HeartbeatError::ChannelClosed)
    }

    /// Returns the peers whose last report is older than the timeout.
    ///
    /// # Errors
    ///
    /// - `HeartbeatError::ChannelClosed` if the actor has shut down
    pub async fn check_liveness(&self) -> Result<Vec<MissingHeartbeat>, HeartbeatError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HeartbeatCommand::CheckLiveness { respond_to: tx })
            .await
            .map_err(|_| HeartbeatError::ChannelClosed)?;

        rx.await.map_err(|_| HeartbeatError::ChannelClosed)
    }

    /// Returns `None` for unknown peers or if the actor is gone.
    pub async fn status(&self, peer: impl Into<PeerId>) -> Option<PeerStatus> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HeartbeatCommand::GetStatus {
                peer: peer.into(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Returns an empty list if the actor is gone.
    pub async fn peers(&self) -> Vec<PeerSnapshot> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(HeartbeatCommand::ListPeers { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }
}
