//! Heartbeat actor - owns the peer liveness records.
//!
//! Receives commands over an mpsc channel and processes them one at a time,
//! so the tracker never needs a lock.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use overlord_core::PeerStatus;

use super::commands::HeartbeatCommand;
use super::tracker::PeerTracker;

/// The heartbeat actor.
pub struct HeartbeatActor {
    receiver: mpsc::Receiver<HeartbeatCommand>,
    tracker: PeerTracker,
}

impl HeartbeatActor {
    pub fn new(receiver: mpsc::Receiver<HeartbeatCommand>, timeout: Duration) -> Self {
        Self {
            receiver,
            tracker: PeerTracker::new(timeout),
        }
    }

    /// Processes commands until every handle is dropped.
    pub async fn run(mut self) {
        info!(timeout = ?self.tracker.timeout(), "Heartbeat actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd, Instant::now());
        }

        info!(peers = self.tracker.len(), "Heartbeat actor stopped");
    }

    fn handle_command(&mut self, cmd: HeartbeatCommand, now: Instant) {
        match cmd {
            HeartbeatCommand::Report { peer } => {
                let previous = self.tracker.report_at(peer.clone(), now);
                match previous {
                    None => info!(peer = %peer, "First heartbeat from peer"),
                    Some(PeerStatus::Overdue) => {
                        info!(peer = %peer, "Peer heartbeat recovered")
                    }
                    Some(_) => debug!(peer = %peer, "Heartbeat reported"),
                }
            }
            HeartbeatCommand::CheckLiveness { respond_to } => {
                let missing = self.tracker.check_at(now);
                // Ignore send error - caller may have given up waiting
                let _ = respond_to.send(missing);
            }
            HeartbeatCommand::GetStatus { peer, respond_to } => {
                let _ = respond_to.send(self.tracker.status(&peer));
            }
            HeartbeatCommand::ListPeers { respond_to } => {
                let _ = respond_to.send(self.tracker.peers_at(now));
            }
        }
    }
}
