//! Peer liveness records.
//!
//! Pure state: every operation takes the current instant, so the actor
//! passes `Instant::now()` and tests pass whatever timeline they need.
//!
//! ```text
//!   Unknown ──report──▶ Alive ──check (elapsed > timeout)──▶ Overdue
//!                         ▲                                     │
//!                         └───────────────report────────────────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use overlord_core::{MissingHeartbeat, PeerId, PeerStatus};

#[derive(Debug, Clone)]
struct HeartbeatRecord {
    last_seen: Instant,
    status: PeerStatus,
    reports: u64,
}

/// Point-in-time view of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    pub peer: PeerId,
    pub status: PeerStatus,
    pub since_last_report: Duration,
    pub reports: u64,
}

/// Last-seen bookkeeping for every peer that has ever reported.
#[derive(Debug)]
pub struct PeerTracker {
    timeout: Duration,
    records: HashMap<PeerId, HeartbeatRecord>,
}

impl PeerTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            records: HashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Records a report. Returns the status the peer had before it, or
    /// `None` if the peer was unknown.
    pub fn report_at(&mut self, peer: PeerId, now: Instant) -> Option<PeerStatus> {
        match self.records.get_mut(&peer) {
            Some(record) => {
                let previous = record.status;
                record.last_seen = now;
                record.status = PeerStatus::Alive;
                record.reports += 1;
                Some(previous)
            }
            None => {
                self.records.insert(
                    peer,
                    HeartbeatRecord {
                        last_seen: now,
                        status: PeerStatus::Alive,
                        reports: 1,
                    },
                );
                None
            }
        }
    }

    /// Returns every peer whose last report is strictly older than the
    /// timeout, marking them overdue. Records are kept.
    ///
    /// `newly_overdue` is set only on the check that moves a record out of
    /// `Alive`, so each lapse is flagged exactly once however often the
    /// peer recovers between checks.
    pub fn check_at(&mut self, now: Instant) -> Vec<MissingHeartbeat> {
        let mut missing: Vec<MissingHeartbeat> = self
            .records
            .iter_mut()
            .filter_map(|(peer, record)| {
                let elapsed = now.saturating_duration_since(record.last_seen);
                if elapsed > self.timeout {
                    let newly_overdue = record.status == PeerStatus::Alive;
                    record.status = PeerStatus::Overdue;
                    Some(MissingHeartbeat {
                        peer: peer.clone(),
                        elapsed,
                        timeout: self.timeout,
                        newly_overdue,
                    })
                } else {
                    None
                }
            })
            .collect();

        missing.sort_by(|a, b| a.peer.cmp(&b.peer));
        missing
    }

    pub fn status(&self, peer: &PeerId) -> Option<PeerStatus> {
        self.records.get(peer).map(|r| r.status)
    }

    /// All known peers, sorted by identity.
    pub fn peers_at(&self, now: Instant) -> Vec<PeerSnapshot> {
        let mut peers: Vec<PeerSnapshot> = self
            .records
            .iter()
            .map(|(peer, record)| PeerSnapshot {
                peer: peer.clone(),
                status: record.status,
                since_last_report: now.saturating_duration_since(record.last_seen),
                reports: record.reports,
            })
            .collect();
        peers.sort_by(|a, b| a.peer.cmp(&b.peer));
        peers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
