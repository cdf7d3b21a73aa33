//! Peer liveness states and the missing-heartbeat condition.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PeerId;

/// Fixed informational tag carried by every outbound heartbeat.
pub const HEARTBEAT_INFO: &str = "periodic_ws_send";

/// Advisory liveness state of a monitored peer.
///
/// A peer with no record is "unknown" and has no status at all.
/// `Overdue` is never terminal: the next report moves it back to `Alive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Alive,
    Overdue,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alive => write!(f, "alive"),
            Self::Overdue => write!(f, "overdue"),
        }
    }
}

/// A peer whose last heartbeat is older than the configured timeout.
///
/// Reported to the operator; it never removes the peer's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingHeartbeat {
    pub peer: PeerId,
    pub elapsed: Duration,
    pub timeout: Duration,
    /// True when this check moved the peer from `Alive` to `Overdue`,
    /// false when the peer was already overdue at the previous check.
    pub newly_overdue: bool,
}

impl MissingHeartbeat {
    /// Elapsed time since the last report, in whole milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    /// Configured timeout, in whole milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for MissingHeartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "heartbeat from {} not received on time ({}ms since last report, timeout {}ms)",
            self.peer,
            self.elapsed_ms(),
            self.timeout_ms()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_heartbeat_display() {
        let missing = MissingHeartbeat {
            peer: PeerId::new("node-7"),
            elapsed: Duration::from_millis(6000),
            timeout: Duration::from_millis(5000),
            newly_overdue: true,
        };
        let text = missing.to_string();
        assert!(text.contains("node-7"));
        assert!(text.contains("6000ms"));
        assert!(text.contains("5000ms"));
    }

    #[test]
    fn test_peer_status_serde() {
        let json = serde_json::to_string(&PeerStatus::Overdue).unwrap();
        assert_eq!(json, "\"overdue\"");
    }
}
