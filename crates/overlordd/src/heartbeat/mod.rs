//! Heartbeat monitor.
//!
//! Two independent halves:
//!
//! - **Outbound**: [`HeartbeatEmitter`] broadcasts a heartbeat envelope to
//!   every subscriber once per period.
//! - **Inbound**: a [`HeartbeatActor`] owns the last-seen record of every
//!   peer. Transports report peers through a [`HeartbeatHandle`], and a
//!   liveness checker periodically asks the actor which peers are overdue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  Report   ┌────────────────┐  CheckLiveness  ┌──────────────────┐
//! │ Connection   │──────────▶│ HeartbeatActor │◀────────────────│ Liveness checker │
//! │ handlers     │  (mpsc)   │ (PeerTracker)  │                 │ (interval task)  │
//! └──────────────┘           └────────────────┘                 └────────┬─────────┘
//!                                                                        │ alert
//! ┌──────────────┐  heartbeat envelope   ┌─────────────────┐             │
//! │ Emitter task │──────────────────────▶│ BroadcastEngine │◀────────────┘
//! └──────────────┘                       └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Every background task exits on cancellation or channel closure

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use overlord_protocol::Event;

use crate::broadcast::BroadcastEngine;

mod actor;
mod commands;
mod emitter;
mod handle;
mod tracker;

pub use actor::HeartbeatActor;
pub use commands::{HeartbeatCommand, HeartbeatError};
pub use emitter::{spawn_emitter, HeartbeatEmitter};
pub use handle::HeartbeatHandle;
pub use tracker::{PeerSnapshot, PeerTracker};

/// Command channel buffer size
const COMMAND_BUFFER: usize = 256;

/// Spawns the heartbeat actor and returns a handle to it.
///
/// The actor stops once every handle has been dropped.
pub fn spawn_tracker(timeout: Duration) -> HeartbeatHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    tokio::spawn(HeartbeatActor::new(cmd_rx, timeout).run());
    HeartbeatHandle::new(cmd_tx)
}

/// Spawns the periodic liveness check.
///
/// Every `check_interval` the checker asks the actor for overdue peers.
/// A peer is logged at warn level on the check that first finds it overdue
/// and only at debug level on later checks of the same lapse. When
/// `alert_on_missing` is set, each new lapse is also broadcast to
/// subscribers as an alert.
pub fn spawn_liveness_checker(
    handle: HeartbeatHandle,
    engine: BroadcastEngine,
    check_interval: Duration,
    alert_on_missing: bool,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Liveness checker shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    let missing = match handle.check_liveness().await {
                        Ok(missing) => missing,
                        Err(e) => {
                            debug!(error = %e, "Liveness checker stopping");
                            break;
                        }
                    };

                    for lapse in &missing {
                        if !lapse.newly_overdue {
                            debug!(
                                peer = %lapse.peer,
                                elapsed_ms = lapse.elapsed_ms(),
                                "Peer still missing heartbeat"
                            );
                            continue;
                        }

                        warn!(
                            peer = %lapse.peer,
                            elapsed_ms = lapse.elapsed_ms(),
                            timeout_ms = lapse.timeout_ms(),
                            "Missing heartbeat"
                        );

                        if alert_on_missing {
                            if let Err(e) = engine.publish(Event::missing_heartbeat(lapse)).await {
                                error!(peer = %lapse.peer, error = %e, "Failed to broadcast missing heartbeat alert");
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::transport::ChannelTransport;
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_marks_silent_peer_overdue() {
        let handle = spawn_tracker(ms(5000));
        handle.report("node-7").await.unwrap();

        tokio::time::sleep(ms(3000)).await;
        assert!(handle.check_liveness().await.unwrap().is_empty());

        tokio::time::sleep(ms(3000)).await;
        let missing = handle.check_liveness().await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].peer.as_str(), "node-7");
        assert!(missing[0].elapsed > ms(5000));

        handle.report("node-7").await.unwrap();
        assert!(handle.check_liveness().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checker_alerts_once_per_lapse() {
        let registry = ConnectionRegistry::new();
        let (transport, mut rx) = ChannelTransport::pair(16);
        registry.register(Arc::new(transport)).await;
        let engine = BroadcastEngine::new(registry, ms(100));

        let handle = spawn_tracker(ms(1000));
        handle.report("node-7").await.unwrap();

        let cancel = CancellationToken::new();
        let checker =
            spawn_liveness_checker(handle.clone(), engine, ms(500), true, cancel.clone());

        // Overdue from t=1000+, checked at 1500, 2000, 2500...
        tokio::time::sleep(ms(3200)).await;

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["message"]["alert"]["kind"], "missing_heartbeat");
        assert_eq!(frame["message"]["alert"]["peer"], "node-7");
        assert!(rx.try_recv().is_err());

        // Recover, then lapse again
        handle.report("node-7").await.unwrap();
        tokio::time::sleep(ms(2200)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        checker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_checker_alerts_lapse_after_recovery_between_checks() {
        let registry = ConnectionRegistry::new();
        let (transport, mut rx) = ChannelTransport::pair(16);
        registry.register(Arc::new(transport)).await;
        let engine = BroadcastEngine::new(registry, ms(100));

        // Check interval longer than the timeout
        let handle = spawn_tracker(ms(300));
        handle.report("node-7").await.unwrap();

        let cancel = CancellationToken::new();
        let checker =
            spawn_liveness_checker(handle.clone(), engine, ms(1000), true, cancel.clone());

        // Checks run at t=0, 1000, 2000
        tokio::time::sleep(ms(1050)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(ms(50)).await;
        handle.report("node-7").await.unwrap();
        assert_eq!(handle.status("node-7").await, Some(overlord_core::PeerStatus::Alive));

        tokio::time::sleep(ms(950)).await;
        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["message"]["alert"]["peer"], "node-7");
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        checker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_checker_without_alerts_sends_nothing() {
        let registry = ConnectionRegistry::new();
        let (transport, mut rx) = ChannelTransport::pair(16);
        registry.register(Arc::new(transport)).await;
        let engine = BroadcastEngine::new(registry, ms(100));

        let handle = spawn_tracker(ms(1000));
        handle.report("node-7").await.unwrap();

        let cancel = CancellationToken::new();
        let checker = spawn_liveness_checker(handle, engine, ms(500), false, cancel.clone());

        tokio::time::sleep(ms(3000)).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        checker.await.unwrap();
    }
}
