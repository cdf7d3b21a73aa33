//! Periodic outbound heartbeat.
//!
//! Ticks are serialized: the next tick is not taken until the previous
//! broadcast returns. Ticks that fall due while a broadcast is still in
//! flight are skipped and logged as soon as that broadcast finishes, and
//! the schedule restarts one period later.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use overlord_protocol::BroadcastMessage;

use crate::broadcast::{BroadcastEngine, BroadcastError, BroadcastReport};

/// Emits a heartbeat broadcast every period.
pub struct HeartbeatEmitter {
    engine: BroadcastEngine,
    period: Duration,
    info: String,
}

impl HeartbeatEmitter {
    pub fn new(engine: BroadcastEngine, period: Duration, info: impl Into<String>) -> Self {
        Self {
            engine,
            period,
            info: info.into(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Builds and broadcasts a single heartbeat.
    pub async fn tick(&self) -> Result<BroadcastReport, BroadcastError> {
        let message = BroadcastMessage::heartbeat(Utc::now(), self.info.as_str());
        self.engine.broadcast(&message).await
    }

    /// Runs until `cancel` fires. The first heartbeat goes out one period
    /// after start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(period = ?self.period, "Heartbeat emitter started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Heartbeat emitter shutting down");
                    break;
                }

                scheduled = ticker.tick() => {
                    if self.emit(scheduled).await > 0 {
                        ticker.reset();
                    }
                }
            }
        }

        info!("Heartbeat emitter stopped");
    }

    /// Sends the heartbeat scheduled at `scheduled` and returns how many
    /// later ticks fell due before the broadcast finished.
    async fn emit(&self, scheduled: Instant) -> u128 {
        match self.tick().await {
            Ok(report) => debug!(
                recipients = report.recipients,
                delivered = report.delivered,
                pruned = report.pruned.len(),
                "Heartbeat sent"
            ),
            Err(e) => error!(error = %e, "Heartbeat broadcast failed"),
        }

        let overrun = Instant::now().saturating_duration_since(scheduled);
        let skipped = skipped_periods(overrun, self.period);
        if skipped > 0 {
            warn!(
                skipped,
                overrun = ?overrun,
                period = ?self.period,
                "Heartbeat ticks skipped while a broadcast was in flight"
            );
        }
        skipped
    }
}

/// Number of tick deadlines strictly inside `overrun`. A deadline landing
/// exactly when the broadcast finishes still fires on time.
fn skipped_periods(overrun: Duration, period: Duration) -> u128 {
    overrun
        .as_nanos()
        .saturating_sub(1)
        .checked_div(period.as_nanos())
        .unwrap_or(0)
}

/// Spawns the emitter on its own task.
pub fn spawn_emitter(emitter: HeartbeatEmitter, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(emitter.run(cancel))
}
