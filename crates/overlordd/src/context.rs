//! Daemon context.
//!
//! [`Overlord`] owns every long-lived component (configuration, connection
//! registry, broadcast engine, heartbeat actor handle, shutdown token) and
//! the background tasks that drive them. It is cheap to clone and is
//! passed explicitly to whoever needs it; nothing in the daemon is global.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use overlord_core::PeerId;
use overlord_protocol::Event;

use crate::broadcast::{BroadcastEngine, BroadcastError, BroadcastReport};
use crate::config::{ConfigError, OverlordConfig};
use crate::heartbeat::{
    spawn_emitter, spawn_liveness_checker, spawn_tracker, HeartbeatEmitter, HeartbeatError,
    HeartbeatHandle,
};
use crate::registry::ConnectionRegistry;

/// Shared daemon state plus its background tasks.
#[derive(Clone)]
pub struct Overlord {
    config: Arc<OverlordConfig>,
    registry: ConnectionRegistry,
    engine: BroadcastEngine,
    heartbeat: HeartbeatHandle,
    cancel: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Overlord {
    /// Validates the configuration, builds the components and spawns the
    /// heartbeat tasks.
    ///
    /// Must be called from within a tokio runtime. The emitter is only
    /// started when `heartbeat.enabled` is set; the peer tracker and
    /// liveness checker always run.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` if a timer period or limit is zero
    pub fn start(config: OverlordConfig, cancel: CancellationToken) -> Result<Self, ConfigError> {
        config.validate()?;

        let registry = ConnectionRegistry::new();
        let engine = BroadcastEngine::new(registry.clone(), config.delivery.write_timeout());
        let heartbeat = spawn_tracker(config.heartbeat.timeout());

        let mut tasks = Vec::with_capacity(2);

        if config.heartbeat.enabled {
            let emitter = HeartbeatEmitter::new(
                engine.clone(),
                config.heartbeat.period(),
                config.heartbeat.info.clone(),
            );
            tasks.push(spawn_emitter(emitter, cancel.child_token()));
        } else {
            info!("Outbound heartbeat disabled");
        }

        tasks.push(spawn_liveness_checker(
            heartbeat.clone(),
            engine.clone(),
            config.heartbeat.check_interval(),
            config.heartbeat.alert_on_missing,
            cancel.child_token(),
        ));

        info!(
            period_ms = config.heartbeat.period_ms,
            timeout_ms = config.heartbeat.timeout_ms,
            write_timeout_ms = config.delivery.write_timeout_ms,
            "Overlord started"
        );

        Ok(Self {
            config: Arc::new(config),
            registry,
            engine,
            heartbeat,
            cancel,
            tasks: Arc::new(Mutex::new(tasks)),
        })
    }

    pub fn config(&self) -> &OverlordConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &BroadcastEngine {
        &self.engine
    }

    pub fn heartbeat(&self) -> &HeartbeatHandle {
        &self.heartbeat
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Broadcasts an application event to every subscriber.
    pub async fn publish(&self, event: Event) -> Result<BroadcastReport, BroadcastError> {
        self.engine.publish(event).await
    }

    /// Records an inbound heartbeat from `peer`.
    pub async fn report_heartbeat(&self, peer: impl Into<PeerId>) -> Result<(), HeartbeatError> {
        self.heartbeat.report(peer).await
    }

    /// Cancels the background tasks, waits for them, then closes and
    /// unregisters every remaining subscriber.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let closed = self.registry.clear().await;
        debug!(closed, "Registry cleared");
        info!("Overlord stopped");
    }
}
