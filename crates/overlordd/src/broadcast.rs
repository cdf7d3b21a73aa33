//! Broadcast engine: best-effort fan-out to every registered subscriber.
//!
//! A message is serialized once, then written to each subscriber in a
//! registry snapshot. Deliveries run concurrently and each one is bounded
//! by the write timeout, so one stalled channel cannot hold up the rest.
//! Any subscriber found closed, or whose write fails, is unregistered.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use overlord_core::SubscriberId;
use overlord_protocol::{BroadcastMessage, Event};

use crate::registry::{ConnectionRegistry, Subscriber};
use crate::transport::TransportError;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers in the snapshot the broadcast iterated
    pub recipients: usize,
    /// Subscribers the frame was written to
    pub delivered: usize,
    /// Subscribers removed because they were unreachable
    pub pruned: Vec<SubscriberId>,
}

/// Errors that fail a whole broadcast.
///
/// Per-subscriber failures are never surfaced here.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Failed to serialize broadcast message: {0}")]
    Serialize(String),
}

/// Delivers messages to every subscriber in the registry.
#[derive(Clone)]
pub struct BroadcastEngine {
    registry: ConnectionRegistry,
    write_timeout: Duration,
}

impl BroadcastEngine {
    pub fn new(registry: ConnectionRegistry, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Wraps an event in a timestamped envelope and broadcasts it.
    pub async fn publish(&self, event: Event) -> Result<BroadcastReport, BroadcastError> {
        let message = BroadcastMessage::new(event);
        let report = self.broadcast(&message).await?;
        debug!(
            kind = message.kind(),
            recipients = report.recipients,
            delivered = report.delivered,
            pruned = report.pruned.len(),
            "Event published"
        );
        Ok(report)
    }

    /// Serializes `message` once and delivers it to the current snapshot.
    ///
    /// Fails only when serialization fails, in which case nothing is sent.
    pub async fn broadcast<M>(&self, message: &M) -> Result<BroadcastReport, BroadcastError>
    where
        M: Serialize + ?Sized,
    {
        let frame: Arc<str> = serde_json::to_string(message)
            .map_err(|e| {
                error!(error = %e, "Failed to serialize broadcast message");
                BroadcastError::Serialize(e.to_string())
            })?
            .into();

        let subscribers = self.registry.snapshot().await;
        if subscribers.is_empty() {
            return Ok(BroadcastReport::default());
        }

        let outcomes = join_all(subscribers.iter().map(|sub| self.deliver(sub, &frame))).await;

        let mut report = BroadcastReport {
            recipients: subscribers.len(),
            ..BroadcastReport::default()
        };

        for (sub, outcome) in subscribers.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    sub.transport().close();
                    self.registry.unregister(sub.id()).await;
                    report.pruned.push(sub.id());
                }
            }
        }

        if !report.pruned.is_empty() {
            debug!(
                pruned = report.pruned.len(),
                remaining = report.delivered,
                "Removed unreachable subscribers"
            );
        }

        Ok(report)
    }

    /// Writes one frame to one subscriber.
    async fn deliver(&self, sub: &Subscriber, frame: &str) -> Result<(), TransportError> {
        if !sub.transport().is_open() {
            error!(subscriber_id = %sub.id(), "Push channel does not exist anymore");
            return Err(TransportError::Closed);
        }

        match timeout(self.write_timeout, sub.transport().send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(
                    subscriber_id = %sub.id(),
                    label = ?sub.label(),
                    registered_at = %sub.registered_at(),
                    error = %e,
                    "Failed to deliver broadcast"
                );
                Err(e)
            }
            Err(_) => {
                warn!(
                    subscriber_id = %sub.id(),
                    registered_at = %sub.registered_at(),
                    timeout = ?self.write_timeout,
                    "Broadcast write timed out"
                );
                Err(TransportError::WriteTimeout(self.write_timeout))
            }
        }
    }
}
