//! Connection registry for live push channels.
//!
//! The registry is the one piece of shared mutable state in the daemon.
//! It is written by connection lifecycle events (register on open,
//! unregister on close) and read by the broadcast engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  register/unregister  ┌───────────────────────────┐
//! │ConnectionHandler │──────────────────────▶│    ConnectionRegistry     │
//! │  (per channel)   │                       │ RwLock<HashMap<Id, Sub>>  │
//! └──────────────────┘                       └─────────────┬─────────────┘
//!                                                          │ snapshot()
//!                                                          ▼
//!                                            ┌───────────────────────────┐
//!                                            │     BroadcastEngine       │
//!                                            │ (iterates without a lock) │
//!                                            └───────────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! Mutations take the write lock. `snapshot()` copies the membership under
//! the read lock and releases it before returning, so an in-flight
//! broadcast never observes a torn set and never blocks registration.

mod subscriber;

pub use subscriber::Subscriber;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use overlord_core::SubscriberId;

use crate::transport::Transport;

/// Registry of currently open push channels, keyed by identity.
///
/// Cheap to clone; all clones share the same membership.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    subscribers: Arc<RwLock<HashMap<SubscriberId, Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a new subscriber and returns its freshly assigned identity.
    pub async fn register(&self, transport: Arc<dyn Transport>) -> SubscriberId {
        self.register_labeled(transport, None).await
    }

    /// Like [`register`](Self::register), with a client label kept for logs.
    pub async fn register_labeled(
        &self,
        transport: Arc<dyn Transport>,
        label: Option<String>,
    ) -> SubscriberId {
        let id = SubscriberId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let subscriber = Subscriber::new(id, transport, label);

        let mut subs = self.subscribers.write().await;
        subs.insert(id, subscriber);

        debug!(
            subscriber_id = %id,
            total_subscribers = subs.len(),
            "Subscriber registered"
        );
        id
    }

    /// Removes a subscriber. Returns false if it was not registered.
    pub async fn unregister(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscribers.write().await;
        let removed = subs.remove(&id).is_some();
        if removed {
            debug!(
                subscriber_id = %id,
                total_subscribers = subs.len(),
                "Subscriber unregistered"
            );
        }
        removed
    }

    /// Copies the current membership for lock-free iteration.
    pub async fn snapshot(&self) -> Vec<Subscriber> {
        self.subscribers.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }

    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().await.contains_key(&id)
    }

    /// Closes and removes every subscriber. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let mut subs = self.subscribers.write().await;
        for sub in subs.values() {
            sub.transport().close();
        }
        let count = subs.len();
        subs.clear();
        count
    }
}
