use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use overlord_core::SubscriberId;

use crate::transport::Transport;

/// A registered push channel.
///
/// Cloning shares the underlying transport handle. Liveness is never
/// stored here; it is probed on the transport at delivery time.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    transport: Arc<dyn Transport>,
    label: Option<String>,
    registered_at: DateTime<Utc>,
}

impl Subscriber {
    pub(crate) fn new(id: SubscriberId, transport: Arc<dyn Transport>, label: Option<String>) -> Self {
        Self {
            id,
            transport,
            label,
            registered_at: Utc::now(),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Client-supplied label from the handshake, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("open", &self.transport.is_open())
            .finish()
    }
}
