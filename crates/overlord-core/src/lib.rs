//! Overlord Core - Shared types for the notification layer
//!
//! This crate provides the identity types, the error taxonomy and the
//! liveness conditions shared between the daemon (overlordd) and the
//! wire protocol.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod heartbeat;
pub mod id;

// Re-exports for convenience
pub use error::{CoreError, ErrorKind, ErrorReport, ResourceError};
pub use heartbeat::{MissingHeartbeat, PeerStatus, HEARTBEAT_INFO};
pub use id::{PeerId, SubscriberId, SUBSCRIBER_ID_PREFIX};
