//! Connection handler for individual push channels.
//!
//! Each accepted stream gets its own `ConnectionHandler` that:
//! - Performs the `connect` handshake and protocol version check
//! - Registers the channel with the registry when it subscribes
//! - Routes heartbeat reports and publish requests
//! - Answers malformed requests with structured error responses
//! - Unregisters the channel when it closes, whatever the reason
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::sync::Arc;

use futures::StreamExt;
use tokio::net::unix::OwnedReadHalf;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use overlord_core::{CoreError, ErrorReport, PeerId, ResourceError, SubscriberId};
use overlord_protocol::{ClientMessage, DaemonMessage, Event, MessageType, ProtocolVersion};

use crate::context::Overlord;
use crate::transport::{SocketTransport, Transport, TransportError};

/// Connection handler for a single push channel.
pub struct ConnectionHandler {
    /// Newline-delimited requests, bounded by `max_message_size`
    lines: FramedRead<OwnedReadHalf, LinesCodec>,

    /// Write side, shared with the registry once subscribed
    transport: Arc<SocketTransport>,

    overlord: Overlord,

    /// Set once the handshake succeeds
    connected: bool,

    /// Registry identity, if the channel subscribed
    subscriber_id: Option<SubscriberId>,

    /// Client-provided label, used only in logs
    label: Option<String>,

    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        transport: Arc<SocketTransport>,
        overlord: Overlord,
        connection_number: u64,
    ) -> Self {
        let max = overlord.config().delivery.max_message_size;
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(max)),
            transport,
            overlord,
            connected: false,
            subscriber_id: None,
            label: None,
            connection_number,
        }
    }

    /// Runs the handler until the channel closes.
    ///
    /// The channel is always unregistered and its transport closed before
    /// this returns.
    pub async fn run(mut self) -> Option<SubscriberId> {
        debug!(connection = self.connection_number, "New channel opened");

        match self.process_messages().await {
            Ok(()) | Err(ConnectionError::Eof) => {}
            Err(e) => debug!(
                connection = self.connection_number,
                subscriber_id = ?self.subscriber_id,
                error = %e,
                "Connection closed"
            ),
        }

        self.transport.close();
        if let Some(id) = self.subscriber_id {
            self.overlord.registry().unregister(id).await;
        }

        info!(
            connection = self.connection_number,
            subscriber_id = ?self.subscriber_id,
            label = ?self.label,
            "Channel closed"
        );
        self.subscriber_id
    }

    /// Main loop: reads lines until EOF, timeout, shutdown or a fatal error.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        let read_timeout = self.overlord.config().delivery.read_timeout();
        let cancel = self.overlord.cancel_token().clone();

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectionError::Shutdown),
                result = timeout(read_timeout, self.read_line()) => match result {
                    Ok(line) => line?,
                    Err(_) => return Err(ConnectionError::Timeout),
                },
            };

            let msg = match parse_message(&line) {
                Ok(msg) => msg,
                Err(report) => {
                    debug!(
                        connection = self.connection_number,
                        kind = report.kind.as_str(),
                        error = %report.errors,
                        "Malformed request"
                    );
                    self.send_message(report.into()).await?;
                    continue;
                }
            };

            if !self.connected && !matches!(msg.message, MessageType::Connect { .. }) {
                let err = CoreError::ConnectionNotReady {
                    operation: operation_name(&msg.message).to_string(),
                };
                self.send_message(ResourceError::new(err).value().into())
                    .await?;
                continue;
            }

            self.handle_message(msg).await?;
        }
    }

    /// Handles a single parsed message. Returns `Eof` on disconnect.
    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { client_id, subscribe } => {
                self.handle_connect(msg.protocol_version, client_id, subscribe)
                    .await?;
            }

            MessageType::Heartbeat { peer } => {
                self.handle_heartbeat(peer).await?;
            }

            MessageType::Publish { message } => {
                self.handle_publish(message).await?;
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(subscriber_id = ?self.subscriber_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    async fn handle_connect(
        &mut self,
        client_version: ProtocolVersion,
        client_id: Option<String>,
        subscribe: bool,
    ) -> Result<(), ConnectionError> {
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        if let Some(subscriber_id) = self.subscriber_id {
            let err = CoreError::AlreadyRegistered { subscriber_id };
            self.send_message(ResourceError::new(err).value().into())
                .await?;
            return Ok(());
        }

        if client_id.is_some() {
            self.label = client_id;
        }

        if subscribe {
            let transport: Arc<dyn Transport> = self.transport.clone();
            let id = self
                .overlord
                .registry()
                .register_labeled(transport, self.label.clone())
                .await;
            self.subscriber_id = Some(id);
        }

        self.connected = true;
        info!(
            connection = self.connection_number,
            subscriber_id = ?self.subscriber_id,
            label = ?self.label,
            "Channel handshake completed"
        );

        self.send_message(DaemonMessage::connected(self.subscriber_id))
            .await
    }

    async fn handle_heartbeat(&mut self, peer: PeerId) -> Result<(), ConnectionError> {
        if peer.as_str().is_empty() {
            let report = ResourceError::new("peer identity must not be empty").invalid("Peer", "");
            return self.send_message(report.into()).await;
        }

        if let Err(e) = self.overlord.report_heartbeat(peer).await {
            error!(error = %e, "Failed to record heartbeat");
            return self
                .send_message(ResourceError::new(e).value().into())
                .await;
        }
        Ok(())
    }

    async fn handle_publish(&mut self, event: Event) -> Result<(), ConnectionError> {
        let kind = event.kind();
        match self.overlord.publish(event).await {
            Ok(report) => {
                debug!(
                    kind,
                    recipients = report.recipients,
                    delivered = report.delivered,
                    "Publish request served"
                );
                self.send_message(DaemonMessage::published(report.recipients, report.delivered))
                    .await
            }
            Err(e) => {
                self.send_message(ResourceError::new(e).value().into())
                    .await
            }
        }
    }

    /// Reads one line from the channel.
    ///
    /// The codec rejects a line as soon as more than `max_message_size`
    /// bytes arrive without a newline, so an unterminated stream never
    /// grows the buffer past the limit.
    async fn read_line(&mut self) -> Result<String, ConnectionError> {
        match self.lines.next().await {
            Some(Ok(line)) => Ok(line),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                let max = self.overlord.config().delivery.max_message_size;
                let report = ResourceError::new(format!("line exceeds {max} bytes")).value();
                // Best effort; the channel is closed either way
                let _ = self.send_message(report.into()).await;
                Err(ConnectionError::MessageTooLarge { max })
            }
            Some(Err(LinesCodecError::Io(e))) => Err(ConnectionError::Io(e.to_string())),
            None => Err(ConnectionError::Eof),
        }
    }

    /// Sends a reply through the channel's transport.
    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::Serialize(e.to_string()))?;
        self.transport.send(&json).await?;
        Ok(())
    }
}

/// Parses one request line.
///
/// Text that is not JSON renders as a JSON error; well-formed JSON that
/// does not describe a known request renders as a value error.
fn parse_message(line: &str) -> Result<ClientMessage, ErrorReport> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| ResourceError::new(e).json())?;
    serde_json::from_value(value).map_err(|e| ResourceError::new(e).value())
}

fn operation_name(message: &MessageType) -> &'static str {
    match message {
        MessageType::Connect { .. } => "connect",
        MessageType::Heartbeat { .. } => "heartbeat",
        MessageType::Publish { .. } => "publish",
        MessageType::Ping { .. } => "ping",
        MessageType::Disconnect => "disconnect",
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Server shutting down")]
    Shutdown,

    #[error("Message too large (max: {max} bytes)")]
    MessageTooLarge { max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));
    }

    #[test]
    fn test_message_size_error() {
        let err = ConnectionError::MessageTooLarge { max: 1_048_576 };
        assert!(err.to_string().contains("1048576"));
    }

    #[test]
    fn test_parse_valid_message() {
        let msg = parse_message(r#"{"protocol_version":{"major":1,"minor":0},"type":"ping","seq":4}"#)
            .unwrap();
        assert!(matches!(msg.message, MessageType::Ping { seq: 4 }));
    }

    #[test]
    fn test_parse_malformed_json_is_json_error() {
        let report = parse_message("{not json").unwrap_err();
        assert_eq!(report.message, "Invalid JSON Object");
        assert!(!report.errors.is_empty());
    }

    #[test]
    fn test_parse_unknown_request_is_value_error() {
        let report = parse_message(r#"{"protocol_version":{"major":1,"minor":0},"type":"teleport"}"#)
            .unwrap_err();
        assert_eq!(report.message, "Value Error");

        let report = parse_message(r#"{"protocol_version":{"major":1,"minor":0},"type":"ping"}"#)
            .unwrap_err();
        assert_eq!(report.message, "Value Error");
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(operation_name(&MessageType::Ping { seq: 1 }), "ping");
        assert_eq!(operation_name(&MessageType::Disconnect), "disconnect");
        assert_eq!(
            operation_name(&MessageType::Heartbeat {
                peer: PeerId::new("node-7")
            }),
            "heartbeat"
        );
    }
}
