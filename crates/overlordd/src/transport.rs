//! Push-channel transports.
//!
//! The broadcast engine never reaches into a channel's internals: it asks
//! [`Transport::is_open`] and looks at the result of [`Transport::send`].
//!
//! - [`SocketTransport`]: newline-delimited JSON over a Unix stream
//! - [`ChannelTransport`]: bounded in-process queue, never blocks

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// Write side of an open push channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns false once the channel is known to be closed.
    fn is_open(&self) -> bool;

    /// Writes one serialized frame.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Marks the channel closed; later sends fail with [`TransportError::Closed`].
    fn close(&self);
}

/// Errors raised while writing to a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("transport queue full")]
    Full,

    #[error("I/O error: {0}")]
    Io(String),
}

// ============================================================================
// Unix socket
// ============================================================================

/// Unix-socket write half shared between a connection handler and the
/// broadcast engine.
pub struct SocketTransport {
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    open: AtomicBool,
    write_timeout: Duration,
}

impl SocketTransport {
    pub fn new(writer: OwnedWriteHalf, write_timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            open: AtomicBool::new(true),
            write_timeout,
        }
    }
}

impl fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTransport")
            .field("open", &self.is_open())
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let mut writer = self.writer.lock().await;
        let result = timeout(self.write_timeout, async {
            writer.write_all(frame.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await;

        // Any failure leaves the stream in an unknown state
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.close();
                Err(TransportError::Io(e.to_string()))
            }
            Err(_) => {
                self.close();
                Err(TransportError::WriteTimeout(self.write_timeout))
            }
        }
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

// ============================================================================
// In-process channel
// ============================================================================

/// Transport backed by a bounded mpsc queue.
///
/// Sends use `try_send`, so a consumer that stops draining its queue gets
/// [`TransportError::Full`] instead of stalling the broadcast.
#[derive(Debug)]
pub struct ChannelTransport {
    sender: mpsc::Sender<String>,
    closed: AtomicBool,
}

impl ChannelTransport {
    /// Creates a transport and the receiver its frames arrive on.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let transport = Self {
            sender,
            closed: AtomicBool::new(false),
        };
        (transport, receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.sender
            .try_send(frame.to_string())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Full,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::UnixStream;

    #[tokio::test]
    async fn test_channel_transport_delivers() {
        let (transport, mut rx) = ChannelTransport::pair(4);
        assert!(transport.is_open());

        transport.send("{\"a\":1}").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_channel_transport_closed_when_receiver_dropped() {
        let (transport, rx) = ChannelTransport::pair(4);
        drop(rx);

        assert!(!transport.is_open());
        assert_eq!(transport.send("x").await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_channel_transport_full_does_not_block() {
        let (transport, _rx) = ChannelTransport::pair(1);
        transport.send("first").await.unwrap();
        assert_eq!(transport.send("second").await, Err(TransportError::Full));
    }

    #[tokio::test]
    async fn test_channel_transport_close() {
        let (transport, _rx) = ChannelTransport::pair(1);
        transport.close();
        assert!(!transport.is_open());
        assert_eq!(transport.send("x").await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_socket_transport_writes_lines() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let (_read, write) = ours.into_split();
        let transport = SocketTransport::new(write, Duration::from_secs(1));

        transport.send("{\"n\":1}").await.unwrap();
        transport.send("{\"n\":2}").await.unwrap();

        let mut lines = BufReader::new(theirs).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "{\"n\":1}");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "{\"n\":2}");
    }

    #[tokio::test]
    async fn test_socket_transport_fails_after_peer_closes() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let (_read, write) = ours.into_split();
        let transport = SocketTransport::new(write, Duration::from_secs(1));
        drop(theirs);

        // The first write may still land in the kernel buffer; one of the
        // next few must observe the broken pipe.
        let mut failed = false;
        for _ in 0..8 {
            if transport.send("payload").await.is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
        assert!(!transport.is_open());
    }
}
