use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a live WebSocket connection.
///
/// Ids are allocated from a process-wide counter and never reused, so they
/// can key the registry's reverse index without any reference to the socket
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> ConnectionId {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receiving half of a connection's outbound frame queue.
///
/// The transport task drains this into the socket sink; everything else
/// holds a `ConnectionHandle` and pushes frames through it.
pub type FrameReceiver = mpsc::UnboundedReceiver<Message>;

/// A cheap, cloneable handle to one client connection.
///
/// The handle owns nothing: the transport task owns the socket, and the
/// registry only keeps handle clones that it drops again on disconnect.
/// Sending never blocks; a frame sent to a connection that is already gone
/// is discarded, and the disconnect reconciliation that follows removes the
/// stale handle from the registry.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    frames: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    /// Creates a handle together with the queue end the transport drains.
    pub fn new() -> (ConnectionHandle, FrameReceiver) {
        let (frames, receiver) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            id: ConnectionId::next(),
            frames,
        };

        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a text frame for delivery to this client.
    pub fn send_text(&self, text: String) {
        self.send(Message::Text(text));
    }

    /// Queues a binary frame for delivery to this client.
    pub fn send_binary(&self, data: Vec<u8>) {
        self.send(Message::Binary(data));
    }

    /// Queues a close frame; the transport shuts the socket down after
    /// flushing everything queued before it.
    pub fn close(&self) {
        self.send(Message::Close(None));
    }

    fn send(&self, message: Message) {
        if self.frames.send(message).is_err() {
            debug!("dropping frame for closed connection {}", self.id);
        }
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &ConnectionHandle) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
