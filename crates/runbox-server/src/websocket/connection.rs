//! Per-connection handle shared between a session, its command worker, and
//! the registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use runbox_core::{Command, ConnectionId, encode};
use tokio::sync::mpsc;

/// A frame queued for the session's socket writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame carrying an encoded command.
    Text(String),
    /// Keepalive ping.
    Ping,
    /// Close frame; the writer stops after sending it.
    Close {
        /// `WebSocket` close status code.
        code: u16,
        /// Human-readable reason.
        reason: &'static str,
    },
}

/// Protocol state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting inbound commands.
    Open,
    /// A close was issued; no further commands are processed.
    Closing,
    /// Transport closed and deregistered. Terminal.
    Closed,
}

/// Represents a connected `WebSocket` client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the client's socket writer task.
    tx: mpsc::Sender<Outbound>,
    /// When this connection was established.
    pub connected_at: Instant,
    state: Mutex<SessionState>,
    /// When the last Pong was received (or the connection was accepted).
    last_pong: Mutex<Instant>,
    /// Count of frames dropped because the writer queue was full or gone.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection in the `Open` state.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            state: Mutex::new(SessionState::Open),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether the session still accepts commands.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Queue a keepalive ping without waiting.
    ///
    /// Only open sessions are pinged. Returns `false` if the ping was not
    /// queued.
    pub fn ping(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.try_queue(Outbound::Ping)
    }

    /// Encode `command` and queue it, waiting for queue space.
    ///
    /// Used for responses, which must not be dropped while the socket is
    /// still writable. Returns `false` once the session is closed or the
    /// writer has stopped.
    pub async fn send_command(&self, command: &Command) -> bool {
        if self.state() == SessionState::Closed {
            return false;
        }
        let json = encode(command);
        if json.is_empty() {
            return false;
        }
        if self.tx.send(Outbound::Text(json)).await.is_ok() {
            true
        } else {
            self.record_drop();
            false
        }
    }

    /// Move `Open → Closing` and queue a close frame.
    ///
    /// Returns `false` if the session was not open, or if the close frame
    /// could not be queued (the caller should then drop the transport).
    pub fn begin_close(&self, code: u16, reason: &'static str) -> bool {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Open {
                return false;
            }
            *state = SessionState::Closing;
        }
        self.try_queue(Outbound::Close { code, reason })
    }

    /// Mark the transport as fully closed.
    pub fn mark_closed(&self) {
        *self.state.lock() = SessionState::Closed;
    }

    /// Record a pong from the client.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    fn try_queue(&self, frame: Outbound) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            self.record_drop();
            false
        }
    }

    fn record_drop(&self) {
        let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        counter!("ws_dropped_messages_total").increment(1);
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}
