//! WebSocket Connection
//!
//! One live socket for one identity. The [`ConnectionHandle`] is what the
//! registry stores and the dispatcher enqueues onto; the socket halves are
//! owned by the reader and writer loops started by [`Connection::spawn`].
//!
//! ```text
//! Connecting --register--> Active --teardown--> Closing --loops joined--> Closed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::envelope::{Envelope, Frame, PING};
use super::registry::Registry;
use crate::domain::UserId;

/// Serialized reply to a client `ping`
const PONG_FRAME: &str = r#"{"type":"pong"}"#;

/// Unique id of one connection; distinguishes successive connections of the
/// same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Teardown has started (or finished)
    pub fn is_closing(&self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

/// Why a connection was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended
    ClientClosed,
    ReadError,
    WriteError,
    /// A newer connection registered for the same identity
    Replaced,
    /// Outbound queue overflowed
    SlowConsumer,
    Unregistered,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::ReadError => "read_error",
            CloseReason::WriteError => "write_error",
            CloseReason::Replaced => "replaced",
            CloseReason::SlowConsumer => "slow_consumer",
            CloseReason::Unregistered => "unregistered",
            CloseReason::Shutdown => "shutdown",
        }
    }

    /// Reasons where the server, not the peer or its socket, ended the connection
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            CloseReason::Replaced | CloseReason::SlowConsumer | CloseReason::Unregistered
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-blocking enqueue failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

/// Shared side of a connection.
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    connected_at: DateTime<Utc>,
    /// Only sender of the outbound queue; `None` once closed.
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    closing: AtomicBool,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Time since the socket was accepted
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Push a frame onto the outbound queue without waiting.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(EnqueueError::Closed)?;
        sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Resolves once both loops have exited.
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// `Connecting -> Active`. Fails if teardown already started.
    pub(crate) fn activate(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Active;
                true
            } else {
                false
            }
        })
    }

    /// Claims the teardown. Only the first caller gets `true`.
    pub(crate) fn begin_close(&self) -> bool {
        self.closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn close_outbound(&self) {
        self.outbound.lock().take();
    }

    /// Stops both loops, which release the socket halves.
    pub(crate) fn publish_closing(&self) {
        self.state.send_if_modified(|state| {
            if state.is_closing() {
                false
            } else {
                *state = ConnectionState::Closing;
                true
            }
        });
    }

    fn publish_closed(&self) {
        self.state.send_replace(ConnectionState::Closed);
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .finish()
    }
}

/// A connection that has not been started yet.
pub struct Connection {
    handle: Arc<ConnectionHandle>,
    outbound: mpsc::Receiver<Frame>,
}

impl Connection {
    /// Create a connection with a bounded outbound queue of `capacity` frames.
    pub fn new(user_id: UserId, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let handle = Arc::new(ConnectionHandle {
            id: ConnectionId::new(),
            user_id,
            connected_at: Utc::now(),
            outbound: Mutex::new(Some(tx)),
            closing: AtomicBool::new(false),
            state,
        });

        Self {
            handle,
            outbound: rx,
        }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    #[cfg(test)]
    pub(crate) fn into_parts(self) -> (Arc<ConnectionHandle>, mpsc::Receiver<Frame>) {
        (self.handle, self.outbound)
    }

    /// Start the reader and writer loops over the two socket halves.
    ///
    /// The returned task joins both loops: whichever ends first triggers
    /// teardown through `registry`, the other is then stopped, and the
    /// connection is marked `Closed`.
    pub fn spawn<S, K, E>(self, stream: S, sink: K, registry: Arc<Registry>) -> JoinHandle<()>
    where
        S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
        K: Sink<Message> + Unpin + Send + 'static,
        K::Error: fmt::Display + Send,
    {
        let Connection { handle, outbound } = self;

        tokio::spawn(async move {
            let mut reader = tokio::spawn(read_loop(stream, Arc::clone(&handle)));
            let mut writer = tokio::spawn(write_loop(sink, outbound, Arc::clone(&handle)));

            tracing::debug!(
                user_id = handle.user_id(),
                connection_id = %handle.id(),
                "Connection loops started"
            );

            let (exit, reader_first) = tokio::select! {
                exit = &mut reader => (exit, true),
                exit = &mut writer => (exit, false),
            };
            let remaining = if reader_first { writer } else { reader };

            let reason = exit.unwrap_or_else(|e| {
                tracing::error!(
                    user_id = handle.user_id(),
                    connection_id = %handle.id(),
                    error = %e,
                    "Connection loop aborted"
                );
                Some(if reader_first {
                    CloseReason::ReadError
                } else {
                    CloseReason::WriteError
                })
            });

            if let Some(reason) = reason {
                registry.evict(&handle, reason);
            }

            if let Err(e) = remaining.await {
                tracing::error!(
                    user_id = handle.user_id(),
                    connection_id = %handle.id(),
                    error = %e,
                    "Connection loop aborted"
                );
            }

            // The teardown may be owned by another caller still finishing it.
            let mut state = handle.watch_state();
            wait_closing(&mut state).await;
            handle.publish_closed();

            tracing::debug!(
                user_id = handle.user_id(),
                connection_id = %handle.id(),
                "Connection closed"
            );
        })
    }
}

async fn wait_closing(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(ConnectionState::is_closing).await;
}

/// Reads client frames until the socket fails, the peer closes, or teardown
/// starts. Returns the reason when the loop itself ended the connection.
async fn read_loop<S, E>(mut stream: S, handle: Arc<ConnectionHandle>) -> Option<CloseReason>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let mut state = handle.watch_state();

    loop {
        let next = tokio::select! {
            biased;
            _ = wait_closing(&mut state) => return None,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if let Err(reason) = handle_text(&handle, text.as_str()) {
                    return Some(reason);
                }
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(
                    user_id = handle.user_id(),
                    connection_id = %handle.id(),
                    frame = ?frame,
                    "Client initiated close"
                );
                return Some(CloseReason::ClientClosed);
            }
            // Binary payloads are not part of the protocol; ping/pong control
            // frames are answered by the socket layer.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(
                    user_id = handle.user_id(),
                    connection_id = %handle.id(),
                    error = %e,
                    "WebSocket receive error"
                );
                return Some(CloseReason::ReadError);
            }
            None => return Some(CloseReason::ClientClosed),
        }
    }
}

/// Handle one inbound text frame. Malformed input never ends the connection.
fn handle_text(handle: &ConnectionHandle, text: &str) -> Result<(), CloseReason> {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(
                user_id = handle.user_id(),
                error = %e,
                "Discarding malformed frame"
            );
            return Ok(());
        }
    };

    if !envelope.is(PING) {
        tracing::trace!(
            user_id = handle.user_id(),
            kind = %envelope.kind,
            "Ignoring inbound envelope"
        );
        return Ok(());
    }

    match handle.try_enqueue(Frame::from(PONG_FRAME)) {
        Ok(()) => Ok(()),
        Err(EnqueueError::Full) => Err(CloseReason::SlowConsumer),
        // Teardown in progress; the loop observes it next.
        Err(EnqueueError::Closed) => Ok(()),
    }
}

/// Drains the outbound queue in order into the socket.
async fn write_loop<K>(
    mut sink: K,
    mut outbound: mpsc::Receiver<Frame>,
    handle: Arc<ConnectionHandle>,
) -> Option<CloseReason>
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    let mut state = handle.watch_state();

    loop {
        let frame = tokio::select! {
            biased;
            _ = wait_closing(&mut state) => return None,
            frame = outbound.recv() => frame?,
        };

        let result = tokio::select! {
            biased;
            _ = wait_closing(&mut state) => return None,
            result = sink.send(Message::Text(frame)) => result,
        };

        if let Err(e) = result {
            tracing::debug!(
                user_id = handle.user_id(),
                connection_id = %handle.id(),
                error = %e,
                "WebSocket send error"
            );
            return Some(CloseReason::WriteError);
        }
    }
}
