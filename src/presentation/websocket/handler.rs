//! WebSocket Upgrade Handler
//!
//! Entry point for authenticated clients: upgrades the request, registers
//! the connection and starts its loops.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{Sink, Stream, StreamExt};

use super::connection::{Connection, ConnectionHandle};
use super::registry::Registry;
use crate::domain::UserId;
use crate::presentation::middleware::AuthUser;
use crate::startup::AppState;

/// WebSocket upgrade handler
///
/// The identity comes from the auth middleware; the hub does not validate it.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    let settings = &state.settings.websocket;
    let capacity = settings.outbound_queue_capacity;
    let registry = Arc::clone(&state.registry);

    tracing::debug!(
        user_id = user.user_id,
        username = %user.username,
        "WebSocket upgrade requested"
    );

    ws.max_message_size(settings.max_message_size)
        .max_frame_size(settings.max_frame_size)
        .on_failed_upgrade(move |e| {
            tracing::warn!(user_id = user.user_id, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_socket(socket, registry, user.user_id, capacity))
}

/// Handle an upgraded socket
async fn handle_socket(socket: WebSocket, registry: Arc<Registry>, user_id: UserId, capacity: usize) {
    // Split socket for concurrent read/write
    let (sink, stream) = socket.split();
    attach(registry, user_id, capacity, stream, sink).await;
}

/// Register a new connection for `user_id` over the given socket halves and
/// start its loops.
pub async fn attach<S, K, E>(
    registry: Arc<Registry>,
    user_id: UserId,
    capacity: usize,
    stream: S,
    sink: K,
) -> Arc<ConnectionHandle>
where
    S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
    K: Sink<Message> + Unpin + Send + 'static,
    K::Error: fmt::Display + Send,
{
    let connection = Connection::new(user_id, capacity);
    let handle = Arc::clone(connection.handle());

    registry.register(Arc::clone(&handle)).await;
    connection.spawn(stream, sink, registry);

    handle
}
