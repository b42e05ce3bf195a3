//! WebSocket Hub
//!
//! Real-time fan-out over one WebSocket connection per identity.
//!
//! - [`Registry`]: identity -> live connection
//! - [`Connection`]: reader and writer loops around one socket
//! - [`Dispatcher`]: user and room broadcasts
//! - [`Envelope`]: the `{"type", "payload"}` wire unit

pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod handler;
pub mod registry;

pub use connection::{
    CloseReason, Connection, ConnectionHandle, ConnectionId, ConnectionState, EnqueueError,
};
pub use dispatcher::Dispatcher;
pub use envelope::{Envelope, Frame};
pub use handler::{attach, ws_handler};
pub use registry::Registry;
