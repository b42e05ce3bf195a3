//! # Chat Hub Library
//!
//! The real-time connection hub of a chat backend:
//! - One WebSocket connection per authenticated identity
//! - Bounded per-connection outbound queues; slow consumers are evicted
//! - Best-effort fan-out of events to a user or to a room's active members
//!
//! Persistence, authentication and the REST surface live elsewhere; they
//! only hand the hub authenticated sockets and events to broadcast.
//!
//! ## Module Structure
//!
//! ```text
//! chat_hub/
//! +-- config/         Configuration management
//! +-- domain/         Identity types and the room membership contract
//! +-- infrastructure/ Database pool, membership repository, metrics
//! +-- presentation/   HTTP routes, auth middleware and the WebSocket hub
//! +-- shared/         Common error type
//! ```

// Configuration module
pub mod config;

// Domain layer - Identities and provider traits
pub mod domain;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
