//! Repository Implementations
//!
//! PostgreSQL implementations of domain provider traits.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sqlx::PgPool;
//! use crate::infrastructure::repositories::PgRoomMemberRepository;
//!
//! fn membership(pool: PgPool) -> Arc<dyn RoomMembershipProvider> {
//!     Arc::new(PgRoomMemberRepository::new(pool))
//! }
//! ```

pub mod room_member_repository;

pub use room_member_repository::PgRoomMemberRepository;
