//! # Domain Layer
//!
//! The hub treats users and rooms as opaque keys owned by the external
//! store. The only domain contract the hub depends on is the room
//! membership lookup used to fan room events out to connected members.
//!
//! ## Structure
//!
//! - **entities**: Room membership and its provider trait

pub mod entities;

pub use entities::*;

/// Authenticated identity a connection belongs to
pub type UserId = i64;

/// Chat room key
pub type RoomId = i64;
