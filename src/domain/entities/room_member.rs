//! Room membership contract.
//!
//! Maps to the `chat_room_members` table: a member is active while its
//! `left_at` column is NULL.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::{RoomId, UserId};
use crate::shared::error::AppError;

/// Answers "which identities currently belong to room R".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomMembershipProvider: Send + Sync {
    /// Identities whose membership in `room_id` has not been terminated.
    ///
    /// A failure is reported as an error, never as a partial set.
    async fn active_room_members(&self, room_id: RoomId) -> Result<HashSet<UserId>, AppError>;
}
