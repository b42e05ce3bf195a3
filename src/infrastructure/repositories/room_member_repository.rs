//! Room Member Repository Implementation
//!
//! PostgreSQL implementation of the RoomMembershipProvider trait.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::{RoomId, RoomMembershipProvider, UserId};
use crate::shared::error::AppError;

/// PostgreSQL room membership lookups against `chat_room_members`.
#[derive(Clone)]
pub struct PgRoomMemberRepository {
    pool: PgPool,
}

impl PgRoomMemberRepository {
    /// Create a new PgRoomMemberRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomMembershipProvider for PgRoomMemberRepository {
    /// Members that have not left the room.
    async fn active_room_members(&self, room_id: RoomId) -> Result<HashSet<UserId>, AppError> {
        let members = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT user_id::BIGINT FROM chat_room_members
            WHERE room_id = $1 AND left_at IS NULL
            "#,
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(members.into_iter().collect())
    }
}
