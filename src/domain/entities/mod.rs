//! # Domain Entities
//!
//! Provider traits are implemented in the infrastructure layer, following the
//! dependency inversion principle.

mod room_member;

pub use room_member::RoomMembershipProvider;

#[cfg(test)]
pub use room_member::MockRoomMembershipProvider;
