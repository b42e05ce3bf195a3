//! Event Dispatcher
//!
//! Producer-facing broadcast API. Every broadcast is fire-and-forget: the
//! envelope is serialized once, the shared frame is enqueued without blocking
//! on each connected target, and nothing is reported back to the producer.
//! A target that is offline is indistinguishable from one whose frame was
//! delivered and then lost.

use std::sync::Arc;

use super::connection::{CloseReason, ConnectionHandle, EnqueueError};
use super::envelope::{Envelope, Frame};
use super::registry::Registry;
use crate::domain::{RoomId, RoomMembershipProvider, UserId};
use crate::infrastructure::metrics;

/// Outcome of one fan-out, for logging only
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Delivery {
    enqueued: usize,
    evicted: usize,
}

/// Routes events to the connections of a user or of a room's members.
pub struct Dispatcher {
    registry: Arc<Registry>,
    membership: Arc<dyn RoomMembershipProvider>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, membership: Arc<dyn RoomMembershipProvider>) -> Self {
        Self {
            registry,
            membership,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Send an event to one identity. Dropped if it is not connected.
    pub fn broadcast_to_user(&self, user_id: UserId, envelope: &Envelope) {
        let Some(frame) = encode(envelope) else {
            return;
        };

        let delivery = self.deliver(&frame, [user_id]);
        metrics::record_broadcast("user", "dispatched");

        tracing::debug!(
            user_id = user_id,
            kind = %envelope.kind,
            enqueued = delivery.enqueued,
            "User broadcast dispatched"
        );
    }

    /// Send an event to every connected active member of a room.
    ///
    /// If the membership lookup fails the broadcast is abandoned for all
    /// recipients.
    pub async fn broadcast_to_room(&self, room_id: RoomId, envelope: &Envelope) {
        let Some(frame) = encode(envelope) else {
            return;
        };

        let members = match self.membership.active_room_members(room_id).await {
            Ok(members) => members,
            Err(e) => {
                metrics::record_broadcast("room", "abandoned");
                tracing::warn!(
                    room_id = room_id,
                    kind = %envelope.kind,
                    error = %e,
                    "Room broadcast abandoned: membership lookup failed"
                );
                return;
            }
        };

        let delivery = self.deliver(&frame, members);
        metrics::record_broadcast("room", "dispatched");

        tracing::debug!(
            room_id = room_id,
            kind = %envelope.kind,
            enqueued = delivery.enqueued,
            evicted = delivery.evicted,
            "Room broadcast dispatched"
        );
    }

    /// Enqueue `frame` on each connected target. Connections whose queue is
    /// full are evicted once the registry read lock has been released.
    fn deliver<I>(&self, frame: &Frame, targets: I) -> Delivery
    where
        I: IntoIterator<Item = UserId>,
    {
        let mut delivery = Delivery::default();
        let mut slow: Vec<Arc<ConnectionHandle>> = Vec::new();

        self.registry.for_each(targets, |connection| {
            match connection.try_enqueue(frame.clone()) {
                Ok(()) => delivery.enqueued += 1,
                Err(EnqueueError::Full) => slow.push(Arc::clone(connection)),
                // Already tearing down.
                Err(EnqueueError::Closed) => {}
            }
        });

        for connection in slow {
            if self.registry.evict(&connection, CloseReason::SlowConsumer) {
                delivery.evicted += 1;
            }
        }

        metrics::HUB_FRAMES_ENQUEUED_TOTAL.inc_by(delivery.enqueued as u64);
        delivery
    }
}

fn encode(envelope: &Envelope) -> Option<Frame> {
    match envelope.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(
                kind = %envelope.kind,
                error = %e,
                "Failed to serialize envelope, broadcast dropped"
            );
            None
        }
    }
}
