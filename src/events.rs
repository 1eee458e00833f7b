//! Normalized view of inbound Matrix events.
//!
//! The sync layer delivers events in many SDK-specific shapes (timeline
//! events, stripped state events, to-device events). The runtime only cares
//! about a small common denominator: who sent what, where, and when. This
//! module defines that denominator so the admission filter, the auto-join
//! handler and the command router can be written (and tested) without
//! touching SDK event types.

use matrix_sdk::ruma::{
    MilliSecondsSinceUnixEpoch, OwnedEventId, OwnedRoomId, OwnedUserId,
    events::room::member::MembershipState,
};

/// A single inbound room event, normalized for the runtime.
///
/// Constructed once per sync callback and dropped when processing of that
/// event finishes; nothing in the runtime retains it.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// The event id assigned by the homeserver. Absent for stripped state
    /// events, which are delivered without one.
    pub event_id: Option<OwnedEventId>,
    /// The user that sent the event.
    pub sender: OwnedUserId,
    /// The room the event belongs to.
    pub room_id: OwnedRoomId,
    /// Server timestamp of the event's origin.
    ///
    /// Absent for stripped state events (e.g. invites received while the
    /// bot is not yet a room member).
    pub origin_timestamp: Option<MilliSecondsSinceUnixEpoch>,
    /// The typed payload of the event.
    pub content: EventContent,
}

/// The payload variants the runtime distinguishes.
#[derive(Debug, Clone)]
pub enum EventContent {
    /// A plain text message body.
    Text(String),
    /// An encrypted message that was not yet decrypted when the event was
    /// delivered. The router obtains the plaintext through a bounded wait.
    Encrypted,
    /// A membership change. `state_key` is the user the change applies to.
    Member {
        state_key: OwnedUserId,
        membership: MembershipState,
    },
    /// Anything else (images, reactions, unrelated state events, ...).
    Other,
}

impl InboundEvent {
    /// The text body, if this is a plain text message.
    pub fn text_body(&self) -> Option<&str> {
        match &self.content {
            EventContent::Text(body) => Some(body),
            _ => None,
        }
    }
}
