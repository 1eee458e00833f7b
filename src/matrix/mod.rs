//! Matrix protocol integration.
//!
//! The runtime core never drives the SDK client directly: everything goes
//! through the [`MatrixApi`] trait, which covers exactly the collaborator
//! surface the runtime needs (identity, sync control, room transport, and
//! two lazily-materialized views used with the bounded wait). The
//! production implementation is [`client::MatrixClient`]; tests use the
//! generated [`MockMatrixApi`].
//!
//! Submodules:
//! - [`client`] - the SDK-backed [`MatrixApi`] implementation
//! - `session` - login session persistence across restarts
//! - `sync` - SDK event handler registration and event normalization

use anyhow::Error;
use async_trait::async_trait;
use futures::stream::BoxStream;
use mockall::automock;

use matrix_sdk::ruma::{EventId, OwnedRoomId, OwnedUserId, RoomId};
use serde_json::Value;

pub mod client;
mod session;
mod sync;

pub use crate::matrix::client::MatrixClient;
pub use crate::matrix::sync::register_event_handlers;

/// Reported state of the underlying sync stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync loop is running.
    Stopped,
    /// The sync loop has been requested but has not delivered yet.
    Starting,
    /// The sync loop is delivering events.
    Running,
}

impl SyncState {
    /// Whether the stream still has to quiesce before shutdown can finish.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Starting | SyncState::Running)
    }
}

/// The bot's relationship to a room, as currently known locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomMembership {
    Invited,
    Joined,
    Left,
    Knocked,
    Banned,
}

/// Abstraction over the underlying Matrix client.
///
/// Connection management, encryption, retry/backoff and local persistence
/// all live behind this trait; the runtime only invokes bounded accessors
/// and opaque side-effecting calls. Mirrors the transport contract of the
/// runtime: message/reaction/state sends, room joins, and the two snapshot
/// streams consumed through [`crate::utils::first_with_timeout`].
#[automock]
#[async_trait]
pub trait MatrixApi: Send + Sync {
    /// The bot's own user id.
    fn user_id(&self) -> OwnedUserId;

    /// Starts the event stream. Events are delivered through the handlers
    /// registered on the concrete client.
    async fn start_sync(&self) -> Result<(), Error>;

    /// Requests the event stream to stop. Idempotent.
    async fn stop_sync(&self);

    /// Current state of the event stream.
    fn sync_state(&self) -> SyncState;

    /// Accepts an invitation by joining the room.
    async fn join_room(&self, room_id: &RoomId) -> Result<(), Error>;

    /// Snapshot stream of the bot's membership in a room. Yields `None`
    /// while the room is not yet materialized in the local store.
    fn room_membership(&self, room_id: &RoomId) -> BoxStream<'static, Option<RoomMembership>>;

    /// Snapshot stream of an event's plaintext body. Yields `None` until
    /// the event is materialized and decrypted locally.
    fn event_content(&self, room_id: &RoomId, event_id: &EventId)
    -> BoxStream<'static, Option<String>>;

    /// Sends a plain text message to a room.
    async fn send_text(&self, room_id: &RoomId, body: &str) -> Result<(), Error>;

    /// Sends a markdown-formatted message to a room.
    async fn send_markdown(&self, room_id: &RoomId, body: &str) -> Result<(), Error>;

    /// Sends a reaction to an existing event.
    async fn send_reaction(&self, room_id: &RoomId, target: &EventId, key: &str)
    -> Result<(), Error>;

    /// Fetches the content of a state event, or `None` if the room has no
    /// such state.
    async fn get_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
    ) -> Result<Option<Value>, Error>;

    /// Sends a state event with raw JSON content.
    async fn set_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<(), Error>;

    /// The rooms the bot has currently joined.
    async fn joined_rooms(&self) -> Result<Vec<OwnedRoomId>, Error>;

    /// Sets the bot's global display name.
    async fn set_display_name(&self, name: &str) -> Result<(), Error>;

    /// Sets the bot's display name in a single room.
    async fn set_room_display_name(&self, room_id: &RoomId, name: &str) -> Result<(), Error>;

    /// Invalidates every session of the bot's account.
    async fn logout_all(&self) -> Result<(), Error>;
}
