//! Room authorization oracle.
//!
//! Matrix rooms carry an `m.room.power_levels` state event mapping users to
//! integer permission tiers and actions to required thresholds. This module
//! fetches that table on demand and answers capability questions about it.
//!
//! Every check fetches a fresh snapshot; nothing is cached here. A caller
//! that needs a consistent view across several checks should fetch one
//! [`PowerLevels`] and query it directly. All checks fail closed: if the
//! table cannot be fetched or parsed, the minimum level is assumed and
//! every capability is denied.

use std::collections::HashMap;

use log::error;
use matrix_sdk::ruma::{OwnedUserId, RoomId, UserId};
use serde::Deserialize;

use crate::bot::MatrixBot;
use crate::matrix::MatrixApi;

/// Power level required for administrator privileges in a room.
pub const ADMIN_POWER_LEVEL: i64 = 100;

/// Power level required for moderator privileges in a room.
pub const MOD_POWER_LEVEL: i64 = 50;

/// Minimum power level, assumed when no table can be fetched.
pub const MIN_POWER_LEVEL: i64 = 0;

/// State event type carrying the authorization table.
const POWER_LEVELS_EVENT_TYPE: &str = "m.room.power_levels";

fn default_state_threshold() -> i64 {
    50
}

/// Snapshot of a room's `m.room.power_levels` content.
///
/// Field defaults follow the Matrix specification: absent maps are empty,
/// absent thresholds are `0` except `state_default`, which is `50`.
#[derive(Debug, Clone, Deserialize)]
pub struct PowerLevels {
    /// Per-user level overrides.
    #[serde(default)]
    pub users: HashMap<OwnedUserId, i64>,
    /// Level of every user without an override.
    #[serde(default)]
    pub users_default: i64,
    /// Threshold for inviting other users.
    #[serde(default)]
    pub invite: i64,
    /// Per-event-type threshold overrides, shared between message and
    /// state events.
    #[serde(default)]
    pub events: HashMap<String, i64>,
    /// Threshold for message events without an override.
    #[serde(default)]
    pub events_default: i64,
    /// Threshold for state events without an override.
    #[serde(default = "default_state_threshold")]
    pub state_default: i64,
}

impl PowerLevels {
    /// The effective level of a user: the per-user override or the default.
    pub fn level_for(&self, user: &UserId) -> i64 {
        self.users.get(user).copied().unwrap_or(self.users_default)
    }

    /// Whether a user may invite others.
    pub fn can_invite(&self, user: &UserId) -> bool {
        self.level_for(user) >= self.invite
    }

    /// Whether a user may send a state event of the given type (or state
    /// events in general if no type is given).
    pub fn can_send_state_event(&self, user: &UserId, event_type: Option<&str>) -> bool {
        let threshold = event_type
            .and_then(|t| self.events.get(t))
            .copied()
            .unwrap_or(self.state_default);
        self.level_for(user) >= threshold
    }

    /// Whether a user may send a message event of the given type (or
    /// messages in general if no type is given).
    pub fn can_send_message(&self, user: &UserId, event_type: Option<&str>) -> bool {
        let threshold = event_type
            .and_then(|t| self.events.get(t))
            .copied()
            .unwrap_or(self.events_default);
        self.level_for(user) >= threshold
    }
}

impl<C: MatrixApi> MatrixBot<C> {
    /// Fetches the current power levels of a room, or `None` if the state
    /// event is missing or malformed.
    pub async fn power_levels(&self, room_id: &RoomId) -> Option<PowerLevels> {
        let content = match self
            .client()
            .get_state_event(room_id, POWER_LEVELS_EVENT_TYPE, "")
            .await
        {
            Ok(Some(content)) => content,
            Ok(None) => return None,
            Err(err) => {
                error!("could not fetch power levels of {room_id}: {err:?}");
                return None;
            }
        };

        match serde_json::from_value(content) {
            Ok(levels) => Some(levels),
            Err(err) => {
                error!("malformed power levels in {room_id}: {err:?}");
                None
            }
        }
    }

    /// The permission level of a user in a room. The bot's own id is used
    /// when `user_id` is absent; [`MIN_POWER_LEVEL`] when no table exists.
    pub async fn power_level(&self, room_id: &RoomId, user_id: Option<&UserId>) -> i64 {
        let Some(levels) = self.power_levels(room_id).await else {
            return MIN_POWER_LEVEL;
        };
        let user = user_id.map(ToOwned::to_owned).unwrap_or_else(|| self.self_user_id());
        levels.level_for(&user)
    }

    /// Whether a user (the bot if absent) may invite others to a room.
    pub async fn can_invite(&self, room_id: &RoomId, user_id: Option<&UserId>) -> bool {
        let Some(levels) = self.power_levels(room_id).await else {
            return false;
        };
        let user = user_id.map(ToOwned::to_owned).unwrap_or_else(|| self.self_user_id());
        levels.can_invite(&user)
    }

    /// Whether a user (the bot if absent) may send state events in a room.
    pub async fn can_send_state_event(
        &self,
        room_id: &RoomId,
        user_id: Option<&UserId>,
        event_type: Option<&str>,
    ) -> bool {
        let Some(levels) = self.power_levels(room_id).await else {
            return false;
        };
        let user = user_id.map(ToOwned::to_owned).unwrap_or_else(|| self.self_user_id());
        levels.can_send_state_event(&user, event_type)
    }

    /// Whether a user (the bot if absent) may send messages in a room.
    pub async fn can_send_message(
        &self,
        room_id: &RoomId,
        user_id: Option<&UserId>,
        event_type: Option<&str>,
    ) -> bool {
        let Some(levels) = self.power_levels(room_id).await else {
            return false;
        };
        let user = user_id.map(ToOwned::to_owned).unwrap_or_else(|| self.self_user_id());
        levels.can_send_message(&user, event_type)
    }

    /// Whether a user has administrator privileges (level 100) in a room.
    pub async fn is_admin(&self, user_id: &UserId, room_id: &RoomId) -> bool {
        self.power_level(room_id, Some(user_id)).await >= ADMIN_POWER_LEVEL
    }

    /// Whether a user has moderator privileges (level 50) in a room.
    pub async fn is_moderator(&self, user_id: &UserId, room_id: &RoomId) -> bool {
        self.power_level(room_id, Some(user_id)).await >= MOD_POWER_LEVEL
    }
}
