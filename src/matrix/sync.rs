//! Event handler registration.
//!
//! Bridges the SDK's typed event handlers to the runtime: every interesting
//! SDK event is normalized into an [`InboundEvent`] and handed to the bot.
//! Handlers must be registered before the sync loop starts, otherwise early
//! events are lost.

use std::sync::Arc;

use matrix_sdk::{
    Room, RoomState,
    ruma::events::room::{
        encrypted::OriginalSyncRoomEncryptedEvent,
        member::StrippedRoomMemberEvent,
        message::{MessageType, OriginalSyncRoomMessageEvent},
    },
};

use crate::bot::MatrixBot;
use crate::events::{EventContent, InboundEvent};
use crate::matrix::MatrixClient;

/// Wires the bot's callbacks into the SDK client.
pub fn register_event_handlers(bot: Arc<MatrixBot<MatrixClient>>) {
    let client = bot.client().sdk().clone();

    client.add_event_handler({
        let bot = Arc::clone(&bot);
        move |event: OriginalSyncRoomMessageEvent, room: Room| {
            let bot = Arc::clone(&bot);
            async move {
                if room.state() != RoomState::Joined {
                    return;
                }
                let MessageType::Text(text) = event.content.msgtype else {
                    return;
                };

                let inbound = InboundEvent {
                    event_id: Some(event.event_id),
                    sender: event.sender,
                    room_id: room.room_id().to_owned(),
                    origin_timestamp: Some(event.origin_server_ts),
                    content: EventContent::Text(text.body),
                };
                bot.on_message_event(&inbound).await;
            }
        }
    });

    client.add_event_handler({
        let bot = Arc::clone(&bot);
        move |event: OriginalSyncRoomEncryptedEvent, room: Room| {
            let bot = Arc::clone(&bot);
            async move {
                if room.state() != RoomState::Joined {
                    return;
                }

                let inbound = InboundEvent {
                    event_id: Some(event.event_id),
                    sender: event.sender,
                    room_id: room.room_id().to_owned(),
                    origin_timestamp: Some(event.origin_server_ts),
                    content: EventContent::Encrypted,
                };
                bot.on_message_event(&inbound).await;
            }
        }
    });

    // Invitations arrive as stripped state, without event id or timestamp.
    client.add_event_handler({
        let bot = Arc::clone(&bot);
        move |event: StrippedRoomMemberEvent, room: Room| {
            let bot = Arc::clone(&bot);
            async move {
                let inbound = InboundEvent {
                    event_id: None,
                    sender: event.sender,
                    room_id: room.room_id().to_owned(),
                    origin_timestamp: None,
                    content: EventContent::Member {
                        state_key: event.state_key,
                        membership: event.content.membership,
                    },
                };
                bot.on_member_event(&inbound).await;
            }
        }
    });
}
