//! The `name` command: changes the bot's display name.

use anyhow::Error;
use async_trait::async_trait;
use log::{error, info};

use crate::bot::MatrixBot;
use crate::commands::Command;
use crate::events::InboundEvent;
use crate::matrix::MatrixApi;

/// Sets the bot's display name to the given parameters.
///
/// The per-room rename requires the sender to be a room moderator. When
/// constructed with `globally = true`, a bot admin changes the global
/// display name instead; non-admins silently fall through to the per-room
/// behavior.
pub struct ChangeUsernameCommand {
    globally: bool,
}

impl ChangeUsernameCommand {
    pub fn new(globally: bool) -> Self {
        ChangeUsernameCommand { globally }
    }
}

#[async_trait]
impl<C: MatrixApi> Command<C> for ChangeUsernameCommand {
    fn name(&self) -> &str {
        "name"
    }

    fn params(&self) -> &str {
        "{NEW_NAME}"
    }

    fn help(&self) -> &str {
        "sets the display name of the bot to NEW_NAME (for this channel, or globally when configured)"
    }

    async fn execute(
        &self,
        bot: &MatrixBot<C>,
        parameters: &str,
        event: &InboundEvent,
    ) -> Result<(), Error> {
        let room_id = &event.room_id;

        if !bot.can_send_message(room_id, None, None).await {
            error!("not allowed to send messages in {room_id}, skipping rename");
            return Ok(());
        }

        if parameters.trim().is_empty() {
            bot.send_text(room_id, "Please provide a new name for the bot.")
                .await?;
            return Ok(());
        }

        if self.globally {
            if bot.config().is_bot_admin(&event.sender) {
                return bot.rename(parameters).await;
            }
            info!("user {} tried to update the global bot name", event.sender);
        }

        if !bot.is_moderator(&event.sender, room_id).await {
            bot.send_text(room_id, "You are not a moderator in this room.")
                .await?;
            return Ok(());
        }

        bot.rename_in_room(room_id, parameters).await
    }
}
