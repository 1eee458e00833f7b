//! The `help` command: lists every registered command.

use anyhow::Error;
use async_trait::async_trait;

use crate::bot::MatrixBot;
use crate::commands::Command;
use crate::events::InboundEvent;
use crate::matrix::MatrixApi;

/// Sends a markdown overview of the registered commands into the room.
///
/// Suitable as the router's default command, so that a garbled invocation
/// answers with usage instructions instead of silence.
pub struct HelpCommand {
    bot_name: String,
}

impl HelpCommand {
    /// `bot_name` is the human-readable name shown in the help header.
    pub fn new(bot_name: &str) -> Self {
        HelpCommand {
            bot_name: bot_name.to_string(),
        }
    }
}

#[async_trait]
impl<C: MatrixApi> Command<C> for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn help(&self) -> &str {
        "shows this help message"
    }

    async fn execute(
        &self,
        bot: &MatrixBot<C>,
        _parameters: &str,
        event: &InboundEvent,
    ) -> Result<(), Error> {
        let prefix = bot.commander().prefix();
        let mut message = format!(
            "This is {}. You can use the following commands:\n",
            self.bot_name
        );

        for command in bot.commander().commands() {
            message += &*format!(
                "\n* `!{} {} {}` - {}",
                prefix,
                command.name(),
                command.params(),
                command.help()
            );
        }

        bot.send_markdown(&event.room_id, &message).await
    }
}
