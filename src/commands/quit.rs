//! The `quit` command: stops the bot without logging out.

use anyhow::Error;
use async_trait::async_trait;

use crate::bot::MatrixBot;
use crate::commands::Command;
use crate::events::InboundEvent;
use crate::matrix::MatrixApi;

/// Releases the lifecycle gate, shutting the bot down. Admin only.
pub struct QuitCommand;

#[async_trait]
impl<C: MatrixApi> Command<C> for QuitCommand {
    fn name(&self) -> &str {
        "quit"
    }

    fn help(&self) -> &str {
        "quits the bot without logging out"
    }

    fn auto_acknowledge(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        bot: &MatrixBot<C>,
        _parameters: &str,
        event: &InboundEvent,
    ) -> Result<(), Error> {
        if !bot.config().is_bot_admin(&event.sender) {
            bot.send_text(&event.room_id, "You are not an admin.").await?;
            return Ok(());
        }
        bot.quit(false).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::{make_bot, text_event};
    use crate::matrix::MockMatrixApi;

    #[tokio::test]
    async fn test_quit_denied_for_non_admin() {
        let mut client = MockMatrixApi::new();
        client
            .expect_send_text()
            .withf(|_, body| body == "You are not an admin.")
            .times(1)
            .returning(|_, _| Ok(()));
        client.expect_stop_sync().times(0);

        let bot = make_bot(client, vec![]);
        let event = text_event("@alice:example.org", "!bot quit");

        QuitCommand.execute(&bot, "", &event).await.unwrap();
        assert!(!bot.session().logout_requested());
    }

    #[tokio::test]
    async fn test_quit_engages_shutdown_for_admin() {
        let mut client = MockMatrixApi::new();
        client.expect_stop_sync().times(1).return_const(());

        let bot = make_bot(client, vec![]);
        let event = text_event("@admin:example.org", "!bot quit");

        QuitCommand.execute(&bot, "", &event).await.unwrap();
        assert!(!bot.session().logout_requested());
    }
}
