//! Bot commands and their routing.
//!
//! A command is anything implementing [`Command`]: a name, help metadata and
//! an `execute` body. The [`Commander`] holds an ordered sequence of boxed
//! commands and routes admitted text messages to them (see [`router`]).
//!
//! Command implementations own their authorization checks and all
//! room-visible feedback; the router performs neither.
//!
//! Built-in commands:
//! - [`HelpCommand`] - lists the registered commands
//! - [`ChangeUsernameCommand`] - changes the bot's display name
//! - [`QuitCommand`] - stops the bot (admin only)
//! - [`LogoutCommand`] - stops the bot and invalidates all sessions (admin only)

use anyhow::Error;
use async_trait::async_trait;

use crate::bot::MatrixBot;
use crate::events::InboundEvent;
use crate::matrix::MatrixApi;

mod help;
mod logout;
mod quit;
mod rename;
mod router;

pub use help::HelpCommand;
pub use logout::LogoutCommand;
pub use quit::QuitCommand;
pub use rename::ChangeUsernameCommand;
pub use router::{Commander, ParsedCommandInvocation};

/// Reaction key used to acknowledge auto-acknowledging commands
/// (the "heavy check mark" emoji).
pub const ACK_EMOJI: &str = "\u{2714}\u{FE0F}";

/// A named bot command.
#[async_trait]
pub trait Command<C: MatrixApi>: Send + Sync {
    /// The name users invoke the command by. Matched exactly.
    fn name(&self) -> &str;

    /// Parameter description shown in the help text.
    fn params(&self) -> &str {
        ""
    }

    /// Help text describing what the command does.
    fn help(&self) -> &str;

    /// Whether to acknowledge the invocation with a reaction before
    /// executing.
    fn auto_acknowledge(&self) -> bool {
        false
    }

    /// Executes the command.
    ///
    /// `parameters` is the trimmed text after the command name; `event` is
    /// the triggering message (sender, room and event id included).
    async fn execute(
        &self,
        bot: &MatrixBot<C>,
        parameters: &str,
        event: &InboundEvent,
    ) -> Result<(), Error>;
}
