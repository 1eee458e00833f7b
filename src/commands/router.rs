//! Command parsing and dispatch.
//!
//! A room message is a command invocation iff its body starts with the
//! literal `"!" + prefix`. The remainder is split on the first whitespace
//! run into a command name and parameters:
//!
//! ```text
//! !bot name Alice Bot
//! └┬─┘ └┬─┘ └───┬───┘
//! prefix name  parameters
//! ```
//!
//! The name is looked up against the registered commands in order, first
//! exact match wins. If nothing matches and a default command is
//! configured, the default receives the entire trimmed remainder as its
//! parameters. If there is still no match the message is dropped silently:
//! a prefixed message may well target another bot sharing the room.

use log::{debug, error};

use crate::bot::MatrixBot;
use crate::commands::{ACK_EMOJI, Command};
use crate::events::InboundEvent;
use crate::matrix::MatrixApi;

/// A message body parsed against the command prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommandInvocation {
    /// The first token after the prefix.
    pub command_name: String,
    /// The trimmed text after the command name; empty if none.
    pub parameters: String,
    /// The entire trimmed text after the prefix, handed to the default
    /// command when the name does not resolve.
    raw: String,
}

/// Routes admitted text messages to the registered commands.
pub struct Commander<C: MatrixApi> {
    prefix: String,
    commands: Vec<Box<dyn Command<C>>>,
    default_command: Option<String>,
}

impl<C: MatrixApi> Commander<C> {
    /// Creates a router for the given prefix and ordered command sequence.
    ///
    /// `default_command` names the command that handles unresolved
    /// invocations; it should be the name of one of `commands`.
    pub fn new(
        prefix: &str,
        commands: Vec<Box<dyn Command<C>>>,
        default_command: Option<&str>,
    ) -> Self {
        Commander {
            prefix: prefix.to_string(),
            commands,
            default_command: default_command.map(str::to_string),
        }
    }

    /// The configured command prefix, without the leading `!`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The registered commands, in lookup order.
    pub fn commands(&self) -> &[Box<dyn Command<C>>] {
        &self.commands
    }

    /// Parses a message body, or `None` if it is not addressed to this bot.
    pub fn parse(&self, body: &str) -> Option<ParsedCommandInvocation> {
        let raw = body.strip_prefix(&format!("!{}", self.prefix))?.trim();

        let (command_name, parameters) = match raw.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (raw, ""),
        };

        Some(ParsedCommandInvocation {
            command_name: command_name.to_string(),
            parameters: parameters.to_string(),
            raw: raw.to_string(),
        })
    }

    /// Resolves an invocation to a command and its effective parameters.
    fn resolve(&self, invocation: &ParsedCommandInvocation) -> Option<(&dyn Command<C>, String)> {
        if let Some(command) = self
            .commands
            .iter()
            .find(|c| c.name() == invocation.command_name)
        {
            return Some((command.as_ref(), invocation.parameters.clone()));
        }

        // Unknown name: the default command receives the full remainder,
        // including what would have been the name token.
        let default = self.default_command.as_deref()?;
        let command = self.commands.iter().find(|c| c.name() == default)?;
        Some((command.as_ref(), invocation.raw.clone()))
    }

    /// Parses `body` and executes the matching command, if any.
    ///
    /// `event` is the triggering message. For encrypted messages the caller
    /// passes the decrypted body separately, which is why the body is not
    /// taken from `event` itself.
    pub async fn dispatch(&self, bot: &MatrixBot<C>, event: &InboundEvent, body: &str) {
        let Some(invocation) = self.parse(body) else {
            return;
        };

        let Some((command, parameters)) = self.resolve(&invocation) else {
            debug!("no command named '{}', ignoring", invocation.command_name);
            return;
        };

        if command.auto_acknowledge()
            && let Some(event_id) = &event.event_id
            && let Err(err) = bot
                .client()
                .send_reaction(&event.room_id, event_id, ACK_EMOJI)
                .await
        {
            // The acknowledgment is best-effort; the command still runs.
            error!("failed to acknowledge '{}': {err:?}", command.name());
        }

        debug!("executing command '{}'", command.name());
        if let Err(err) = command.execute(bot, &parameters, event).await {
            error!("command '{}' failed: {err:?}", command.name());
        }
    }
}
