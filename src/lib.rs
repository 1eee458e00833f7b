//! A small Matrix chat bot runtime.
//!
//! Botrix connects a bot account to a Matrix homeserver, filters the
//! incoming event stream, and routes prefixed chat messages to registered
//! commands. It is the shared plumbing a chat bot needs before it does
//! anything useful: login and session persistence, authorized-user
//! filtering, replay protection across restarts, auto-joining rooms on
//! invitation, room power-level checks, and a clean blocking lifecycle
//! with admin-triggered shutdown.
//!
//! An embedding application supplies its own [`commands::Command`]
//! implementations, wires them into a [`commands::Commander`], and runs
//! the [`MatrixBot`]:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use botrix::commands::{Command, Commander, HelpCommand, QuitCommand};
//! use botrix::config::Config;
//! use botrix::matrix::{MatrixClient, register_event_handlers};
//! use botrix::MatrixBot;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), anyhow::Error> {
//! let config = Config::load("config.yaml")?;
//! config.validate()?;
//!
//! let client = MatrixClient::new(&config).await?;
//! let commands: Vec<Box<dyn Command<MatrixClient>>> = vec![
//!     Box::new(HelpCommand::new("My Bot")),
//!     Box::new(QuitCommand),
//! ];
//! let commander = Commander::new(&config.prefix, commands, Some("help"));
//!
//! let bot = Arc::new(MatrixBot::new(client, config, commander));
//! register_event_handlers(Arc::clone(&bot));
//! bot.start_blocking().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`bot`] - lifecycle control, event admission and dispatch
//! - [`commands`] - the command trait, router, and built-in commands
//! - [`config`] - YAML configuration with environment variable overrides
//! - [`events`] - normalized inbound event types
//! - [`matrix`] - the client abstraction and its SDK-backed implementation
//! - [`power`] - room power level checks
//! - [`utils`] - bounded-wait helper for lazily materialized data

#![recursion_limit = "256"]

pub mod bot;
pub mod commands;
pub mod config;
pub mod events;
pub mod matrix;
pub mod power;
pub mod utils;

pub use crate::bot::{BotSession, MatrixBot};
