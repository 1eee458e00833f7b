//! Botrix binary: a generic Matrix bot running the built-in commands.
//!
//! # Configuration
//!
//! Create a `config.yaml` file:
//!
//! ```yaml
//! prefix: "bot"
//! base_url: "https://matrix.example.org"
//! username: "bot"
//! password: "your-password"
//! data_directory: "./botrix-data"
//! admins:
//!   - "@admin:example.org"
//! users:
//!   - ":example.org"
//! ```
//!
//! `users` holds user id suffixes that are allowed to interact with the
//! bot; an empty list allows everyone. `admins` lists the full user ids
//! that may run privileged commands like `quit` and `logout`.
//!
//! Every value can be overridden with a `BOTRIX_`-prefixed environment
//! variable:
//!
//! ```bash
//! export BOTRIX_PASSWORD="secret-from-env"
//! botrix --config config.yaml
//! ```
//!
//! # Bot commands
//!
//! - `!bot help` - list the available commands
//! - `!bot name <NEW_NAME>` - rename the bot (moderators per room, admins globally)
//! - `!bot quit` - stop the bot (admin only)
//! - `!bot logout` - stop the bot and invalidate all sessions (admin only)

use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::{error, info};

use botrix::MatrixBot;
use botrix::commands::{
    ChangeUsernameCommand, Command, Commander, HelpCommand, LogoutCommand, QuitCommand,
};
use botrix::config::Config;
use botrix::matrix::{MatrixClient, register_event_handlers};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: String,

    /// Directory for persistent data (session, SDK store). Overrides the
    /// `data_directory` configuration value.
    #[arg(short, long)]
    data: Option<String>,
}

#[tokio::main]
async fn main() {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("Starting botrix {}...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let mut config: Config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config file: {e}");
            return;
        }
    };
    if let Some(data) = args.data {
        config.data_directory = data;
    }
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return;
    }

    let client = match MatrixClient::new(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize matrix client: {e:?}");
            return;
        }
    };

    let commands: Vec<Box<dyn Command<MatrixClient>>> = vec![
        Box::new(HelpCommand::new("Botrix")),
        Box::new(ChangeUsernameCommand::new(true)),
        Box::new(QuitCommand),
        Box::new(LogoutCommand),
    ];
    let commander = Commander::new(&config.prefix, commands, Some("help"));

    let bot = Arc::new(MatrixBot::new(client, config, commander));
    register_event_handlers(Arc::clone(&bot));

    match bot.start_blocking().await {
        Ok(true) => info!("bot stopped and logged out"),
        Ok(false) => info!("bot stopped"),
        Err(e) => error!("bot terminated with error: {e:?}"),
    }
}
