//! Bot configuration loading and authorization predicates.
//!
//! The configuration is a YAML file with environment variable overrides
//! (`BOTRIX_` prefix, `__` as the nesting separator):
//!
//! ```yaml
//! prefix: "bot"
//! base_url: "https://matrix.example.org"
//! username: "botuser"
//! password: "secret"
//! data_directory: "./data"
//! admins:
//!   - "@admin:example.org"
//! users:
//!   - ":example.org"
//! ```
//!
//! `admins` are full user ids allowed to run privileged commands. `users`
//! restricts which senders the bot listens to at all: each entry is matched
//! as a suffix of the sender id, so `":example.org"` authorizes a whole
//! homeserver while `"@alice:example.org"` authorizes a single account. An
//! empty `users` list authorizes everyone.

use anyhow::bail;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use matrix_sdk::ruma::UserId;
use serde::Deserialize;

/// Immutable bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The command prefix the bot listens to, without the leading `!`.
    pub prefix: String,
    /// Base URL of the homeserver, e.g. `https://matrix.example.org`.
    pub base_url: String,
    /// Username of the bot's account.
    pub username: String,
    /// Password of the bot's account.
    pub password: String,
    /// Directory for the session file and the state store.
    pub data_directory: String,
    /// Full user ids of the bot admins.
    pub admins: Vec<String>,
    /// User id suffixes of authorized senders. Empty means everyone.
    #[serde(default)]
    pub users: Vec<String>,
}

impl Config {
    /// Loads the configuration from a YAML file, with `BOTRIX_*` environment
    /// variables taking precedence over file values.
    pub fn load(path: &str) -> Result<Config, anyhow::Error> {
        let config = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("BOTRIX_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Checks the configuration invariants. Called once at startup, before
    /// the bot is constructed; a violation is fatal.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.prefix.trim().is_empty() {
            bail!("please verify that prefix is not empty");
        }
        if self.base_url.trim().is_empty()
            || self.username.trim().is_empty()
            || self.password.trim().is_empty()
        {
            bail!("please verify that base_url, username, and password are not empty");
        }
        if self.data_directory.trim().is_empty() {
            bail!("please verify that data_directory is not empty");
        }
        if self.admins.is_empty() {
            bail!("no admins specified; please specify at least one admin");
        }
        Ok(())
    }

    /// Whether the given user id belongs to an authorized sender.
    pub fn is_user(&self, user: &UserId) -> bool {
        if self.users.is_empty() {
            return true;
        }
        self.users
            .iter()
            .any(|suffix| user.as_str().ends_with(suffix))
    }

    /// Whether the given user id belongs to a bot admin.
    pub fn is_bot_admin(&self, user: &UserId) -> bool {
        self.admins.iter().any(|admin| admin == user.as_str())
    }
}
