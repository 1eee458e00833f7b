//! Login session persistence.
//!
//! The data directory holds two things: `session.json` with the
//! authentication tokens and the latest sync token, and `store`, the SQLite
//! database the SDK keeps its state in. Persisting both lets the bot restart
//! without creating a fresh device on every run.

use std::path::{Path, PathBuf};

use anyhow::Error;
use log::{debug, trace};
use matrix_sdk::authentication::matrix;
use serde::{Deserialize, Serialize};
use tokio::fs;

/// On-disk shape of `session.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    user_session: matrix::MatrixSession,

    #[serde(skip_serializing_if = "Option::is_none")]
    sync_token: Option<String>,
}

/// Loads and persists the login session under a data directory.
#[derive(Clone)]
pub struct SessionStore {
    session: Option<PersistedSession>,
    sqlite_path: PathBuf,
    session_path: PathBuf,
}

impl SessionStore {
    /// Opens the store, loading `session.json` if a previous run left one.
    pub async fn open(data_directory: &str) -> Result<SessionStore, Error> {
        debug!("opening session store at {data_directory}");
        fs::create_dir_all(data_directory).await?;

        let sqlite_path = Path::new(data_directory).join("store");
        let session_path = Path::new(data_directory).join("session.json");

        let session = SessionStore::read_session(&session_path).await;
        debug!("persisted session found: {}", session.is_some());

        Ok(SessionStore {
            session,
            sqlite_path,
            session_path,
        })
    }

    async fn read_session(session_path: &Path) -> Option<PersistedSession> {
        let data = fs::read_to_string(session_path).await.ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Path of the SQLite database for the SDK state store.
    pub fn sqlite_path(&self) -> &Path {
        &self.sqlite_path
    }

    /// The persisted user session, if a previous login left one.
    pub fn user_session(&self) -> Option<&matrix::MatrixSession> {
        self.session.as_ref().map(|s| &s.user_session)
    }

    /// The persisted sync token, if any.
    pub fn sync_token(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| s.sync_token.clone())
    }

    /// Writes a fresh user session to disk, discarding any sync token.
    pub async fn persist_user_session(
        &self,
        user_session: &matrix::MatrixSession,
    ) -> Result<(), Error> {
        trace!("persisting user session");

        let session = PersistedSession {
            user_session: user_session.clone(),
            sync_token: None,
        };
        fs::write(&self.session_path, serde_json::to_string(&session)?).await?;
        Ok(())
    }

    /// Updates the sync token in the session file, keeping the user session.
    pub async fn persist_sync_token(&self, sync_token: String) -> Result<(), Error> {
        trace!("persisting sync token {sync_token}");

        let data = fs::read_to_string(&self.session_path).await?;
        let mut session: PersistedSession = serde_json::from_str(&data)?;
        session.sync_token = Some(sync_token);
        fs::write(&self.session_path, serde_json::to_string(&session)?).await?;
        Ok(())
    }
}
