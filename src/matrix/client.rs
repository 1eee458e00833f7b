//! SDK-backed implementation of [`MatrixApi`].
//!
//! [`MatrixClient`] wraps a `matrix_sdk::Client` together with the session
//! store and the handle of the background sync task. Login happens in
//! [`MatrixClient::new`]: a persisted session is restored when one exists,
//! otherwise a password login runs and its session is written to disk for
//! the next start.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Error, anyhow};
use futures::{StreamExt, stream, stream::BoxStream};
use log::{debug, error, info};
use matrix_sdk::{
    Client, LoopCtrl, Room, RoomState,
    config::SyncSettings,
    ruma::{
        EventId, OwnedEventId, OwnedRoomId, OwnedUserId, RoomId,
        api::client::{filter::FilterDefinition, session::logout_all},
        events::{
            AnySyncMessageLikeEvent, AnySyncTimelineEvent, SyncMessageLikeEvent,
            reaction::ReactionEventContent,
            relation::Annotation,
            room::member::{MembershipState, RoomMemberEventContent},
            room::message::{MessageType, RoomMessageEventContent},
        },
    },
};
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};

use crate::config::Config;
use crate::matrix::session::SessionStore;
use crate::matrix::{MatrixApi, RoomMembership, SyncState};

/// How often the snapshot streams re-read the local store.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The production Matrix client.
pub struct MatrixClient {
    client: Client,
    user_id: OwnedUserId,
    store: SessionStore,
    state_tx: watch::Sender<SyncState>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl MatrixClient {
    /// Builds a logged-in client from the configuration.
    ///
    /// Restores the session persisted in the data directory when present;
    /// otherwise performs a password login and persists the new session.
    pub async fn new(config: &Config) -> Result<Self, Error> {
        let store = SessionStore::open(&config.data_directory).await?;

        let client = Client::builder()
            .homeserver_url(&config.base_url)
            .sqlite_store(store.sqlite_path(), None)
            .build()
            .await?;

        match store.user_session() {
            Some(session) => {
                info!("restoring persisted session");
                client.restore_session(session.clone()).await?;
            }
            None => {
                info!("logging in as {}", config.username);
                client
                    .matrix_auth()
                    .login_username(&config.username, &config.password)
                    .initial_device_display_name("botrix")
                    .send()
                    .await?;

                let session = client
                    .matrix_auth()
                    .session()
                    .ok_or_else(|| anyhow!("no session after login"))?;
                store.persist_user_session(&session).await?;
            }
        }

        let user_id = client
            .user_id()
            .ok_or_else(|| anyhow!("client has no user id after login"))?
            .to_owned();
        debug!("logged in as {user_id}");

        let (state_tx, _) = watch::channel(SyncState::Stopped);

        Ok(MatrixClient {
            client,
            user_id,
            store,
            state_tx,
            sync_task: Mutex::new(None),
        })
    }

    /// The underlying SDK client, for event handler registration.
    pub(crate) fn sdk(&self) -> &Client {
        &self.client
    }

    fn room(&self, room_id: &RoomId) -> Result<Room, Error> {
        self.client
            .get_room(room_id)
            .ok_or_else(|| anyhow!("unknown room {room_id}"))
    }

    async fn send_message(
        &self,
        room_id: &RoomId,
        content: RoomMessageEventContent,
    ) -> Result<(), Error> {
        let room = self.room(room_id)?;
        room.send(content).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MatrixApi for MatrixClient {
    fn user_id(&self) -> OwnedUserId {
        self.user_id.clone()
    }

    async fn start_sync(&self) -> Result<(), Error> {
        // Enable room member lazy-loading, see
        // <https://spec.matrix.org/v1.6/client-server-api/#lazy-loading-room-members>.
        let filter = FilterDefinition::with_lazy_loading();
        let mut settings = SyncSettings::default().filter(filter.into());
        if let Some(sync_token) = self.store.sync_token() {
            settings = settings.token(sync_token);
        }

        self.state_tx.send_replace(SyncState::Starting);

        let client = self.client.clone();
        let store = self.store.clone();
        let state_tx = self.state_tx.clone();

        let task = tokio::spawn(async move {
            state_tx.send_replace(SyncState::Running);

            let result = client
                .sync_with_result_callback(settings, |sync_result| {
                    let store = store.clone();
                    async move {
                        let response = sync_result?;
                        // Persist the token each time so a restart resumes
                        // where this run left off.
                        if let Err(err) = store.persist_sync_token(response.next_batch).await {
                            error!("failed to persist sync token: {err:?}");
                        }
                        Ok(LoopCtrl::Continue)
                    }
                })
                .await;

            if let Err(err) = result {
                error!("sync loop ended with error: {err:?}");
            }
            state_tx.send_replace(SyncState::Stopped);
        });

        let mut guard = self.sync_task.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(task);
        Ok(())
    }

    async fn stop_sync(&self) {
        let task = self
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            debug!("stopping sync loop");
            task.abort();
            self.state_tx.send_replace(SyncState::Stopped);
        }
    }

    fn sync_state(&self) -> SyncState {
        *self.state_tx.borrow()
    }

    async fn join_room(&self, room_id: &RoomId) -> Result<(), Error> {
        self.client.join_room_by_id(room_id).await?;
        Ok(())
    }

    fn room_membership(&self, room_id: &RoomId) -> BoxStream<'static, Option<RoomMembership>> {
        let client = self.client.clone();
        let room_id = room_id.to_owned();

        stream::unfold((client, room_id), |(client, room_id)| async move {
            let membership = client.get_room(&room_id).map(|room| match room.state() {
                RoomState::Invited => RoomMembership::Invited,
                RoomState::Joined => RoomMembership::Joined,
                RoomState::Left => RoomMembership::Left,
                RoomState::Knocked => RoomMembership::Knocked,
                RoomState::Banned => RoomMembership::Banned,
            });
            if membership.is_none() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Some((membership, (client, room_id)))
        })
        .boxed()
    }

    fn event_content(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
    ) -> BoxStream<'static, Option<String>> {
        let client = self.client.clone();
        let room_id = room_id.to_owned();
        let event_id = event_id.to_owned();

        stream::unfold(
            (client, room_id, event_id),
            |(client, room_id, event_id)| async move {
                let body = fetch_text_body(&client, &room_id, &event_id).await;
                if body.is_none() {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Some((body, (client, room_id, event_id)))
            },
        )
        .boxed()
    }

    async fn send_text(&self, room_id: &RoomId, body: &str) -> Result<(), Error> {
        self.send_message(room_id, RoomMessageEventContent::text_plain(body))
            .await
    }

    async fn send_markdown(&self, room_id: &RoomId, body: &str) -> Result<(), Error> {
        self.send_message(room_id, RoomMessageEventContent::text_markdown(body))
            .await
    }

    async fn send_reaction(
        &self,
        room_id: &RoomId,
        target: &EventId,
        key: &str,
    ) -> Result<(), Error> {
        let room = self.room(room_id)?;
        let content = ReactionEventContent::new(Annotation::new(target.to_owned(), key.to_string()));
        room.send(content).await?;
        Ok(())
    }

    async fn get_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
    ) -> Result<Option<Value>, Error> {
        use matrix_sdk::deserialized_responses::RawAnySyncOrStrippedState;

        let Some(room) = self.client.get_room(room_id) else {
            return Ok(None);
        };
        let Some(state) = room.get_state_event(event_type.into(), state_key).await? else {
            return Ok(None);
        };

        let content = match state {
            RawAnySyncOrStrippedState::Sync(raw) => raw.get_field::<Value>("content")?,
            RawAnySyncOrStrippedState::Stripped(raw) => raw.get_field::<Value>("content")?,
        };
        Ok(content)
    }

    async fn set_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<(), Error> {
        let room = self.room(room_id)?;
        room.send_state_event_raw(event_type, state_key, content).await?;
        Ok(())
    }

    async fn joined_rooms(&self) -> Result<Vec<OwnedRoomId>, Error> {
        let rooms = self
            .client
            .joined_rooms()
            .iter()
            .map(|room| room.room_id().to_owned())
            .collect();
        Ok(rooms)
    }

    async fn set_display_name(&self, name: &str) -> Result<(), Error> {
        self.client.account().set_display_name(Some(name)).await?;
        Ok(())
    }

    async fn set_room_display_name(&self, room_id: &RoomId, name: &str) -> Result<(), Error> {
        let room = self.room(room_id)?;

        let mut content = RoomMemberEventContent::new(MembershipState::Join);
        content.displayname = Some(name.to_string());
        // Keep the avatar the membership event currently carries.
        if let Some(member) = room.get_member_no_sync(&self.user_id).await? {
            content.avatar_url = member.avatar_url().map(ToOwned::to_owned);
        }

        room.send_state_event_for_key(&self.user_id, content).await?;
        Ok(())
    }

    async fn logout_all(&self) -> Result<(), Error> {
        self.client.send(logout_all::v3::Request::new()).await?;
        Ok(())
    }
}

/// Reads an event from the local store or server and extracts its plain
/// text body. `None` while the event is unavailable or not yet decrypted.
async fn fetch_text_body(
    client: &Client,
    room_id: &RoomId,
    event_id: &OwnedEventId,
) -> Option<String> {
    let room = client.get_room(room_id)?;
    let event = room.event(event_id, None).await.ok()?;

    let AnySyncTimelineEvent::MessageLike(AnySyncMessageLikeEvent::RoomMessage(
        SyncMessageLikeEvent::Original(message),
    )) = event.raw().deserialize().ok()?
    else {
        return None;
    };

    let MessageType::Text(text) = message.content.msgtype else {
        return None;
    };
    Some(text.body)
}
