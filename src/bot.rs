//! The bot runtime: lifecycle control, event admission and dispatch.
//!
//! [`MatrixBot`] ties the pieces together. It owns the collaborator client
//! (anything implementing [`MatrixApi`]), the immutable [`Config`], the
//! per-process [`BotSession`] and the command router.
//!
//! # Lifecycle
//!
//! ```text
//! stopped ──start_blocking()──▶ running ──quit() / SIGINT──▶ stopping ──▶ stopped
//! ```
//!
//! [`MatrixBot::start_blocking`] starts the event stream and then blocks the
//! calling task on a one-slot release gate. Any task may release the gate by
//! calling [`MatrixBot::quit`]: a command handler, the termination signal
//! listener, or an embedding application. The first release wins; further
//! calls only contribute their sticky `logout` flag. After release the
//! controller waits for the stream to quiesce, optionally invalidates all
//! sessions, and reports which kind of shutdown happened.
//!
//! # Event flow
//!
//! The sync layer normalizes events into [`InboundEvent`]s and feeds them to
//! [`MatrixBot::on_message_event`] (text and encrypted messages, gated by
//! the admission filter) and [`MatrixBot::on_member_event`] (membership
//! changes, which drive the auto-join transition). Callbacks for different
//! events may run concurrently; everything here is `&self` and safe to
//! invoke from multiple tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Error;
use futures::future;
use log::{error, info};
use matrix_sdk::ruma::{
    EventId, MilliSecondsSinceUnixEpoch, OwnedRoomId, OwnedUserId, RoomId,
    events::room::member::MembershipState,
};
use serde_json::Value;
use tokio::sync::Notify;

use crate::commands::Commander;
use crate::config::Config;
use crate::events::{EventContent, InboundEvent};
use crate::matrix::{MatrixApi, RoomMembership};
use crate::utils::first_with_timeout;

/// Process-wide mutable session state.
///
/// Created once when the bot is constructed and owned by it. The lifecycle
/// controller is the only writer; other components and the termination
/// listener only read.
pub struct BotSession {
    running: AtomicBool,
    logout_requested: AtomicBool,
    start_timestamp: MilliSecondsSinceUnixEpoch,
}

impl BotSession {
    fn new() -> Self {
        BotSession {
            running: AtomicBool::new(false),
            logout_requested: AtomicBool::new(false),
            start_timestamp: MilliSecondsSinceUnixEpoch::now(),
        }
    }

    /// Whether the bot is between start and completed shutdown.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    fn request_logout(&self) {
        self.logout_requested.store(true, Ordering::SeqCst);
    }

    /// Whether any quit request asked for a full logout. Sticky.
    pub fn logout_requested(&self) -> bool {
        self.logout_requested.load(Ordering::SeqCst)
    }

    /// The instant the runtime was constructed. Events originating earlier
    /// are replays of history and never admitted.
    pub fn start_timestamp(&self) -> MilliSecondsSinceUnixEpoch {
        self.start_timestamp
    }
}

/// The bot runtime, generic over the protocol client.
pub struct MatrixBot<C: MatrixApi> {
    client: C,
    config: Config,
    session: BotSession,
    commander: Commander<C>,
    quit_gate: Notify,
}

impl<C: MatrixApi> MatrixBot<C> {
    /// Creates the runtime. The session start timestamp is captured here,
    /// so events older than this call are treated as historical.
    pub fn new(client: C, config: Config, commander: Commander<C>) -> Self {
        MatrixBot {
            client,
            config,
            session: BotSession::new(),
            commander,
            quit_gate: Notify::new(),
        }
    }

    /// The underlying protocol client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The bot configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The command router.
    pub fn commander(&self) -> &Commander<C> {
        &self.commander
    }

    /// The process-wide session state.
    pub fn session(&self) -> &BotSession {
        &self.session
    }

    /// The bot's own user id.
    pub fn self_user_id(&self) -> OwnedUserId {
        self.client.user_id()
    }

    /// Starts the event stream and blocks until [`MatrixBot::quit`] is
    /// called from another task or a termination signal arrives.
    ///
    /// Returns `true` if the shutdown included a full logout, `false` for a
    /// plain stop.
    pub async fn start_blocking(&self) -> Result<bool, Error> {
        self.session.set_running(true);

        info!("starting sync");
        self.client.start_sync().await?;

        info!("waiting for events ..");
        tokio::select! {
            _ = self.quit_gate.notified() => {}
            _ = wait_for_termination_signal() => {
                self.quit(false).await;
            }
        }

        info!("shutting down");
        while self.client.sync_state().is_active() {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        self.session.set_running(false);

        let logout = self.session.logout_requested();
        if logout {
            info!("logging out all sessions");
            self.client.logout_all().await?;
        }

        self.client.stop_sync().await;
        Ok(logout)
    }

    /// Requests shutdown. Callable from any task, any number of times: the
    /// first call releases the gate [`MatrixBot::start_blocking`] waits on;
    /// later calls unblock nothing further but a `logout = true` flag still
    /// takes effect.
    pub async fn quit(&self, logout: bool) {
        if logout {
            self.session.request_logout();
        }
        self.client.stop_sync().await;
        self.quit_gate.notify_one();
    }

    /// Decides whether an inbound event is eligible for processing.
    ///
    /// Rules, in order: the sender must be authorized per the config
    /// (unless `allow_non_users`), must not be the bot itself (unless
    /// `allow_self_events`), and the event must carry an origin timestamp
    /// no earlier than the session start. The last rule keeps a restart
    /// from re-executing command messages replayed by the initial sync.
    pub fn admit(&self, event: &InboundEvent, allow_non_users: bool, allow_self_events: bool) -> bool {
        if !self.config.is_user(&event.sender) && !allow_non_users {
            return false;
        }
        if event.sender == self.client.user_id() && !allow_self_events {
            return false;
        }
        match event.origin_timestamp {
            Some(timestamp) => timestamp >= self.session.start_timestamp,
            None => false,
        }
    }

    /// Handles a membership-change event: accepts invitations directed at
    /// the bot by joining the room.
    ///
    /// Invitations are admitted on sender identity alone (authorized and
    /// not the bot itself); they often arrive as stripped state without a
    /// timestamp. The room's current membership is fetched fresh, with a
    /// bounded wait since the invite may not be materialized locally yet.
    /// A failed join is logged and dropped; a re-invite triggers a new
    /// attempt.
    pub async fn on_member_event(&self, event: &InboundEvent) {
        let EventContent::Member { state_key, membership } = &event.content else {
            return;
        };

        if *state_key != self.self_user_id() {
            return;
        }
        if !self.config.is_user(&event.sender) || event.sender == self.self_user_id() {
            return;
        }
        if *membership != MembershipState::Invite {
            return;
        }

        // Guard against double-processing when several invite events arrive.
        let current =
            first_with_timeout(self.client.room_membership(&event.room_id), Option::is_some)
                .await
                .flatten();
        if current != Some(RoomMembership::Invited) {
            return;
        }

        info!("joining room {} by invitation of {}", event.room_id, event.sender);
        if let Err(err) = self.client.join_room(&event.room_id).await {
            error!("could not join room {}: {err:?}", event.room_id);
        }
    }

    /// Handles a message event: admission, optional decryption wait, and
    /// command dispatch.
    pub async fn on_message_event(&self, event: &InboundEvent) {
        if !self.admit(event, false, false) {
            return;
        }

        match &event.content {
            EventContent::Text(body) => self.commander.dispatch(self, event, body).await,
            EventContent::Encrypted => {
                let Some(event_id) = &event.event_id else {
                    return;
                };
                let plaintext = first_with_timeout(
                    self.client.event_content(&event.room_id, event_id),
                    Option::is_some,
                )
                .await
                .flatten();

                match plaintext {
                    Some(body) => self.commander.dispatch(self, event, &body).await,
                    None => {
                        error!("cannot decrypt event {event_id} within the given time ..");
                    }
                }
            }
            _ => {}
        }
    }

    /// Sends a plain text message to a room.
    pub async fn send_text(&self, room_id: &RoomId, body: &str) -> Result<(), Error> {
        self.client.send_text(room_id, body).await
    }

    /// Sends a markdown-formatted message to a room.
    pub async fn send_markdown(&self, room_id: &RoomId, body: &str) -> Result<(), Error> {
        self.client.send_markdown(room_id, body).await
    }

    /// Sends a reaction to an existing event.
    pub async fn react(&self, room_id: &RoomId, target: &EventId, key: &str) -> Result<(), Error> {
        self.client.send_reaction(room_id, target, key).await
    }

    /// Fetches the content of a state event of the given type.
    pub async fn get_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
    ) -> Result<Option<Value>, Error> {
        self.client.get_state_event(room_id, event_type, state_key).await
    }

    /// Sends a state event with the given content.
    pub async fn set_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<(), Error> {
        self.client
            .set_state_event(room_id, event_type, state_key, content)
            .await
    }

    /// The rooms the bot has currently joined.
    pub async fn joined_rooms(&self) -> Result<Vec<OwnedRoomId>, Error> {
        self.client.joined_rooms().await
    }

    /// Changes the bot's global display name.
    pub async fn rename(&self, new_name: &str) -> Result<(), Error> {
        self.client.set_display_name(new_name).await
    }

    /// Changes the bot's display name in a single room.
    pub async fn rename_in_room(&self, room_id: &RoomId, new_name: &str) -> Result<(), Error> {
        self.client.set_room_display_name(room_id, new_name).await
    }
}

/// Resolves when the process receives a termination signal. Never resolves
/// if the signal listener cannot be installed, so the release gate stays
/// the only way to shut down.
async fn wait_for_termination_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("could not listen for the termination signal: {err:?}");
        future::pending::<()>().await;
    }
    info!("termination signal received");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::commands::{ACK_EMOJI, Command};
    use crate::matrix::{MockMatrixApi, SyncState};
    use async_trait::async_trait;
    use futures::{StreamExt, stream};
    use matrix_sdk::ruma::{EventId, UserId, room_id, user_id};
    use std::sync::{Arc, Mutex};

    pub(crate) fn test_config() -> Config {
        Config {
            prefix: "bot".to_string(),
            base_url: "https://matrix.example.org".to_string(),
            username: "bot".to_string(),
            password: "secret".to_string(),
            data_directory: "./data".to_string(),
            admins: vec!["@admin:example.org".to_string()],
            users: vec![],
        }
    }

    /// Builds a bot over the given mock with the default test config and
    /// the bot id `@bot:example.org`.
    pub(crate) fn make_bot(
        client: MockMatrixApi,
        commands: Vec<Box<dyn Command<MockMatrixApi>>>,
    ) -> MatrixBot<MockMatrixApi> {
        make_bot_with(client, test_config(), commands, None)
    }

    pub(crate) fn make_bot_with(
        mut client: MockMatrixApi,
        config: Config,
        commands: Vec<Box<dyn Command<MockMatrixApi>>>,
        default_command: Option<&str>,
    ) -> MatrixBot<MockMatrixApi> {
        client
            .expect_user_id()
            .return_const(user_id!("@bot:example.org").to_owned());
        let commander = Commander::new(&config.prefix, commands, default_command);
        MatrixBot::new(client, config, commander)
    }

    /// A text message sent now, i.e. admissible with regard to the replay
    /// guard.
    pub(crate) fn text_event(sender: &str, body: &str) -> InboundEvent {
        InboundEvent {
            event_id: Some(EventId::parse("$event0:example.org").unwrap()),
            sender: UserId::parse(sender).unwrap(),
            room_id: room_id!("!room:example.org").to_owned(),
            origin_timestamp: Some(MilliSecondsSinceUnixEpoch::now()),
            content: EventContent::Text(body.to_string()),
        }
    }

    fn invite_event(sender: &str, target: &str) -> InboundEvent {
        InboundEvent {
            event_id: None,
            sender: UserId::parse(sender).unwrap(),
            room_id: room_id!("!room:example.org").to_owned(),
            // stripped state events carry no origin timestamp
            origin_timestamp: None,
            content: EventContent::Member {
                state_key: UserId::parse(target).unwrap(),
                membership: MembershipState::Invite,
            },
        }
    }

    /// Command that records the parameters of each execution.
    struct RecordingCommand {
        name: &'static str,
        auto_acknowledge: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingCommand {
        fn new(name: &'static str) -> (Self, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(vec![]));
            (
                RecordingCommand {
                    name,
                    auto_acknowledge: false,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Command<MockMatrixApi> for RecordingCommand {
        fn name(&self) -> &str {
            self.name
        }

        fn help(&self) -> &str {
            "records its invocations"
        }

        fn auto_acknowledge(&self) -> bool {
            self.auto_acknowledge
        }

        async fn execute(
            &self,
            _bot: &MatrixBot<MockMatrixApi>,
            parameters: &str,
            _event: &InboundEvent,
        ) -> Result<(), Error> {
            self.calls.lock().unwrap().push(parameters.to_string());
            Ok(())
        }
    }

    // --- admission filter -------------------------------------------------

    #[test]
    fn test_admit_rejects_historical_events() {
        let bot = make_bot(MockMatrixApi::new(), vec![]);
        let mut event = text_event("@alice:example.org", "!bot help");
        event.origin_timestamp = Some(MilliSecondsSinceUnixEpoch(0u32.into()));
        assert!(!bot.admit(&event, false, false));
        // historical events are rejected regardless of the sender flags
        assert!(!bot.admit(&event, true, true));
    }

    #[test]
    fn test_admit_rejects_events_without_timestamp() {
        let bot = make_bot(MockMatrixApi::new(), vec![]);
        let mut event = text_event("@alice:example.org", "!bot help");
        event.origin_timestamp = None;
        assert!(!bot.admit(&event, false, false));
    }

    #[test]
    fn test_admit_accepts_event_at_exactly_the_start_timestamp() {
        let bot = make_bot(MockMatrixApi::new(), vec![]);
        let mut event = text_event("@alice:example.org", "!bot help");
        event.origin_timestamp = Some(bot.session().start_timestamp());
        assert!(bot.admit(&event, false, false));
    }

    #[test]
    fn test_admit_rejects_own_events_unless_allowed() {
        let bot = make_bot(MockMatrixApi::new(), vec![]);
        let event = text_event("@bot:example.org", "!bot help");
        assert!(!bot.admit(&event, false, false));
        assert!(bot.admit(&event, false, true));
    }

    #[test]
    fn test_admit_rejects_unauthorized_senders_unless_allowed() {
        let mut config = test_config();
        config.users = vec![":example.org".to_string()];
        let bot = make_bot_with(MockMatrixApi::new(), config, vec![], None);

        let event = text_event("@mallory:evil.org", "!bot help");
        assert!(!bot.admit(&event, false, false));
        assert!(bot.admit(&event, true, false));

        let event = text_event("@alice:example.org", "!bot help");
        assert!(bot.admit(&event, false, false));
    }

    // --- lifecycle --------------------------------------------------------

    fn lifecycle_mock(expected_logouts: usize) -> MockMatrixApi {
        let mut client = MockMatrixApi::new();
        client.expect_start_sync().times(1).returning(|| Ok(()));
        client.expect_stop_sync().return_const(());
        client.expect_sync_state().return_const(SyncState::Stopped);
        client
            .expect_logout_all()
            .times(expected_logouts)
            .returning(|| Ok(()));
        client
    }

    #[tokio::test]
    async fn test_repeated_quit_releases_the_gate_exactly_once() {
        let bot = make_bot(lifecycle_mock(0), vec![]);

        // all three quits happen before start_blocking; the gate holds a
        // single release
        bot.quit(false).await;
        bot.quit(false).await;
        bot.quit(false).await;

        let logout = bot.start_blocking().await.unwrap();
        assert!(!logout);
        assert!(!bot.session().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_from_another_task_unblocks_start() {
        let bot = Arc::new(make_bot(lifecycle_mock(0), vec![]));

        let runner = tokio::spawn({
            let bot = Arc::clone(&bot);
            async move { bot.start_blocking().await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bot.session().is_running());
        bot.quit(false).await;

        let logout = runner.await.unwrap().unwrap();
        assert!(!logout);
    }

    #[tokio::test]
    async fn test_logout_flag_is_sticky_across_quit_calls() {
        let bot = make_bot(lifecycle_mock(1), vec![]);

        bot.quit(false).await;
        bot.quit(true).await;
        bot.quit(false).await;

        let logout = bot.start_blocking().await.unwrap();
        assert!(logout);
    }

    // --- auto-join --------------------------------------------------------

    #[tokio::test]
    async fn test_auto_join_accepts_pending_invitation() {
        let mut client = MockMatrixApi::new();
        client
            .expect_room_membership()
            .times(1)
            .returning(|_| stream::iter(vec![Some(RoomMembership::Invited)]).boxed());
        client.expect_join_room().times(1).returning(|_| Ok(()));

        let bot = make_bot(client, vec![]);
        bot.on_member_event(&invite_event("@alice:example.org", "@bot:example.org"))
            .await;
    }

    #[tokio::test]
    async fn test_auto_join_skips_already_joined_room() {
        let mut client = MockMatrixApi::new();
        client
            .expect_room_membership()
            .times(1)
            .returning(|_| stream::iter(vec![Some(RoomMembership::Joined)]).boxed());
        client.expect_join_room().times(0);

        let bot = make_bot(client, vec![]);
        bot.on_member_event(&invite_event("@alice:example.org", "@bot:example.org"))
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_join_gives_up_when_membership_never_materializes() {
        let mut client = MockMatrixApi::new();
        client
            .expect_room_membership()
            .times(1)
            .returning(|_| stream::pending().boxed());
        client.expect_join_room().times(0);

        let bot = make_bot(client, vec![]);
        bot.on_member_event(&invite_event("@alice:example.org", "@bot:example.org"))
            .await;
    }

    #[tokio::test]
    async fn test_auto_join_ignores_invites_for_other_users() {
        let mut client = MockMatrixApi::new();
        client.expect_room_membership().times(0);
        client.expect_join_room().times(0);

        let bot = make_bot(client, vec![]);
        bot.on_member_event(&invite_event("@alice:example.org", "@carol:example.org"))
            .await;
    }

    #[tokio::test]
    async fn test_auto_join_ignores_self_sent_invites() {
        let mut client = MockMatrixApi::new();
        client.expect_join_room().times(0);

        let bot = make_bot(client, vec![]);
        bot.on_member_event(&invite_event("@bot:example.org", "@bot:example.org"))
            .await;
    }

    #[tokio::test]
    async fn test_auto_join_ignores_other_membership_changes() {
        let mut client = MockMatrixApi::new();
        client.expect_join_room().times(0);

        let bot = make_bot(client, vec![]);
        let mut event = invite_event("@alice:example.org", "@bot:example.org");
        event.content = EventContent::Member {
            state_key: user_id!("@bot:example.org").to_owned(),
            membership: MembershipState::Join,
        };
        bot.on_member_event(&event).await;
    }

    // --- message routing --------------------------------------------------

    #[tokio::test]
    async fn test_message_routes_to_named_command() {
        let (command, calls) = RecordingCommand::new("echo");
        let bot = make_bot(MockMatrixApi::new(), vec![Box::new(command)]);

        bot.on_message_event(&text_event("@alice:example.org", "!bot echo hello world"))
            .await;

        assert_eq!(*calls.lock().unwrap(), vec!["hello world".to_string()]);
    }

    #[tokio::test]
    async fn test_unprefixed_message_is_not_dispatched() {
        let (command, calls) = RecordingCommand::new("echo");
        let bot = make_bot(MockMatrixApi::new(), vec![Box::new(command)]);

        bot.on_message_event(&text_event("@alice:example.org", "echo hello"))
            .await;

        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_is_dropped_silently() {
        let (command, calls) = RecordingCommand::new("echo");
        // no send expectations on the mock: any feedback would panic
        let bot = make_bot(MockMatrixApi::new(), vec![Box::new(command)]);

        bot.on_message_event(&text_event("@alice:example.org", "!bot frobnicate"))
            .await;

        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_falls_back_to_default() {
        let (command, calls) = RecordingCommand::new("echo");
        let bot = make_bot_with(
            MockMatrixApi::new(),
            test_config(),
            vec![Box::new(command)],
            Some("echo"),
        );

        bot.on_message_event(&text_event("@alice:example.org", "!bot blah blah"))
            .await;

        assert_eq!(*calls.lock().unwrap(), vec!["blah blah".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_command_message_is_not_dispatched() {
        let (command, calls) = RecordingCommand::new("echo");
        let bot = make_bot(MockMatrixApi::new(), vec![Box::new(command)]);

        let mut event = text_event("@alice:example.org", "!bot echo hello");
        event.origin_timestamp = Some(MilliSecondsSinceUnixEpoch(0u32.into()));
        bot.on_message_event(&event).await;

        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auto_acknowledge_reacts_before_execution() {
        let (mut command, calls) = RecordingCommand::new("echo");
        command.auto_acknowledge = true;

        let mut client = MockMatrixApi::new();
        client
            .expect_send_reaction()
            .withf(|_, _, key| key == ACK_EMOJI)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let bot = make_bot(client, vec![Box::new(command)]);
        bot.on_message_event(&text_event("@alice:example.org", "!bot echo hi"))
            .await;

        assert_eq!(*calls.lock().unwrap(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_acknowledgment_does_not_block_execution() {
        let (mut command, calls) = RecordingCommand::new("echo");
        command.auto_acknowledge = true;

        let mut client = MockMatrixApi::new();
        client
            .expect_send_reaction()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("transport down")));

        let bot = make_bot(client, vec![Box::new(command)]);
        bot.on_message_event(&text_event("@alice:example.org", "!bot echo hi"))
            .await;

        assert_eq!(*calls.lock().unwrap(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_encrypted_message_is_routed_after_decryption() {
        let (command, calls) = RecordingCommand::new("echo");

        let mut client = MockMatrixApi::new();
        client.expect_event_content().times(1).returning(|_, _| {
            // first snapshot not yet decrypted, second carries the body
            stream::iter(vec![None, Some("!bot echo secret".to_string())]).boxed()
        });

        let bot = make_bot(client, vec![Box::new(command)]);
        let mut event = text_event("@alice:example.org", "");
        event.content = EventContent::Encrypted;
        bot.on_message_event(&event).await;

        assert_eq!(*calls.lock().unwrap(), vec!["secret".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encrypted_message_is_dropped_on_decryption_timeout() {
        let (command, calls) = RecordingCommand::new("echo");

        let mut client = MockMatrixApi::new();
        client
            .expect_event_content()
            .times(1)
            .returning(|_, _| stream::pending().boxed());

        let bot = make_bot(client, vec![Box::new(command)]);
        let mut event = text_event("@alice:example.org", "");
        event.content = EventContent::Encrypted;
        bot.on_message_event(&event).await;

        assert!(calls.lock().unwrap().is_empty());
    }
}
