use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::error::ChatError;
use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::{Conversation, Message, Participant, PresenceStatus};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::rest::{ChatApi, RestClient};
use crate::transport::{self, ConnectionState, TransportEvent, TransportHandle};
use crate::typing::{TypingDebouncer, TypingSignal, TypingTracker};

/// Last known presence of another user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEntry {
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

/// A failure the gateway reported for one of our commands.
#[derive(Debug, Clone)]
pub struct GatewayFailure {
    pub conversation_id: Option<Uuid>,
    pub error: ChatError,
}

/// Client-side mirror of one user's chat state.
///
/// Fed by REST fetches and by transport events through [`ChatSession::on_transport`].
/// The open conversation's messages are kept in the order they were applied.
pub struct ChatSession<A: ChatApi> {
    api: A,
    user_id: Uuid,
    commands: mpsc::UnboundedSender<GatewayCommand>,
    _transport: Option<TransportHandle>,
    connection: ConnectionState,

    conversations: Vec<Conversation>,
    active: Option<Uuid>,
    messages: Vec<Message>,
    unread: HashMap<Uuid, usize>,
    placeholders: HashSet<Uuid>,

    presence: HashMap<Uuid, PresenceEntry>,
    typing: TypingTracker,
    debouncer: TypingDebouncer,
    failures: Vec<GatewayFailure>,
}

impl ChatSession<RestClient> {
    /// Build a session against a live server and start its transport.
    /// Drive it by feeding the returned events to [`ChatSession::on_transport`].
    pub fn connect(
        config: &ClientConfig,
        token: &str,
        user_id: Uuid,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), ClientError> {
        let url = transport::gateway_url(&config.gateway_url, token, user_id)?;
        let api = RestClient::new(config.api_url.clone(), token, user_id);
        let (handle, commands, events) = transport::spawn(url, config.reconnect);

        let mut session = Self::new(api, user_id, config, commands);
        session._transport = Some(handle);
        session.connection = ConnectionState::Connecting;
        Ok((session, events))
    }
}

impl<A: ChatApi> ChatSession<A> {
    pub fn new(
        api: A,
        user_id: Uuid,
        config: &ClientConfig,
        commands: mpsc::UnboundedSender<GatewayCommand>,
    ) -> Self {
        Self {
            api,
            user_id,
            commands,
            _transport: None,
            connection: ConnectionState::Disconnected,
            conversations: Vec::new(),
            active: None,
            messages: Vec::new(),
            unread: HashMap::new(),
            placeholders: HashSet::new(),
            presence: HashMap::new(),
            typing: TypingTracker::new(config.typing_expiry),
            debouncer: TypingDebouncer::new(config.typing_debounce, config.typing_force_clear),
            failures: Vec::new(),
        }
    }

    // -- Accessors --

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn active_conversation(&self) -> Option<Uuid> {
        self.active
    }

    /// Messages of the open conversation, in applied order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn unread(&self, conversation_id: Uuid) -> usize {
        self.unread.get(&conversation_id).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> usize {
        self.unread.values().sum()
    }

    pub fn presence(&self, user_id: Uuid) -> Option<PresenceEntry> {
        self.presence.get(&user_id).copied()
    }

    pub fn typing_users(&self, conversation_id: Uuid) -> Vec<Uuid> {
        self.typing.typing_users(conversation_id)
    }

    pub fn is_placeholder(&self, conversation_id: Uuid) -> bool {
        self.placeholders.contains(&conversation_id)
    }

    pub fn is_typing(&self) -> bool {
        self.debouncer.is_announced()
    }

    /// Failures reported by the gateway since the last call.
    pub fn take_failures(&mut self) -> Vec<GatewayFailure> {
        std::mem::take(&mut self.failures)
    }

    // -- Operations --

    /// Load the conversation list. Call once after authenticating.
    pub async fn initialize(&mut self) -> Result<(), ClientError> {
        let conversations = self.api.list_conversations().await?;
        info!("Loaded {} conversations", conversations.len());

        // Placeholders never come back from the server; keep them.
        let placeholders: Vec<Conversation> = self
            .conversations
            .drain(..)
            .filter(|c| self.placeholders.contains(&c.id))
            .collect();
        self.conversations = placeholders;
        self.conversations.extend(conversations);

        for conversation in &self.conversations {
            self.unread.entry(conversation.id).or_insert(0);
        }
        Ok(())
    }

    /// Open a conversation: swap rooms and load its history.
    pub async fn select_conversation(&mut self, conversation_id: Uuid) -> Result<(), ClientError> {
        if self.conversation(conversation_id).is_none() {
            return Err(ClientError::UnknownConversation(conversation_id));
        }

        if let Some(previous) = self.active.filter(|p| *p != conversation_id) {
            if let Some(TypingSignal::Stop) = self.debouncer.reset(Instant::now()) {
                self.emit_quietly(GatewayCommand::TypingStop {
                    conversation_id: previous,
                });
            }
            if !self.is_placeholder(previous) {
                self.emit_quietly(GatewayCommand::LeaveConversation {
                    conversation_id: previous,
                });
            }
        }

        self.active = Some(conversation_id);
        self.messages.clear();

        if self.is_placeholder(conversation_id) {
            return Ok(());
        }

        self.emit_quietly(GatewayCommand::JoinConversation { conversation_id });

        let history = self.api.get_messages(conversation_id, None, None).await?;
        // The user may have switched again while the fetch was in flight.
        if self.active != Some(conversation_id) {
            return Ok(());
        }

        let mut seen = HashSet::new();
        self.messages = history.into_iter().filter(|m| seen.insert(m.id)).collect();
        self.recount_unread(conversation_id);
        Ok(())
    }

    /// Send text to the open conversation over the gateway. The message only
    /// shows up once the gateway echoes it back as `message:new`.
    pub fn send(&mut self, content: &str) -> Result<(), ClientError> {
        let conversation_id = self
            .active
            .ok_or_else(|| ClientError::Validation("no conversation selected".into()))?;
        if content.trim().is_empty() {
            return Err(ClientError::Validation("message is empty".into()));
        }

        if let Some(TypingSignal::Stop) = self.debouncer.reset(Instant::now()) {
            self.emit_quietly(GatewayCommand::TypingStop { conversation_id });
        }

        self.emit(GatewayCommand::SendMessage {
            conversation_id,
            content: content.to_string(),
            attachments: Vec::new(),
        })
    }

    /// Open the direct conversation with `target`, creating it if needed.
    ///
    /// If creation fails, a local placeholder is opened instead. It is never
    /// persisted or swapped for a real conversation later.
    pub async fn start_new_chat(&mut self, target: Uuid) -> Result<Uuid, ClientError> {
        let existing = self
            .conversations
            .iter()
            .find(|c| !c.is_group() && c.has_participant(target))
            .map(|c| c.id);
        if let Some(id) = existing {
            self.select_conversation(id).await?;
            return Ok(id);
        }

        match self.api.create_conversation(vec![target], None).await {
            Ok(conversation) => {
                let id = conversation.id;
                if self.conversation(id).is_none() {
                    self.conversations.insert(0, conversation);
                }
                self.unread.entry(id).or_insert(0);
                self.select_conversation(id).await?;
                Ok(id)
            }
            Err(e) => {
                warn!("Creating conversation with {} failed, using a placeholder: {}", target, e);
                let id = self.insert_placeholder(target);
                self.select_conversation(id).await?;
                Ok(id)
            }
        }
    }

    /// Mark messages of the open conversation as read. REST first; the
    /// gateway and local state only follow if that succeeded.
    pub async fn mark_as_read(&mut self, message_ids: Vec<Uuid>) -> Result<(), ClientError> {
        let conversation_id = self
            .active
            .ok_or_else(|| ClientError::Validation("no conversation selected".into()))?;
        if message_ids.is_empty() {
            return Ok(());
        }

        self.api.mark_read(conversation_id, message_ids.clone()).await?;

        if let Err(e) = self.emit(GatewayCommand::MarkRead {
            message_ids: message_ids.clone(),
        }) {
            debug!("Read receipt not relayed: {}", e);
        }

        let me = self.user_id;
        for message in self.messages.iter_mut() {
            if message_ids.contains(&message.id) {
                message.apply_read(me);
            }
        }
        self.recount_unread(conversation_id);
        Ok(())
    }

    /// Record a keystroke in the compose box.
    pub fn input_changed(&mut self, now: Instant) {
        if self.active.is_some() {
            self.debouncer.input(now);
        }
    }

    /// Advance typing timers. Call periodically, e.g. every few hundred ms.
    pub fn tick(&mut self, now: Instant) {
        if let (Some(signal), Some(conversation_id)) = (self.debouncer.poll(now), self.active) {
            let cmd = match signal {
                TypingSignal::Start => GatewayCommand::TypingStart { conversation_id },
                TypingSignal::Stop => GatewayCommand::TypingStop { conversation_id },
            };
            self.emit_quietly(cmd);
        }

        for (conversation_id, user_id) in self.typing.expire(now) {
            debug!("Typing indicator for {} in {} expired", user_id, conversation_id);
        }
    }

    pub fn on_transport(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Connected => {
                self.connection = ConnectionState::Connected;
                if let Some(conversation_id) = self.active.filter(|id| !self.is_placeholder(*id)) {
                    self.emit_quietly(GatewayCommand::JoinConversation { conversation_id });
                }
            }
            TransportEvent::Reconnecting { attempt } => {
                debug!("Reconnecting to gateway (attempt {})", attempt);
                self.connection = ConnectionState::Reconnecting;
                self.typing.clear();
            }
            TransportEvent::Disconnected { reason } => {
                warn!("Gateway unavailable: {}", reason);
                self.connection = ConnectionState::Disconnected;
                self.typing.clear();
            }
            TransportEvent::Event(event) => self.apply_event(event, now),
        }
    }

    /// Fold one gateway event into the mirror.
    pub fn apply_event(&mut self, event: GatewayEvent, now: Instant) {
        match event {
            GatewayEvent::Ready { user_id } => {
                debug!("Gateway ready for {}", user_id);
            }

            GatewayEvent::MessageNew(message) => self.apply_new_message(message),

            GatewayEvent::MessageError {
                conversation_id,
                error,
            } => {
                warn!("Send to {} failed: {}", conversation_id, error);
                self.failures.push(GatewayFailure {
                    conversation_id: Some(conversation_id),
                    error: ChatError::persistence(error),
                });
            }

            GatewayEvent::TypingStart {
                conversation_id,
                user_id,
            } => {
                if user_id != self.user_id {
                    self.typing.start(conversation_id, user_id, now);
                }
            }

            GatewayEvent::TypingStop {
                conversation_id,
                user_id,
            } => {
                self.typing.stop(conversation_id, user_id);
            }

            GatewayEvent::UserStatus {
                user_id,
                status,
                last_seen,
            } => {
                self.presence.insert(user_id, PresenceEntry { status, last_seen });
            }

            GatewayEvent::MessagesRead {
                message_ids,
                read_by,
                ..
            } => {
                for message in self.messages.iter_mut() {
                    if message_ids.contains(&message.id) {
                        message.apply_read(read_by);
                    }
                }
                for conversation in self.conversations.iter_mut() {
                    if let Some(last) = conversation.last_message.as_mut() {
                        if message_ids.contains(&last.id) {
                            last.apply_read(read_by);
                        }
                    }
                }
            }

            GatewayEvent::Error { kind, message } => {
                warn!("Gateway rejected a command: {}", message);
                self.failures.push(GatewayFailure {
                    conversation_id: None,
                    error: ChatError::new(kind, message),
                });
            }
        }
    }

    fn apply_new_message(&mut self, message: Message) {
        let conversation_id = message.conversation_id;
        let from_peer = message.sender_id != self.user_id;

        if self.active == Some(conversation_id) && self.messages.iter().any(|m| m.id == message.id) {
            debug!("Ignoring duplicate message {}", message.id);
            return;
        }
        if self
            .conversation(conversation_id)
            .and_then(|c| c.last_message.as_ref())
            .is_some_and(|last| last.id == message.id)
        {
            debug!("Ignoring duplicate message {}", message.id);
            return;
        }

        self.typing.stop(conversation_id, message.sender_id);

        match self.conversations.iter_mut().find(|c| c.id == conversation_id) {
            Some(conversation) => {
                conversation.updated_at = message.created_at;
                conversation.last_message = Some(message.clone());
            }
            None => debug!("Message for unknown conversation {}", conversation_id),
        }

        if from_peer {
            *self.unread.entry(conversation_id).or_insert(0) += 1;
        }

        if self.active == Some(conversation_id) {
            self.messages.push(message);
        }
    }

    fn insert_placeholder(&mut self, target: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let participant = |user_id| Participant {
            user_id,
            joined_at: now,
            left_at: None,
        };

        let placeholder = Conversation {
            id,
            participants: vec![participant(self.user_id), participant(target)],
            group: None,
            last_message: None,
            created_at: now,
            updated_at: now,
        };

        self.conversations.insert(0, placeholder);
        self.placeholders.insert(id);
        self.unread.insert(id, 0);
        id
    }

    fn recount_unread(&mut self, conversation_id: Uuid) {
        let me = self.user_id;
        let count = self
            .messages
            .iter()
            .filter(|m| m.sender_id != me && !m.is_read_by(me))
            .count();
        self.unread.insert(conversation_id, count);
    }

    /// Hand a command to the transport. Fails fast when not connected.
    fn emit(&self, cmd: GatewayCommand) -> Result<(), ClientError> {
        if self.connection != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        self.commands.send(cmd).map_err(|_| ClientError::NotConnected)
    }

    /// Best-effort emit for commands whose loss only costs a transient indicator.
    fn emit_quietly(&self, cmd: GatewayCommand) {
        if let Err(e) = self.emit(cmd) {
            debug!("Command dropped: {}", e);
        }
    }
}
