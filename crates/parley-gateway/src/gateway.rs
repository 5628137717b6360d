use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_db::NewMessage;
use parley_types::error::ChatError;
use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::{Attachment, Message, PresenceStatus};

use crate::dispatcher::Dispatcher;
use crate::presence::ConnectionId;
use crate::store::{ChatStore, blocking};

/// Who is speaking over which connection. Fixed for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub conn_id: ConnectionId,
    pub user_id: Uuid,
}

/// Routes inbound commands to handlers and emits events to the right
/// recipients. Cheap to clone; all clones share one dispatcher and store.
#[derive(Clone)]
pub struct Gateway {
    dispatcher: Dispatcher,
    store: Arc<dyn ChatStore>,
}

impl Gateway {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            store,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Bring an authenticated user online on a new connection.
    ///
    /// The new connection gets `ready` plus the current online set; everyone
    /// else learns the user is online. Any previous connection for the same
    /// user is superseded and dropped from every room.
    pub async fn connect(&self, user_id: Uuid) -> (Session, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (conn_id, rx) = self.dispatcher.register_connection(user_id).await;
        let session = Session { conn_id, user_id };

        self.dispatcher
            .send_to(conn_id, GatewayEvent::Ready { user_id })
            .await;

        for other in self.dispatcher.presence().online_users().await {
            if other == user_id {
                continue;
            }
            self.dispatcher
                .send_to(
                    conn_id,
                    GatewayEvent::UserStatus {
                        user_id: other,
                        status: PresenceStatus::Online,
                        last_seen: None,
                    },
                )
                .await;
        }

        if let Some(previous) = self.dispatcher.presence().register(user_id, conn_id).await {
            info!("{} reconnected; connection {} superseded by {}", user_id, previous, conn_id);
            // Dropping its channel ends the old socket's send loop.
            self.dispatcher.unregister_connection(previous).await;
        }

        self.write_presence(user_id, PresenceStatus::Online).await;

        self.dispatcher
            .broadcast_except(
                conn_id,
                GatewayEvent::UserStatus {
                    user_id,
                    status: PresenceStatus::Online,
                    last_seen: None,
                },
            )
            .await;

        (session, rx)
    }

    /// Handle one inbound command to completion. Failures are reported to
    /// the issuing connection only.
    pub async fn handle_command(&self, session: &Session, cmd: GatewayCommand) {
        let result = match cmd {
            GatewayCommand::JoinConversation { conversation_id } => {
                self.join_conversation(session, conversation_id).await
            }

            GatewayCommand::LeaveConversation { conversation_id } => {
                self.leave_conversation(session, conversation_id).await;
                Ok(())
            }

            GatewayCommand::SendMessage {
                conversation_id,
                content,
                attachments,
            } => {
                if let Err(err) = self
                    .send_message(session, conversation_id, content, attachments)
                    .await
                {
                    warn!(
                        "{} send to {} failed: {}",
                        session.user_id, conversation_id, err
                    );
                    self.dispatcher
                        .send_to(
                            session.conn_id,
                            GatewayEvent::MessageError {
                                conversation_id,
                                error: err.message,
                            },
                        )
                        .await;
                }
                Ok(())
            }

            GatewayCommand::TypingStart { conversation_id } => {
                self.relay_typing(session, conversation_id, true).await;
                Ok(())
            }

            GatewayCommand::TypingStop { conversation_id } => {
                self.relay_typing(session, conversation_id, false).await;
                Ok(())
            }

            GatewayCommand::MarkRead { message_ids } => self.mark_read(session, message_ids).await,
        };

        if let Err(err) = result {
            warn!("{} command rejected: {}", session.user_id, err);
            self.dispatcher.send_to(session.conn_id, err.into()).await;
        }
    }

    /// Join a conversation room. Only active participants may join.
    pub async fn join_conversation(
        &self,
        session: &Session,
        conversation_id: Uuid,
    ) -> Result<(), ChatError> {
        let user_id = session.user_id;
        let allowed = blocking(&self.store, move |store| {
            store.is_participant(conversation_id, user_id)
        })
        .await
        .map_err(|e| {
            error!("Participant lookup for {} failed: {}", conversation_id, e);
            ChatError::persistence("Failed to join conversation")
        })?;

        if !allowed {
            return Err(ChatError::forbidden("Not a participant in this conversation"));
        }

        if self.dispatcher.join_room(conversation_id, session.conn_id).await {
            debug!("{} joined conversation {}", user_id, conversation_id);
        }
        Ok(())
    }

    pub async fn leave_conversation(&self, session: &Session, conversation_id: Uuid) {
        if self.dispatcher.leave_room(conversation_id, session.conn_id).await {
            debug!("{} left conversation {}", session.user_id, conversation_id);
        }
    }

    /// Persist a message, then publish it to the conversation room.
    ///
    /// Nothing reaches the room unless the write succeeded.
    pub async fn send_message(
        &self,
        session: &Session,
        conversation_id: Uuid,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<Message, ChatError> {
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::validation("Message content is required"));
        }

        let sender_id = session.user_id;
        let allowed = blocking(&self.store, move |store| {
            store.is_participant(conversation_id, sender_id)
        })
        .await
        .map_err(|e| {
            error!("Participant lookup for {} failed: {}", conversation_id, e);
            ChatError::persistence("Failed to send message")
        })?;

        if !allowed {
            return Err(ChatError::forbidden("Not a participant in this conversation"));
        }

        let new = NewMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content,
            attachments,
        };
        let message = blocking(&self.store, move |store| store.insert_message(&new))
            .await
            .map_err(|e| {
                error!("Error persisting message in {}: {}", conversation_id, e);
                ChatError::persistence("Failed to send message")
            })?;

        self.publish_message(&message).await;
        Ok(message)
    }

    /// Broadcast an already-persisted message to its room and advance the
    /// conversation's lastMessage pointer.
    pub async fn publish_message(&self, message: &Message) {
        let conversation_id = message.conversation_id;
        let message_id = message.id;

        let delivered = self
            .dispatcher
            .broadcast_room(conversation_id, GatewayEvent::MessageNew(message.clone()))
            .await;
        debug!(
            "Message {} delivered to {} connections in {}",
            message_id, delivered, conversation_id
        );

        if let Err(e) = blocking(&self.store, move |store| {
            store.set_last_message(conversation_id, message_id)
        })
        .await
        {
            warn!("Failed to advance lastMessage for {}: {}", conversation_id, e);
        }
    }

    /// Relay a typing change to the other members of the room. Nothing is stored.
    pub async fn relay_typing(&self, session: &Session, conversation_id: Uuid, started: bool) {
        if !self.dispatcher.in_room(conversation_id, session.conn_id).await {
            debug!(
                "{} typing in {} without joining; ignored",
                session.user_id, conversation_id
            );
            return;
        }

        let event = if started {
            GatewayEvent::TypingStart {
                conversation_id,
                user_id: session.user_id,
            }
        } else {
            GatewayEvent::TypingStop {
                conversation_id,
                user_id: session.user_id,
            }
        };

        self.dispatcher
            .broadcast_room_except(conversation_id, session.conn_id, event)
            .await;
    }

    /// Record a read receipt and announce it process-wide so the sender
    /// hears about it whichever room they are in. Re-reading still announces.
    ///
    /// Only messages the reader may read are recorded and announced: their
    /// own messages and messages outside their conversations are dropped.
    pub async fn mark_read(&self, session: &Session, message_ids: Vec<Uuid>) -> Result<(), ChatError> {
        if message_ids.is_empty() {
            return Err(ChatError::validation("messageIds must not be empty"));
        }

        let reader = session.user_id;
        let requested = message_ids.len();
        let message_ids = blocking(&self.store, move |store| store.mark_read(&message_ids, reader))
            .await
            .map_err(|e| {
                error!("Error updating read status for {}: {}", reader, e);
                ChatError::persistence("Failed to mark messages as read")
            })?;

        debug!("{} read {} of {} messages", reader, message_ids.len(), requested);
        if message_ids.is_empty() {
            return Ok(());
        }

        self.dispatcher
            .broadcast(GatewayEvent::MessagesRead {
                message_ids,
                read_by: reader,
                read_at: Utc::now(),
            })
            .await;
        Ok(())
    }

    /// Tear down a connection. The user only goes offline if this connection
    /// is still the one registered for them.
    pub async fn disconnect(&self, session: &Session) {
        self.dispatcher.unregister_connection(session.conn_id).await;

        if !self
            .dispatcher
            .presence()
            .unregister(session.user_id, session.conn_id)
            .await
        {
            debug!(
                "{} connection {} closed after being superseded",
                session.user_id, session.conn_id
            );
            return;
        }

        let last_seen = self.write_presence(session.user_id, PresenceStatus::Offline).await;

        self.dispatcher
            .broadcast(GatewayEvent::UserStatus {
                user_id: session.user_id,
                status: PresenceStatus::Offline,
                last_seen: Some(last_seen),
            })
            .await;
    }

    /// Mark everyone offline and empty the registry. Called on shutdown.
    pub async fn shutdown(&self) {
        let users = self.dispatcher.presence().drain().await;
        for user_id in &users {
            self.write_presence(*user_id, PresenceStatus::Offline).await;
        }
        info!("Gateway shut down; {} users marked offline", users.len());
    }

    /// Best-effort write of the user's presence to the User record.
    async fn write_presence(&self, user_id: Uuid, status: PresenceStatus) -> chrono::DateTime<Utc> {
        let now = Utc::now();
        if let Err(e) = blocking(&self.store, move |store| store.set_presence(user_id, status, now)).await {
            warn!("Failed to record {} as {}: {}", user_id, status.as_str(), e);
        }
        now
    }
}
