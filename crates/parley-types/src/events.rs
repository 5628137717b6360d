use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ErrorKind};
use crate::models::{Attachment, Message, PresenceStatus};

/// Events sent FROM the gateway TO clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Handshake accepted
    #[serde(rename = "ready")]
    Ready { user_id: Uuid },

    /// A message was persisted in a conversation the recipient has joined
    #[serde(rename = "message:new")]
    MessageNew(Message),

    /// Sending failed; delivered to the sender only
    #[serde(rename = "message:error")]
    MessageError { conversation_id: Uuid, error: String },

    #[serde(rename = "typing:start")]
    TypingStart { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename = "typing:stop")]
    TypingStop { conversation_id: Uuid, user_id: Uuid },

    /// A user came online or went offline
    #[serde(rename = "user:status")]
    UserStatus {
        user_id: Uuid,
        status: PresenceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<DateTime<Utc>>,
    },

    /// Read receipt, delivered process-wide
    #[serde(rename = "messages:read")]
    MessagesRead {
        message_ids: Vec<Uuid>,
        read_by: Uuid,
        read_at: DateTime<Utc>,
    },

    /// A command was rejected; delivered to the issuing connection only
    #[serde(rename = "error")]
    Error { kind: ErrorKind, message: String },
}

impl From<ChatError> for GatewayEvent {
    fn from(err: ChatError) -> Self {
        Self::Error {
            kind: err.kind,
            message: err.message,
        }
    }
}

/// Commands sent FROM clients TO the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    #[serde(rename = "join:conversation")]
    JoinConversation { conversation_id: Uuid },

    #[serde(rename = "leave:conversation")]
    LeaveConversation { conversation_id: Uuid },

    #[serde(rename = "message:send")]
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },

    #[serde(rename = "typing:start")]
    TypingStart { conversation_id: Uuid },

    #[serde(rename = "typing:stop")]
    TypingStop { conversation_id: Uuid },

    #[serde(rename = "message:read")]
    MarkRead { message_ids: Vec<Uuid> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_use_colon_names_and_camel_case() {
        let conversation_id = Uuid::new_v4();
        let raw = json!({
            "type": "message:send",
            "data": { "conversationId": conversation_id, "content": "hi" }
        });

        let cmd: GatewayCommand = serde_json::from_value(raw).unwrap();
        assert_eq!(
            cmd,
            GatewayCommand::SendMessage {
                conversation_id,
                content: "hi".into(),
                attachments: vec![],
            }
        );
    }

    #[test]
    fn read_receipt_wire_shape() {
        let id = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let event = GatewayEvent::MessagesRead {
            message_ids: vec![id],
            read_by: reader,
            read_at: Utc::now(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "messages:read");
        assert_eq!(value["data"]["messageIds"][0], json!(id));
        assert_eq!(value["data"]["readBy"], json!(reader));
        assert!(value["data"]["readAt"].is_string());
    }

    #[test]
    fn unknown_command_is_rejected() {
        let raw = json!({ "type": "user:typing", "data": {} });
        assert!(serde_json::from_value::<GatewayCommand>(raw).is_err());
    }
}
