//! Database row types. These map directly to SQLite rows; conversion into
//! the parley-types models happens here so callers never see raw strings.

use anyhow::{Result, anyhow};
use parley_types::models::{
    Attachment, GroupInfo, Message, MessageStatus, Participant, PresenceStatus, User,
};
use uuid::Uuid;

use crate::parse_ts;

pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub handle: String,
    pub status: String,
    pub last_seen: String,
}

pub struct ConversationRow {
    pub id: String,
    pub group_name: Option<String>,
    pub group_photo: Option<String>,
    pub group_admin: Option<String>,
    pub last_message_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub joined_at: String,
    pub left_at: Option<String>,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub status: String,
    pub created_at: String,
}

pub struct AttachmentRow {
    pub message_id: String,
    pub kind: String,
    pub url: String,
    pub name: Option<String>,
    pub size: Option<i64>,
}

/// Everything needed to persist a fresh message. Status starts at `sent`
/// and the sender is recorded as its first reader.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse::<Uuid>()
        .map_err(|e| anyhow!("Corrupt {} '{}': {}", what, raw, e))
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id, "user id")?,
            display_name: self.display_name,
            handle: self.handle,
            status: self
                .status
                .parse::<PresenceStatus>()
                .map_err(|e| anyhow!(e))?,
            last_seen: parse_ts(&self.last_seen)?,
        })
    }
}

impl ParticipantRow {
    pub fn into_participant(self) -> Result<Participant> {
        Ok(Participant {
            user_id: parse_id(&self.user_id, "participant id")?,
            joined_at: parse_ts(&self.joined_at)?,
            left_at: self.left_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

impl ConversationRow {
    pub fn group_info(&self) -> Result<Option<GroupInfo>> {
        match (&self.group_name, &self.group_admin) {
            (Some(name), Some(admin)) => Ok(Some(GroupInfo {
                name: name.clone(),
                photo: self.group_photo.clone(),
                admin_id: parse_id(admin, "group admin")?,
            })),
            _ => Ok(None),
        }
    }
}

impl MessageRow {
    pub fn into_message(self, attachments: Vec<Attachment>, read_by: Vec<Uuid>) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id, "message id")?,
            conversation_id: parse_id(&self.conversation_id, "conversation id")?,
            sender_id: parse_id(&self.sender_id, "sender id")?,
            content: self.content,
            attachments,
            status: self
                .status
                .parse::<MessageStatus>()
                .map_err(|e| anyhow!(e))?,
            read_by,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

impl AttachmentRow {
    pub fn into_attachment(self) -> Attachment {
        Attachment {
            kind: self.kind,
            url: self.url,
            name: self.name,
            size: self.size.and_then(|s| u64::try_from(s).ok()),
        }
    }
}
