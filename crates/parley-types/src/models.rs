use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of a message. Ordered so that `advance` can never move
/// a message backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Move to `next` only if it is further along than the current status.
    pub fn advance(self, next: MessageStatus) -> MessageStatus {
        self.max(next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
    Away,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Away => "away",
        }
    }
}

impl FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "away" => Ok(Self::Away),
            other => Err(format!("unknown presence status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    /// Phone-derived handle, unique per user.
    pub handle: String,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    pub admin_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupInfo>,
    /// `None` until the first message is appended.
    pub last_message: Option<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// True if `user_id` is a participant who has not left.
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants
            .iter()
            .any(|p| p.user_id == user_id && p.left_at.is_none())
    }

    pub fn is_group(&self) -> bool {
        self.group.is_some()
    }
}

/// Attachment metadata. Transfer of the payload itself happens elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    #[serde(rename = "sender")]
    pub sender_id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub status: MessageStatus,
    pub read_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.contains(&user_id)
    }

    /// Record that `reader` has seen this message.
    ///
    /// The sender never triggers a read transition on their own message.
    /// Returns true if anything changed.
    pub fn apply_read(&mut self, reader: Uuid) -> bool {
        if reader == self.sender_id {
            return false;
        }

        let mut changed = false;
        if !self.read_by.contains(&reader) {
            self.read_by.push(reader);
            changed = true;
        }

        let next = self.status.advance(MessageStatus::Read);
        if next != self.status {
            self.status = next;
            changed = true;
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_from(sender: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: sender,
            content: "hi".into(),
            attachments: vec![],
            status: MessageStatus::Sent,
            read_by: vec![sender],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_never_regresses() {
        assert_eq!(MessageStatus::Read.advance(MessageStatus::Sent), MessageStatus::Read);
        assert_eq!(MessageStatus::Delivered.advance(MessageStatus::Sent), MessageStatus::Delivered);
        assert_eq!(MessageStatus::Sent.advance(MessageStatus::Read), MessageStatus::Read);
    }

    #[test]
    fn status_parses_only_known_values() {
        assert_eq!("delivered".parse::<MessageStatus>(), Ok(MessageStatus::Delivered));
        assert!("seen".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn sender_reading_own_message_is_ignored() {
        let sender = Uuid::new_v4();
        let mut msg = message_from(sender);

        assert!(!msg.apply_read(sender));
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.read_by, vec![sender]);
    }

    #[test]
    fn repeated_reads_keep_reader_once() {
        let sender = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let mut msg = message_from(sender);

        assert!(msg.apply_read(reader));
        assert!(!msg.apply_read(reader));

        assert_eq!(msg.status, MessageStatus::Read);
        assert_eq!(msg.read_by.iter().filter(|u| **u == reader).count(), 1);
    }

    #[test]
    fn participant_who_left_is_not_a_member() {
        let stays = Uuid::new_v4();
        let leaves = Uuid::new_v4();
        let now = Utc::now();
        let conv = Conversation {
            id: Uuid::new_v4(),
            participants: vec![
                Participant { user_id: stays, joined_at: now, left_at: None },
                Participant { user_id: leaves, joined_at: now, left_at: Some(now) },
            ],
            group: None,
            last_message: None,
            created_at: now,
            updated_at: now,
        };

        assert!(conv.has_participant(stays));
        assert!(!conv.has_participant(leaves));
    }
}
