use std::collections::{BTreeSet, HashMap};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, params_from_iter};
use uuid::Uuid;

use parley_types::models::{Attachment, Conversation, Message, MessageStatus, PresenceStatus, User};

use crate::models::{
    AttachmentRow, ConversationRow, MessageRow, NewMessage, ParticipantRow, UserRow, parse_id,
};
use crate::{Database, format_ts, parse_ts};

const CONVERSATION_COLUMNS: &str =
    "c.id, c.group_name, c.group_photo, c.group_admin, c.last_message_id, c.created_at, c.updated_at";

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.content, m.status, m.created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, display_name: &str, handle: &str) -> Result<()> {
        let now = format_ts(Utc::now());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, handle, status, last_seen, created_at)
                 VALUES (?1, ?2, ?3, 'offline', ?4, ?4)",
                params![id.to_string(), display_name, handle, now],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, &id.to_string()))?
            .map(UserRow::into_user)
            .transpose()
    }

    pub fn set_user_presence(
        &self,
        id: Uuid,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE users SET status = ?2, last_seen = ?3 WHERE id = ?1",
                params![id.to_string(), status.as_str(), format_ts(last_seen)],
            )?;
            if updated == 0 {
                return Err(anyhow!("User not found: {}", id));
            }
            Ok(())
        })
    }

    // -- Conversations --

    /// Create a conversation with the given participants. `group` carries
    /// (name, admin) for group conversations.
    pub fn create_conversation(
        &self,
        id: Uuid,
        participant_ids: &[Uuid],
        group: Option<(&str, Uuid)>,
    ) -> Result<()> {
        let now = format_ts(Utc::now());
        let cid = id.to_string();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, group_name, group_admin, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![
                    cid,
                    group.map(|(name, _)| name),
                    group.map(|(_, admin)| admin.to_string()),
                    now
                ],
            )?;
            for user_id in participant_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    params![cid, user_id.to_string(), now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Find the non-group conversation whose only participants are `a` and `b`.
    pub fn find_direct_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<Uuid>> {
        let id: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT c.id FROM conversations c
                 JOIN conversation_participants pa
                   ON pa.conversation_id = c.id AND pa.user_id = ?1 AND pa.left_at IS NULL
                 JOIN conversation_participants pb
                   ON pb.conversation_id = c.id AND pb.user_id = ?2 AND pb.left_at IS NULL
                 WHERE c.group_name IS NULL
                   AND (SELECT COUNT(*) FROM conversation_participants p
                        WHERE p.conversation_id = c.id) = 2
                 ORDER BY c.created_at
                 LIMIT 1",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )
            .optional()
        })?;

        id.map(|raw| parse_id(&raw, "conversation id")).transpose()
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1");
            let rows = conn
                .prepare(&sql)?
                .query_map([id.to_string()], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(hydrate_conversations(conn, rows)?.into_iter().next())
        })
    }

    /// Conversations `user_id` currently participates in, most recently
    /// active first.
    pub fn list_conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1 AND p.left_at IS NULL
                 ORDER BY c.updated_at DESC, c.rowid DESC"
            );
            let rows = conn
                .prepare(&sql)?
                .query_map([user_id.to_string()], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            hydrate_conversations(conn, rows)
        })
    }

    pub fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM conversation_participants
                    WHERE conversation_id = ?1 AND user_id = ?2 AND left_at IS NULL
                 )",
                params![conversation_id.to_string(), user_id.to_string()],
                |row| row.get::<_, bool>(0),
            )?;
            Ok(exists)
        })
    }

    /// Advance the conversation's lastMessage pointer.
    pub fn set_last_message(&self, conversation_id: Uuid, message_id: Uuid) -> Result<()> {
        let now = format_ts(Utc::now());
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE conversations SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![conversation_id.to_string(), message_id.to_string(), now],
            )?;
            if updated == 0 {
                return Err(anyhow!("Conversation not found: {}", conversation_id));
            }
            Ok(())
        })
    }

    // -- Messages --

    /// Persist a message with status `sent` and the sender as its only reader.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        let created_at = format_ts(Utc::now());
        let mid = new.id.to_string();
        let sender = new.sender_id.to_string();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'sent', ?5)",
                params![mid, new.conversation_id.to_string(), sender, new.content, created_at],
            )?;
            for (position, attachment) in new.attachments.iter().enumerate() {
                tx.execute(
                    "INSERT INTO message_attachments (message_id, position, kind, url, name, size)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        mid,
                        position as i64,
                        attachment.kind,
                        attachment.url,
                        attachment.name,
                        attachment.size.map(|s| s as i64)
                    ],
                )?;
            }
            tx.execute(
                "INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                params![mid, sender, created_at],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        Ok(Message {
            id: new.id,
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content.clone(),
            attachments: new.attachments.clone(),
            status: MessageStatus::Sent,
            read_by: vec![new.sender_id],
            created_at: parse_ts(&created_at)?,
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let rows = query_messages_by_ids(conn, &[id.to_string()])?;
            Ok(hydrate_messages(conn, rows)?.into_iter().next())
        })
    }

    /// Newest-first page of a conversation's messages, optionally strictly
    /// older than `before`.
    ///
    /// `before_id` pages relative to an already-loaded message instead and
    /// orders by `(created_at, rowid)`, so messages sharing a timestamp with
    /// the cursor are not skipped. An unknown `before_id` yields an empty page.
    pub fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
        before_id: Option<Uuid>,
    ) -> Result<Vec<Message>> {
        let before = before.map(format_ts);
        let before_id = before_id.map(|id| id.to_string());
        self.with_conn(|conn| {
            let rows = query_messages(
                conn,
                &conversation_id.to_string(),
                limit,
                before.as_deref(),
                before_id.as_deref(),
            )?;
            hydrate_messages(conn, rows)
        })
    }

    /// Mark messages as read by `reader`. Messages sent by `reader` are
    /// skipped, as are messages in conversations `reader` is not an active
    /// participant of; when `conversation_id` is given, so are messages
    /// outside it.
    /// Returns the ids that passed the filter, already-read ones included.
    /// Re-reading is a no-op.
    pub fn mark_read(
        &self,
        message_ids: &[Uuid],
        reader: Uuid,
        conversation_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>> {
        let now = format_ts(Utc::now());
        let reader = reader.to_string();
        let conversation = conversation_id.map(|c| c.to_string());
        let ids: BTreeSet<Uuid> = message_ids.iter().copied().collect();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut matched = Vec::new();
            {
                let mut eligible = tx.prepare(
                    "SELECT 1 FROM messages m
                     WHERE m.id = ?1 AND m.sender_id != ?2
                       AND (?3 IS NULL OR m.conversation_id = ?3)
                       AND EXISTS (
                           SELECT 1 FROM conversation_participants p
                           WHERE p.conversation_id = m.conversation_id
                             AND p.user_id = ?2 AND p.left_at IS NULL
                       )",
                )?;
                let mut add_reader = tx.prepare(
                    "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                     VALUES (?1, ?2, ?3)",
                )?;
                // 'read' is the terminal status, so this never regresses.
                let mut set_read = tx.prepare("UPDATE messages SET status = 'read' WHERE id = ?1")?;

                for id in &ids {
                    let key = id.to_string();
                    if !eligible.exists(params![key, reader, conversation])? {
                        continue;
                    }
                    add_reader.execute(params![key, reader, now])?;
                    set_read.execute([&key])?;
                    matched.push(*id);
                }
            }
            tx.commit()?;
            Ok(matched)
        })
    }
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, display_name, handle, status, last_seen FROM users WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                display_name: row.get(1)?,
                handle: row.get(2)?,
                status: row.get(3)?,
                last_seen: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        group_name: row.get(1)?,
        group_photo: row.get(2)?,
        group_admin: row.get(3)?,
        last_message_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn query_messages(
    conn: &Connection,
    conversation_id: &str,
    limit: u32,
    before: Option<&str>,
    before_id: Option<&str>,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         WHERE m.conversation_id = ?1
           AND (?3 IS NULL OR m.created_at < ?3)
           AND (?4 IS NULL OR (m.created_at, m.rowid) <
                (SELECT c.created_at, c.rowid FROM messages c
                 WHERE c.id = ?4 AND c.conversation_id = ?1))
         ORDER BY m.created_at DESC, m.rowid DESC
         LIMIT ?2"
    );
    let rows = conn
        .prepare(&sql)?
        .query_map(params![conversation_id, limit, before, before_id], map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_messages_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<MessageRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id IN ({})",
        placeholders(ids.len())
    );
    let rows = conn
        .prepare(&sql)?
        .query_map(params_from_iter(ids.iter()), map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Batch-load attachments and readers for a set of message rows (one query
/// each instead of N+1), keeping the input order.
fn hydrate_messages(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let in_list = placeholders(ids.len());

    let attachment_rows = conn
        .prepare(&format!(
            "SELECT message_id, kind, url, name, size FROM message_attachments
             WHERE message_id IN ({in_list}) ORDER BY message_id, position"
        ))?
        .query_map(params_from_iter(ids.iter()), |row| {
            Ok(AttachmentRow {
                message_id: row.get(0)?,
                kind: row.get(1)?,
                url: row.get(2)?,
                name: row.get(3)?,
                size: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut attachments: HashMap<String, Vec<Attachment>> = HashMap::new();
    for a in attachment_rows {
        attachments
            .entry(a.message_id.clone())
            .or_default()
            .push(a.into_attachment());
    }

    let read_rows = conn
        .prepare(&format!(
            "SELECT message_id, user_id FROM message_reads
             WHERE message_id IN ({in_list}) ORDER BY rowid"
        ))?
        .query_map(params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut readers: HashMap<String, Vec<Uuid>> = HashMap::new();
    for (message_id, user_id) in read_rows {
        readers
            .entry(message_id)
            .or_default()
            .push(parse_id(&user_id, "reader id")?);
    }

    rows.into_iter()
        .map(|row| {
            let a = attachments.remove(&row.id).unwrap_or_default();
            let r = readers.remove(&row.id).unwrap_or_default();
            row.into_message(a, r)
        })
        .collect()
}

fn hydrate_conversations(conn: &Connection, rows: Vec<ConversationRow>) -> Result<Vec<Conversation>> {
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    let participant_rows = conn
        .prepare(&format!(
            "SELECT conversation_id, user_id, joined_at, left_at FROM conversation_participants
             WHERE conversation_id IN ({}) ORDER BY joined_at, rowid",
            placeholders(ids.len())
        ))?
        .query_map(params_from_iter(ids.iter()), |row| {
            Ok(ParticipantRow {
                conversation_id: row.get(0)?,
                user_id: row.get(1)?,
                joined_at: row.get(2)?,
                left_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut participants: HashMap<String, Vec<_>> = HashMap::new();
    for p in participant_rows {
        participants
            .entry(p.conversation_id.clone())
            .or_default()
            .push(p.into_participant()?);
    }

    let last_ids: Vec<String> = rows.iter().filter_map(|r| r.last_message_id.clone()).collect();
    let mut last_messages: HashMap<Uuid, Message> =
        hydrate_messages(conn, query_messages_by_ids(conn, &last_ids)?)?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

    rows.into_iter()
        .map(|row| {
            let group = row.group_info()?;
            let last_message = match &row.last_message_id {
                Some(raw) => last_messages.remove(&parse_id(raw, "last message id")?),
                None => None,
            };
            Ok(Conversation {
                id: parse_id(&row.id, "conversation id")?,
                participants: participants.remove(&row.id).unwrap_or_default(),
                group,
                last_message,
                created_at: parse_ts(&row.created_at)?,
                updated_at: parse_ts(&row.updated_at)?,
            })
        })
        .collect()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
