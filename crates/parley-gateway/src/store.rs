use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_db::{Database, NewMessage};
use parley_types::models::{Message, PresenceStatus};

/// Persistence operations the gateway writes through. The gateway never
/// mutates conversation or message state except via this trait.
pub trait ChatStore: Send + Sync + 'static {
    fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool>;

    fn insert_message(&self, new: &NewMessage) -> Result<Message>;

    fn set_last_message(&self, conversation_id: Uuid, message_id: Uuid) -> Result<()>;

    /// Mark messages read by `reader`, skipping messages `reader` sent and
    /// messages outside `reader`'s conversations. Returns the ids that counted.
    fn mark_read(&self, message_ids: &[Uuid], reader: Uuid) -> Result<Vec<Uuid>>;

    fn set_presence(&self, user_id: Uuid, status: PresenceStatus, last_seen: DateTime<Utc>) -> Result<()>;
}

impl ChatStore for Database {
    fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        Database::is_participant(self, conversation_id, user_id)
    }

    fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        Database::insert_message(self, new)
    }

    fn set_last_message(&self, conversation_id: Uuid, message_id: Uuid) -> Result<()> {
        Database::set_last_message(self, conversation_id, message_id)
    }

    fn mark_read(&self, message_ids: &[Uuid], reader: Uuid) -> Result<Vec<Uuid>> {
        Database::mark_read(self, message_ids, reader, None)
    }

    fn set_presence(&self, user_id: Uuid, status: PresenceStatus, last_seen: DateTime<Utc>) -> Result<()> {
        Database::set_user_presence(self, user_id, status, last_seen)
    }
}

/// Run a blocking store call off the async runtime so one slow write
/// does not stall other connections.
pub(crate) async fn blocking<F, T>(store: &Arc<dyn ChatStore>, f: F) -> Result<T>
where
    F: FnOnce(&dyn ChatStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}
