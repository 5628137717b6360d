use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_db::NewMessage;
use parley_types::api::{Claims, MarkReadRequest, MarkReadResponse, SendMessageRequest};
use parley_types::models::Message;

use crate::auth::AppState;
use crate::with_db;

const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: `createdAt` of the oldest message already loaded.
    pub before: Option<String>,
    /// Cursor: id of the oldest message already loaded. Stable across
    /// messages that share a timestamp.
    #[serde(rename = "beforeId")]
    pub before_id: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

async fn ensure_participant(
    state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<(), StatusCode> {
    let allowed = with_db(state, move |db| db.is_participant(conversation_id, user_id)).await?;
    if allowed {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// A page of history, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    ensure_participant(&state, conversation_id, claims.sub).await?;

    let before = query
        .before
        .as_deref()
        .map(|raw| raw.parse::<DateTime<Utc>>())
        .transpose()
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let limit = query.limit.clamp(1, MAX_PAGE);
    let before_id = query.before_id;

    let mut messages = with_db(&state, move |db| {
        db.get_messages(conversation_id, limit, before, before_id)
    })
    .await?;
    messages.reverse();

    Ok(Json(messages))
}

/// Persist a message over REST and publish it like the socket path does.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, StatusCode> {
    let Json(req) = payload.map_err(|e| {
        warn!("Bad send-message body: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    let content = req
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let sender = req.sender.ok_or(StatusCode::BAD_REQUEST)?;

    if sender != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }
    ensure_participant(&state, conversation_id, sender).await?;

    let new = NewMessage {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id: sender,
        content,
        attachments: req.attachments,
    };
    let message = with_db(&state, move |db| db.insert_message(&new)).await?;

    state.gateway.publish_message(&message).await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Mark messages in this conversation as read by the caller.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<MarkReadRequest>, JsonRejection>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    let Json(req) = payload.map_err(|e| {
        warn!("Bad mark-read body: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    let reader = claims.sub;
    ensure_participant(&state, conversation_id, reader).await?;

    let ids = req.message_ids;
    let updated = with_db(&state, move |db| db.mark_read(&ids, reader, Some(conversation_id))).await?;
    debug!("{} marked {} messages read in {}", reader, updated.len(), conversation_id);

    Ok(Json(MarkReadResponse { success: true }))
}
