use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::api::{Claims, CreateConversationRequest};
use parley_types::models::Conversation;

use crate::auth::AppState;
use crate::with_db;

/// The caller's conversations, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Conversation>>, StatusCode> {
    let user_id = claims.sub;
    let conversations = with_db(&state, move |db| db.list_conversations_for_user(user_id)).await?;
    Ok(Json(conversations))
}

/// Create a conversation, or return the existing direct conversation
/// between the same two users.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, StatusCode> {
    let Json(req) = payload.map_err(|e| {
        warn!("Bad create-conversation body: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    if req.participant_ids.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let caller = claims.sub;
    let mut participants = vec![caller];
    for id in req.participant_ids {
        if !participants.contains(&id) {
            participants.push(id);
        }
    }

    let group_name = req
        .group_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    // A conversation with just the caller, or an unnamed crowd, has no sensible shape.
    if participants.len() < 2 || (participants.len() > 2 && group_name.is_none()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let lookup = participants.clone();
    let all_known = with_db(&state, move |db| {
        for id in &lookup {
            if db.get_user(*id)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    })
    .await?;
    if !all_known {
        return Err(StatusCode::BAD_REQUEST);
    }

    if group_name.is_none() {
        let other = participants[1];
        let existing = with_db(&state, move |db| match db.find_direct_conversation(caller, other)? {
            Some(id) => db.get_conversation(id),
            None => Ok(None),
        })
        .await?;
        if let Some(conversation) = existing {
            return Ok((StatusCode::OK, Json(conversation)));
        }
    }

    let conversation_id = Uuid::new_v4();
    let created = with_db(&state, move |db| {
        db.create_conversation(
            conversation_id,
            &participants,
            group_name.as_deref().map(|name| (name, caller)),
        )?;
        db.get_conversation(conversation_id)
    })
    .await?
    .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    info!(
        "{} created conversation {} with {} participants",
        caller,
        conversation_id,
        created.participants.len()
    );
    Ok((StatusCode::CREATED, Json(created)))
}
