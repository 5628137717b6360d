use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_types::api::Claims;
use parley_types::error::ChatError;
use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::gateway::Gateway;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Credentials presented on the upgrade request: `/gateway?token=..&userId=..`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    pub token: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Clone)]
pub struct GatewayState {
    pub gateway: Gateway,
    pub jwt_secret: String,
}

/// Check the handshake credentials. The token must verify and its subject
/// must match the claimed user id.
pub fn authenticate(params: &HandshakeParams, jwt_secret: &str) -> Result<Uuid, ChatError> {
    let token = params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ChatError::authentication("Missing token"))?;

    let claimed = params
        .user_id
        .as_deref()
        .ok_or_else(|| ChatError::authentication("Missing userId"))?;
    let claimed: Uuid = claimed
        .parse()
        .map_err(|_| ChatError::authentication("Invalid userId"))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ChatError::authentication("Invalid token"))?;

    if token_data.claims.sub != claimed {
        return Err(ChatError::authentication("Token does not match userId"));
    }

    Ok(claimed)
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
}

/// Authenticate before upgrading so rejected clients never get a socket.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<HandshakeParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_id = match authenticate(&params, &state.jwt_secret) {
        Ok(user_id) => user_id,
        Err(err) => {
            warn!("Gateway handshake rejected: {}", err.message);
            return (StatusCode::UNAUTHORIZED, err.message).into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_connection(socket, gateway, user_id))
}

/// Drive one authenticated WebSocket until either side goes away.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let (session, mut events_rx) = gateway.connect(user_id).await;

    info!("{} connected to gateway ({})", user_id, session.conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_gateway = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => recv_gateway.handle_command(&session, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        recv_gateway
                            .dispatcher()
                            .send_to(
                                session.conn_id,
                                GatewayEvent::from(ChatError::validation(format!(
                                    "Malformed command: {}",
                                    e
                                ))),
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.disconnect(&session).await;
    info!("{} disconnected from gateway ({})", user_id, session.conn_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "gateway-test-secret";

    fn token_for(sub: Uuid, secret: &str) -> String {
        let claims = Claims {
            sub,
            handle: "alice".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_matching_token_and_user() {
        let user = Uuid::new_v4();
        let params = HandshakeParams {
            token: Some(token_for(user, SECRET)),
            user_id: Some(user.to_string()),
        };
        assert_eq!(authenticate(&params, SECRET).unwrap(), user);
    }

    #[test]
    fn rejects_missing_credentials() {
        let err = authenticate(&HandshakeParams::default(), SECRET).unwrap_err();
        assert_eq!(err.kind, parley_types::error::ErrorKind::Authentication);

        let user = Uuid::new_v4();
        let params = HandshakeParams {
            token: Some(token_for(user, SECRET)),
            user_id: None,
        };
        assert!(authenticate(&params, SECRET).is_err());
    }

    #[test]
    fn rejects_token_for_another_user() {
        let params = HandshakeParams {
            token: Some(token_for(Uuid::new_v4(), SECRET)),
            user_id: Some(Uuid::new_v4().to_string()),
        };
        assert!(authenticate(&params, SECRET).is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        let user = Uuid::new_v4();
        let params = HandshakeParams {
            token: Some(token_for(user, "some-other-secret")),
            user_id: Some(user.to_string()),
        };
        assert!(authenticate(&params, SECRET).is_err());
    }
}
