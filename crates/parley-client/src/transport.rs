//! The gateway socket, owned by one background task.
//!
//! The task connects, forwards decoded events to the session and writes
//! commands from the session. When the socket drops it waits and reconnects
//! under a [`ReconnectPolicy`]; a handshake rejected with 401 is final.
//! Commands that arrive while no socket is open are discarded.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::error::ClientError;

/// Bounded retries with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Retries after a failed connect or a short-lived connection, on top
    /// of the first attempt.
    pub attempts: u32,
    pub delay: Duration,
    /// A connection that stays up this long restores the full retry budget.
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
            stable_after: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    /// The socket is down and a retry is underway. `attempt` is 0 after a
    /// connection that was stable, then counts consecutive failures.
    Reconnecting { attempt: u32 },
    Event(GatewayEvent),
    /// Gave up. No further events follow.
    Disconnected { reason: String },
}

/// Keeps the transport task alive; aborts it on drop.
pub struct TransportHandle {
    task: JoinHandle<()>,
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Build the handshake URL: `<gateway>?token=..&userId=..`
pub fn gateway_url(base: &str, token: &str, user_id: Uuid) -> Result<Url, ClientError> {
    let user_id = user_id.to_string();
    Url::parse_with_params(base, &[("token", token), ("userId", user_id.as_str())])
        .map_err(|e| ClientError::Validation(format!("invalid gateway url {base}: {e}")))
}

/// Start the transport task.
pub fn spawn(
    url: Url,
    policy: ReconnectPolicy,
) -> (
    TransportHandle,
    mpsc::UnboundedSender<GatewayCommand>,
    mpsc::UnboundedReceiver<TransportEvent>,
) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(url, policy, cmd_rx, event_tx));
    (TransportHandle { task }, cmd_tx, event_rx)
}

enum SocketEnd {
    /// Server closed or the connection failed; worth reconnecting.
    Dropped,
    /// The session went away.
    Shutdown,
}

async fn run(
    url: Url,
    policy: ReconnectPolicy,
    mut cmd_rx: mpsc::UnboundedReceiver<GatewayCommand>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut failures: u32 = 0;

    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                let up_since = Instant::now();
                // Anything queued while offline is stale.
                while cmd_rx.try_recv().is_ok() {}

                info!("Connected to gateway");
                if event_tx.send(TransportEvent::Connected).is_err() {
                    return;
                }

                match pump(socket, &mut cmd_rx, &event_tx).await {
                    SocketEnd::Shutdown => return,
                    SocketEnd::Dropped => {
                        if up_since.elapsed() >= policy.stable_after {
                            failures = 0;
                        } else {
                            failures += 1;
                        }
                        warn!("Gateway connection dropped ({})", failures);
                        if failures > policy.attempts {
                            let _ = event_tx.send(TransportEvent::Disconnected {
                                reason: format!("connection kept dropping after {} attempts", failures),
                            });
                            return;
                        }
                        if event_tx
                            .send(TransportEvent::Reconnecting { attempt: failures })
                            .is_err()
                        {
                            return;
                        }
                        tokio::time::sleep(policy.delay).await;
                    }
                }
            }
            Err(tungstenite::Error::Http(resp)) if resp.status().as_u16() == 401 => {
                warn!("Gateway rejected credentials");
                let _ = event_tx.send(TransportEvent::Disconnected {
                    reason: "unauthorized".into(),
                });
                return;
            }
            Err(e) => {
                failures += 1;
                warn!("Gateway connect failed ({}): {}", failures, e);
                if failures > policy.attempts {
                    let _ = event_tx.send(TransportEvent::Disconnected {
                        reason: format!("gave up after {} attempts: {}", failures, e),
                    });
                    return;
                }
                if event_tx
                    .send(TransportEvent::Reconnecting { attempt: failures })
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

async fn pump<S>(
    socket: tokio_tungstenite::WebSocketStream<S>,
    cmd_rx: &mut mpsc::UnboundedReceiver<GatewayCommand>,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> SocketEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = stream.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!("Gateway read error: {}", e);
                        return SocketEnd::Dropped;
                    }
                    None => return SocketEnd::Dropped,
                };

                match msg {
                    WsMessage::Text(text) => match serde_json::from_str::<GatewayEvent>(&text) {
                        Ok(event) => {
                            if event_tx.send(TransportEvent::Event(event)).is_err() {
                                let _ = sink.close().await;
                                return SocketEnd::Shutdown;
                            }
                        }
                        Err(e) => warn!("Unreadable gateway event: {}", e),
                    },
                    WsMessage::Close(_) => return SocketEnd::Dropped,
                    // tungstenite answers pings itself
                    _ => {}
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    let _ = sink.close().await;
                    return SocketEnd::Shutdown;
                };
                let text = match serde_json::to_string(&cmd) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode command: {}", e);
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    return SocketEnd::Dropped;
                }
            }
        }
    }
}
