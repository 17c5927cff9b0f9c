//! WebSocket Relay
//!
//! Relay client over a WebSocket signaling server. One connection per
//! registered code; frames are JSON objects tagged by `type`.
//!
//! ```text
//! host  → relay: {"type":"register","code":"K7M2QX","tier":"standard"}
//! relay → host:  {"type":"registered"} | {"type":"rejected","reason":"code_in_use"}
//! relay → host:  {"type":"peer","connected":true}
//! relay → host:  {"type":"command","action":"show_overlay","payload":{...}}
//! host  → relay: {"type":"publish","message":{...}}
//! host  → relay: {"type":"unregister","code":"K7M2QX"}
//! ```
//!
//! A dropped connection is retried with exponential backoff and the same code
//! is registered again; the peer sees a detach in between. When retries run
//! out the event stream closes and the session layer ends the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use companion_core::{CapabilityTier, InboundCommand, OutboundMessage, RelayRegistration};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{RelayChannel, RelayEvent, RelaySubscription};
use crate::services::remote::types::{ReconnectConfig, RemoteError, SessionCode};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_BUFFER: usize = 256;

/// Frames sent by the host.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostFrame<'a> {
    Register { code: &'a str, tier: CapabilityTier },
    Unregister { code: &'a str },
    Publish { message: &'a OutboundMessage },
}

/// Frames sent by the relay.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RelayFrame {
    Registered,
    Rejected {
        #[serde(default)]
        reason: String,
    },
    Peer {
        connected: bool,
    },
    Command {
        action: String,
        #[serde(default)]
        payload: Value,
    },
}

struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

/// Relay client over WebSocket.
pub struct WebSocketRelay {
    url: String,
    reconnect: ReconnectConfig,
    connections: Arc<Mutex<HashMap<SessionCode, Connection>>>,
}

impl WebSocketRelay {
    pub fn new(url: impl Into<String>, reconnect: ReconnectConfig) -> Self {
        Self {
            url: url.into(),
            reconnect,
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn outbound_for(&self, code: &SessionCode) -> Option<mpsc::UnboundedSender<String>> {
        self.connections
            .lock()
            .ok()
            .and_then(|map| map.get(code).map(|c| c.outbound.clone()))
    }
}

fn encode(frame: &HostFrame<'_>) -> Result<String, RemoteError> {
    serde_json::to_string(frame).map_err(|e| RemoteError::PublishFailed(e.to_string()))
}

/// Connect and register `code`, waiting for the relay's verdict.
async fn connect_and_register(
    url: &str,
    code: &SessionCode,
    tier: CapabilityTier,
) -> Result<WsStream, RemoteError> {
    let (mut ws, _) = connect_async(url)
        .await
        .map_err(|e| RemoteError::RelayUnavailable(format!("connect {}: {}", url, e)))?;

    let register = encode(&HostFrame::Register {
        code: code.as_str(),
        tier,
    })?;
    ws.send(Message::Text(register))
        .await
        .map_err(|e| RemoteError::RelayUnavailable(e.to_string()))?;

    let verdict = tokio::time::timeout(REGISTER_TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(RelayFrame::Registered) => return Ok(()),
                    Ok(RelayFrame::Rejected { reason }) if reason == "code_in_use" => {
                        return Err(RemoteError::CodeCollision)
                    }
                    Ok(RelayFrame::Rejected { reason }) => {
                        return Err(RemoteError::RelayUnavailable(format!(
                            "registration rejected: {}",
                            reason
                        )))
                    }
                    _ => continue,
                },
                Ok(Message::Close(_)) | Err(_) => break,
                _ => continue,
            }
        }
        Err(RemoteError::RelayUnavailable(
            "connection closed during registration".to_string(),
        ))
    })
    .await;

    match verdict {
        Ok(Ok(())) => Ok(ws),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(RemoteError::RelayUnavailable(
            "timed out waiting for registration".to_string(),
        )),
    }
}

enum PumpExit {
    Cancelled,
    Disconnected,
}

/// Shuttle frames both ways until the socket drops or the token fires.
async fn pump(
    ws: WsStream,
    code: &SessionCode,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::Sender<RelayEvent>,
    cancel: &CancellationToken,
) -> PumpExit {
    let (mut sink, mut stream) = ws.split();

    loop {
        // Queued publishes are flushed before a cancellation is honoured
        tokio::select! {
            biased;
            Some(frame) = outbound.recv() => {
                if sink.send(Message::Text(frame)).await.is_err() {
                    return PumpExit::Disconnected;
                }
            }
            _ = cancel.cancelled() => {
                if let Ok(frame) = encode(&HostFrame::Unregister { code: code.as_str() }) {
                    let _ = sink.send(Message::Text(frame)).await;
                }
                let _ = sink.close().await;
                return PumpExit::Cancelled;
            }
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        return PumpExit::Disconnected;
                    }
                    Some(Ok(_)) => continue,
                };
                let event = match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(RelayFrame::Peer { connected }) => RelayEvent::PeerConnection { connected },
                    Ok(RelayFrame::Command { action, payload }) => {
                        RelayEvent::Command(InboundCommand { action, payload })
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(code = %code, error = %e, "Malformed relay frame dropped");
                        continue;
                    }
                };
                if events.send(event).await.is_err() {
                    return PumpExit::Cancelled;
                }
            }
        }
    }
}

/// Owns one code's connection for its whole registration.
struct ConnectionTask {
    url: String,
    code: SessionCode,
    tier: CapabilityTier,
    reconnect: ReconnectConfig,
    connections: Arc<Mutex<HashMap<SessionCode, Connection>>>,
}

impl ConnectionTask {
    async fn run(
        self,
        first: WsStream,
        outbound: mpsc::UnboundedReceiver<String>,
        events: mpsc::Sender<RelayEvent>,
        cancel: CancellationToken,
    ) {
        self.serve(first, outbound, &events, &cancel).await;
        if let Ok(mut map) = self.connections.lock() {
            map.remove(&self.code);
        }
        // Dropping `events` closes the subscription
    }

    async fn serve(
        &self,
        first: WsStream,
        mut outbound: mpsc::UnboundedReceiver<String>,
        events: &mpsc::Sender<RelayEvent>,
        cancel: &CancellationToken,
    ) {
        let Self {
            url,
            code,
            tier,
            reconnect,
            ..
        } = self;
        let mut ws = Some(first);

        'session: loop {
            if let Some(stream) = ws.take() {
                match pump(stream, code, &mut outbound, events, cancel).await {
                    PumpExit::Cancelled => break 'session,
                    PumpExit::Disconnected => {
                        tracing::warn!(code = %code, "Relay connection lost, reconnecting");
                        // The peer cannot reach us until we re-register
                        let _ = events
                            .send(RelayEvent::PeerConnection { connected: false })
                            .await;
                    }
                }
            }

            let mut attempt = 0;
            while ws.is_none() {
                if attempt >= reconnect.max_attempts {
                    tracing::error!(
                        code = %code,
                        attempts = attempt,
                        "Relay reconnect attempts exhausted"
                    );
                    break 'session;
                }
                let delay = Duration::from_millis(reconnect.delay_for_attempt(attempt));
                tokio::select! {
                    _ = cancel.cancelled() => break 'session,
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;

                match connect_and_register(url, code, *tier).await {
                    Ok(stream) => {
                        tracing::info!(code = %code, attempt, "Relay connection restored");
                        ws = Some(stream);
                    }
                    Err(e) => {
                        tracing::warn!(code = %code, attempt, error = %e, "Relay reconnect failed");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RelayChannel for WebSocketRelay {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn register(
        &self,
        registration: RelayRegistration,
    ) -> Result<RelaySubscription, RemoteError> {
        let code = SessionCode::parse(&registration.code)?;
        let ws = connect_and_register(&self.url, &code, registration.tier).await?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        if let Ok(mut map) = self.connections.lock() {
            map.insert(
                code.clone(),
                Connection {
                    outbound: out_tx,
                    cancel: cancel.clone(),
                },
            );
        }

        let task = ConnectionTask {
            url: self.url.clone(),
            code,
            tier: registration.tier,
            reconnect: self.reconnect.clone(),
            connections: self.connections.clone(),
        };
        tokio::spawn(task.run(ws, out_rx, event_tx, cancel));

        Ok(RelaySubscription { events: event_rx })
    }

    async fn unregister(&self, code: &SessionCode) -> Result<(), RemoteError> {
        let removed = self
            .connections
            .lock()
            .ok()
            .and_then(|mut map| map.remove(code));
        if let Some(connection) = removed {
            connection.cancel.cancel();
        }
        Ok(())
    }

    async fn publish(
        &self,
        code: &SessionCode,
        message: OutboundMessage,
    ) -> Result<(), RemoteError> {
        let frame = encode(&HostFrame::Publish { message: &message })?;
        let outbound = self
            .outbound_for(code)
            .ok_or_else(|| RemoteError::PublishFailed(format!("code {} is not registered", code)))?;
        outbound
            .send(frame)
            .map_err(|_| RemoteError::PublishFailed("relay connection closed".to_string()))
    }
}
