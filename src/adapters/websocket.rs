//! Duplex WebSocket relay between a gateway client and a backend service.
//!
//! A session owns the upgraded client socket and one backend connection. Two
//! pump tasks forward frames in each direction and share one
//! `CancellationToken`; whichever pump finishes first cancels the other, and the
//! session waits for both before dropping the connections.
use std::{fmt::Display, sync::Arc, time::Duration};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        protocol::{CloseFrame as BackendCloseFrame, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::{circuit_breaker::CircuitBreaker, registry::ServiceDescriptor};

type BackendMessage = tungstenite::Message;

/// Backend WebSocket url: the service host with `ws`/`wss` scheme, plus the
/// inbound path and query.
pub fn backend_ws_url(
    service: &ServiceDescriptor,
    path: &str,
    query: Option<&str>,
) -> Result<Url, String> {
    let mut url = service.base_url.clone();
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| format!("cannot use scheme '{scheme}' for {}", service.base_url))?;
    url.set_path(path);
    url.set_query(query);
    Ok(url)
}

/// Message types the relay can carry across to the other side.
trait RelayMessage: Send + Sized + 'static {
    type Peer: Send + 'static;

    fn is_close(&self) -> bool;

    /// Same frame expressed in the other side's type. Raw frames map to `None`.
    fn into_peer(self) -> Option<Self::Peer>;

    /// A normal-closure frame for the other side.
    fn peer_normal_close() -> Self::Peer;
}

impl RelayMessage for Message {
    type Peer = BackendMessage;

    fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    fn into_peer(self) -> Option<BackendMessage> {
        Some(match self {
            Message::Text(text) => BackendMessage::Text(text.as_str().into()),
            Message::Binary(data) => BackendMessage::Binary(data),
            Message::Ping(data) => BackendMessage::Ping(data),
            Message::Pong(data) => BackendMessage::Pong(data),
            Message::Close(frame) => BackendMessage::Close(frame.map(|f| BackendCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.as_str().into(),
            })),
        })
    }

    fn peer_normal_close() -> BackendMessage {
        BackendMessage::Close(Some(BackendCloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }))
    }
}

impl RelayMessage for BackendMessage {
    type Peer = Message;

    fn is_close(&self) -> bool {
        matches!(self, BackendMessage::Close(_))
    }

    fn into_peer(self) -> Option<Message> {
        match self {
            BackendMessage::Text(text) => Some(Message::Text(text.as_str().into())),
            BackendMessage::Binary(data) => Some(Message::Binary(data)),
            BackendMessage::Ping(data) => Some(Message::Ping(data)),
            BackendMessage::Pong(data) => Some(Message::Pong(data)),
            BackendMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
                code: u16::from(f.code),
                reason: f.reason.as_str().into(),
            }))),
            BackendMessage::Frame(_) => None,
        }
    }

    fn peer_normal_close() -> Message {
        Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        }))
    }
}

/// Forward frames from `source` into `sink` until either side ends or `done` fires.
async fn pump<M, S, E, K>(
    mut source: S,
    mut sink: K,
    done: CancellationToken,
    direction: &'static str,
) where
    M: RelayMessage,
    S: Stream<Item = Result<M, E>> + Unpin,
    E: Display + Send,
    K: Sink<M::Peer> + Unpin,
    K::Error: Display + Send,
{
    loop {
        let next = tokio::select! {
            _ = done.cancelled() => return,
            next = source.next() => next,
        };

        match next {
            Some(Ok(message)) => {
                let closing = message.is_close();
                if let Some(out) = message.into_peer() {
                    if let Err(e) = sink.send(out).await {
                        tracing::debug!(direction, error = %e, "Relay write failed");
                        break;
                    }
                }
                if closing {
                    tracing::debug!(direction, "Close frame relayed");
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::debug!(direction, error = %e, "Relay read failed");
                let _ = sink.send(M::peer_normal_close()).await;
                break;
            }
            None => {
                let _ = sink.send(M::peer_normal_close()).await;
                break;
            }
        }
    }
    done.cancel();
}

/// Run one relay session on an upgraded client socket.
///
/// Dial failures are reported to the client with a 1011 close frame and counted
/// against the service's circuit breaker.
pub async fn relay(
    mut client: WebSocket,
    backend_url: Url,
    dial_timeout: Duration,
    breaker: Arc<CircuitBreaker>,
    service: String,
) {
    let dial = tokio::time::timeout(dial_timeout, connect_async(backend_url.as_str())).await;
    let backend = match dial {
        Ok(Ok((stream, _response))) => {
            breaker.record_success();
            stream
        }
        Ok(Err(e)) => {
            breaker.record_failure();
            tracing::error!(service = %service, target = %backend_url, error = %e, "Failed to connect to backend WebSocket");
            send_dial_failure(&mut client).await;
            return;
        }
        Err(_) => {
            breaker.record_failure();
            tracing::error!(service = %service, target = %backend_url, "Backend WebSocket dial timed out");
            send_dial_failure(&mut client).await;
            return;
        }
    };

    tracing::info!(service = %service, target = %backend_url, "WebSocket relay established");

    let (client_tx, client_rx) = client.split();
    let (backend_tx, backend_rx) = backend.split();
    splice(client_rx, client_tx, backend_rx, backend_tx, &service).await;
    tracing::info!(service = %service, "WebSocket relay closed");
}

/// Run both pumps until either direction ends; returns once both have stopped.
async fn splice<CR, CW, BR, BW, CE, BE>(
    client_rx: CR,
    client_tx: CW,
    backend_rx: BR,
    backend_tx: BW,
    service: &str,
) where
    CR: Stream<Item = Result<Message, CE>> + Unpin + Send + 'static,
    CE: Display + Send + 'static,
    CW: Sink<Message> + Unpin + Send + 'static,
    CW::Error: Display + Send,
    BR: Stream<Item = Result<BackendMessage, BE>> + Unpin + Send + 'static,
    BE: Display + Send + 'static,
    BW: Sink<BackendMessage> + Unpin + Send + 'static,
    BW::Error: Display + Send,
{
    let done = CancellationToken::new();

    let upstream = tokio::spawn(pump(client_rx, backend_tx, done.clone(), "client->backend"));
    let downstream = tokio::spawn(pump(backend_rx, client_tx, done.clone(), "backend->client"));

    let (up, down) = tokio::join!(upstream, downstream);
    if let Err(e) = up.and(down) {
        tracing::warn!(service = %service, error = %e, "WebSocket pump task failed");
    }
}

async fn send_dial_failure(client: &mut WebSocket) {
    let frame = Message::Close(Some(CloseFrame {
        code: close_code::ERROR,
        reason: "Cannot connect to service".into(),
    }));
    let _ = client.send(frame).await;
}
