use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::ConnectError;
use crate::bus::{Envelope, InboxReceiver, inbox};
use crate::call::CallSession;
use crate::chat::ChatSession;
use crate::dispatcher::Dispatcher;
use crate::identity::Identity;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// A joined socket's behaviour, driven by [`run_session`].
pub trait Session: Send + Sync + 'static {
    type Outbound: Serialize + Send;

    /// Handle one inbound text frame. Frames from one socket are never
    /// handled concurrently.
    fn handle_text(&self, text: &str) -> impl Future<Output = ()> + Send;

    /// Decide whether a group event reaches this socket, and in what shape.
    fn render(&self, envelope: &Envelope) -> Option<Self::Outbound>;

    /// Disconnect cleanup. Must be idempotent.
    fn leave(&self) -> impl Future<Output = ()> + Send;

    fn label(&self) -> String;
}

/// `/ws/chat/{room_name}/`
pub async fn serve_chat(socket: WebSocket, dispatcher: Dispatcher, identity: Identity, room_name: String) {
    let conn_id = Dispatcher::new_connection_id();
    let (inbox_tx, inbox_rx) = inbox();

    match ChatSession::join(dispatcher, identity, &room_name, conn_id, inbox_tx).await {
        Ok((session, snapshot)) => {
            run_session(socket, Arc::new(session), inbox_rx, vec![snapshot]).await;
        }
        Err(e) => refuse(socket, &e).await,
    }
}

/// `/ws/call/{room_id}/`
pub async fn serve_call(socket: WebSocket, dispatcher: Dispatcher, identity: Identity, room_id: String) {
    let conn_id = Dispatcher::new_connection_id();
    let (inbox_tx, inbox_rx) = inbox();

    match CallSession::join(dispatcher, identity, &room_id, conn_id, inbox_tx).await {
        Ok(session) => run_session(socket, Arc::new(session), inbox_rx, Vec::new()).await,
        Err(e) => refuse(socket, &e).await,
    }
}

/// Close a socket that failed to join, with a code and reason the client
/// can tell apart.
async fn refuse(mut socket: WebSocket, err: &ConnectError) {
    warn!("Refusing socket: {}", err);
    let frame = CloseFrame {
        code: err.close_code(),
        reason: err.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

fn encode<T: Serialize>(event: &T) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            error!("Failed to serialize outbound event: {}", e);
            None
        }
    }
}

/// Pump a joined socket until either side goes away, then run the
/// session's disconnect logic.
pub async fn run_session<S: Session>(
    socket: WebSocket,
    session: Arc<S>,
    mut inbox_rx: InboxReceiver,
    greeting: Vec<S::Outbound>,
) {
    let (mut sender, mut receiver) = socket.split();
    let label = session.label();
    info!("{} connected", label);

    for event in &greeting {
        let Some(msg) = encode(event) else { continue };
        if sender.send(msg).await.is_err() {
            session.leave().await;
            return;
        }
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward group events -> client, with heartbeat
    let send_session = session.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                envelope = inbox_rx.recv() => {
                    let Some(envelope) = envelope else { break };
                    let Some(event) = send_session.render(&envelope) else { continue };
                    let Some(msg) = encode(&event) else { continue };
                    if sender.send(msg).await.is_err() {
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

    // Read frames from client, one at a time
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => recv_session.handle_text(text.as_str()).await,
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    session.leave().await;
    info!("{} disconnected", label);
}
