//! WebSocket handler for realtime conversation events.
//!
//! Each socket runs a reader and a writer side by side. The reader applies
//! subscribe/unsubscribe frames. The writer drains the outbound queue onto
//! the socket and stops once the queue is closed. Whichever side stops first
//! ends the session, and the connection is unregistered on the way out.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use supportdesk_shared::ControlFrame;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::config::SessionSettings;
use crate::hub::{Connection, Hub, OutboundReceiver};
use crate::state::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::info!("WebSocket connection authenticated for user: {}", user.user_id);

    let hub = state.hub.clone();
    let settings = state.config.session;
    ws.on_failed_upgrade(move |e| {
        tracing::warn!("WebSocket upgrade failed for user {}: {}", user.user_id, e);
    })
    .on_upgrade(move |socket| handle_socket(socket, user.user_id, hub, settings))
}

/// Run an upgraded socket until it closes.
async fn handle_socket(socket: WebSocket, user_id: Uuid, hub: Hub, settings: SessionSettings) {
    let (conn, outbound) = hub.connection(user_id);
    if let Err(e) = hub.register(Arc::clone(&conn)).await {
        tracing::error!("Failed to register connection for user {}: {}", user_id, e);
        return;
    }

    let (sender, receiver) = socket.split();
    run_session(Arc::clone(&conn), &hub, receiver, sender, outbound, settings).await;

    let rooms = conn.rooms().await;
    tracing::info!(
        conn_id = %conn.id(),
        %user_id,
        ?rooms,
        connected_secs = (chrono::Utc::now() - conn.connected_at()).num_seconds(),
        "WebSocket connection closed"
    );
}

/// Drive both halves of a registered connection until the session ends.
///
/// A closed or failed read ends the reader, which unregisters and so closes
/// the queue the writer drains. A failed write ends the writer first; the
/// reader is then dropped and the connection unregistered here.
pub async fn run_session<S, E, W>(
    conn: Arc<Connection>,
    hub: &Hub,
    receiver: S,
    sender: W,
    outbound: OutboundReceiver,
    settings: SessionSettings,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let reader = run_reader(Arc::clone(&conn), hub, receiver, settings.idle_timeout);
    let writer = run_writer(outbound, sender, settings.ping_interval);
    tokio::pin!(reader, writer);

    tokio::select! {
        _ = &mut reader => writer.await,
        _ = &mut writer => {
            tracing::debug!(conn_id = %conn.id(), "writer stopped, ending session");
            hub.unregister(conn.id()).await;
        }
    }
}

enum Inbound {
    Frame(Message),
    Failed(String),
    Ended,
    Idle,
}

async fn read_frame<S, E>(receiver: &mut S, idle_timeout: Option<Duration>) -> Inbound
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, receiver.next()).await {
            Ok(next) => next,
            Err(_) => return Inbound::Idle,
        },
        None => receiver.next().await,
    };

    match next {
        Some(Ok(message)) => Inbound::Frame(message),
        Some(Err(e)) => Inbound::Failed(e.to_string()),
        None => Inbound::Ended,
    }
}

/// Read control frames until the socket closes, fails, goes idle, or the
/// connection is closed by the hub. Always unregisters on the way out.
pub async fn run_reader<S, E>(
    conn: Arc<Connection>,
    hub: &Hub,
    mut receiver: S,
    idle_timeout: Option<Duration>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let cancelled = conn.cancellation();

    loop {
        let inbound = tokio::select! {
            _ = cancelled.cancelled() => {
                tracing::debug!(conn_id = %conn.id(), "connection closed by hub");
                break;
            }
            inbound = read_frame(&mut receiver, idle_timeout) => inbound,
        };

        match inbound {
            Inbound::Frame(Message::Text(text)) => apply_control(&conn, text.as_str()).await,
            Inbound::Frame(Message::Close(_)) => break,
            // Binary, ping and pong frames only count as activity.
            Inbound::Frame(_) => {}
            Inbound::Failed(e) => {
                tracing::warn!(conn_id = %conn.id(), "WebSocket read error: {}", e);
                break;
            }
            Inbound::Ended => break,
            Inbound::Idle => {
                tracing::warn!(conn_id = %conn.id(), "WebSocket idle timeout, dropping connection");
                break;
            }
        }
    }

    hub.unregister(conn.id()).await;
}

async fn apply_control(conn: &Connection, text: &str) {
    match ControlFrame::decode(text) {
        Ok(ControlFrame::Subscribe(room)) => {
            conn.subscribe(&room).await;
            tracing::debug!("Client {} subscribed to room: {}", conn.id(), room);
        }
        Ok(ControlFrame::Unsubscribe(room)) => {
            conn.unsubscribe(&room).await;
            tracing::debug!("Client {} unsubscribed from room: {}", conn.id(), room);
        }
        Ok(ControlFrame::Unknown(kind)) => {
            tracing::warn!("Unknown message type from client {}: {}", conn.id(), kind);
        }
        Err(e) => {
            tracing::warn!("Ignoring frame from client {}: {}", conn.id(), e);
        }
    }
}

/// Write queued frames to the socket until the queue is closed or a write
/// fails. Sends a ping every `ping_interval` when set.
pub async fn run_writer<W>(
    mut outbound: OutboundReceiver,
    mut sender: W,
    ping_interval: Option<Duration>,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ping = ping_interval.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(String::from(&*frame).into()),
                None => break,
            },
            _ = next_ping(&mut ping) => Message::Ping(Bytes::new()),
        };

        if let Err(e) = sender.send(message).await {
            tracing::warn!("Error writing message: {}", e);
            break;
        }
    }

    let _ = sender.close().await;
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
