//! Realtime event hub.
//!
//! The hub owns the registry of live connections and fans events out to
//! them. Registry writes happen only on the control loop, which takes
//! commands from a bounded queue one at a time. Fan-out reads the registry
//! under a shared lock, so user broadcasts issued from handler tasks run in
//! parallel with each other and with the loop's own room broadcasts.
//!
//! Delivery is best-effort and at-most-once: a frame that does not fit in a
//! connection's outbound queue is dropped for that connection only.

pub mod connection;
pub mod producer;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use supportdesk_shared::EventFrame;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use connection::{
    Connection, ConnectionId, EnqueueError, Frame, OutboundReceiver, UserId,
    DEFAULT_QUEUE_CAPACITY,
};
pub use producer::Publisher;

/// Commands the control loop may have pending before callers wait.
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue size for each new connection.
    pub queue_capacity: usize,
    /// Size of the control loop's command queue.
    pub command_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub is shut down")]
    ShutDown,
    #[error("connection {0} is already closed")]
    ConnectionClosed(ConnectionId),
}

/// Point-in-time registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub users: usize,
    pub frames_dropped: u64,
}

enum HubCommand {
    Register {
        conn: Arc<Connection>,
        done: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister {
        id: ConnectionId,
        done: oneshot::Sender<bool>,
    },
    Broadcast {
        room: String,
        frame: Frame,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

#[derive(Clone, Copy)]
enum Target<'a> {
    Room(&'a str),
    User(UserId),
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Room(room) => write!(f, "room:{room}"),
            Target::User(user_id) => write!(f, "user:{user_id}"),
        }
    }
}

struct HubShared {
    registry: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    frames_dropped: AtomicU64,
    queue_capacity: usize,
    shutdown: CancellationToken,
    control_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the process-wide hub.
///
/// Created once at startup with [`Hub::start`] and cloned into every producer
/// and socket session. Stop it with [`Hub::shutdown`].
#[derive(Clone)]
pub struct Hub {
    shared: Arc<HubShared>,
    commands: mpsc::Sender<HubCommand>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("queue_capacity", &self.shared.queue_capacity)
            .field("shut_down", &self.shared.shutdown.is_cancelled())
            .finish()
    }
}

impl Hub {
    /// Spawn the control loop on the current tokio runtime.
    pub fn start(config: HubConfig) -> Self {
        let (commands, rx) = mpsc::channel(config.command_capacity.max(1));
        let shared = Arc::new(HubShared {
            registry: RwLock::new(HashMap::new()),
            frames_dropped: AtomicU64::new(0),
            queue_capacity: config.queue_capacity,
            shutdown: CancellationToken::new(),
            control_loop: Mutex::new(None),
        });

        let handle = tokio::spawn(run_control_loop(Arc::clone(&shared), rx));
        if let Ok(mut slot) = shared.control_loop.try_lock() {
            *slot = Some(handle);
        }

        info!(
            queue_capacity = config.queue_capacity,
            command_capacity = config.command_capacity,
            "realtime hub started"
        );
        Self { shared, commands }
    }

    /// Create a connection for `user_id` sized for this hub. Not yet registered.
    pub fn connection(&self, user_id: UserId) -> (Arc<Connection>, OutboundReceiver) {
        Connection::new(user_id, self.shared.queue_capacity)
    }

    /// Add a connection to the registry. Resolves once the loop applied it.
    pub async fn register(&self, conn: Arc<Connection>) -> Result<(), HubError> {
        let (done, applied) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { conn, done })
            .await
            .map_err(|_| HubError::ShutDown)?;
        applied.await.map_err(|_| HubError::ShutDown)?
    }

    /// Remove a connection and close its outbound queue.
    ///
    /// Returns true if this call removed it. Safe to call any number of times.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let (done, applied) = oneshot::channel();
        if self
            .commands
            .send(HubCommand::Unregister { id, done })
            .await
            .is_err()
        {
            return false;
        }
        applied.await.unwrap_or(false)
    }

    /// Send an event to every connection subscribed to `room`.
    ///
    /// Fire-and-forget: the caller gets no delivery signal.
    pub async fn broadcast_to_room<P>(&self, room: &str, event_type: &str, payload: &P)
    where
        P: Serialize + ?Sized,
    {
        let Some(payload) = payload_value(event_type, payload) else {
            return;
        };
        let Some(frame) = encode(&EventFrame::to_room(room, event_type, payload)) else {
            return;
        };

        let command = HubCommand::Broadcast {
            room: room.to_string(),
            frame,
        };
        if self.commands.send(command).await.is_err() {
            warn!(room, event_type, "hub is shut down, dropping broadcast");
        }
    }

    /// Send an event to every connection owned by `user_id`, whatever rooms
    /// they are in.
    pub async fn broadcast_to_user<P>(&self, user_id: UserId, event_type: &str, payload: &P)
    where
        P: Serialize + ?Sized,
    {
        if self.shared.shutdown.is_cancelled() {
            warn!(%user_id, event_type, "hub is shut down, dropping broadcast");
            return;
        }
        let Some(payload) = payload_value(event_type, payload) else {
            return;
        };
        let Some(frame) = encode(&EventFrame::to_user(event_type, payload)) else {
            return;
        };

        self.shared.dispatch(&frame, Target::User(user_id)).await;
    }

    /// Registry counters. Every command queued before this one has been
    /// applied by the time it resolves.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(HubCommand::Stats { reply })
            .await
            .map_err(|_| HubError::ShutDown)?;
        answer.await.map_err(|_| HubError::ShutDown)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stop the control loop and close every registered connection.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let handle = self.shared.control_loop.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("hub control loop panicked: {}", e);
            }
        }
    }
}

impl HubShared {
    /// Enqueue `frame` on every registered connection matching `target`.
    async fn dispatch(&self, frame: &Frame, target: Target<'_>) -> usize {
        let registry = self.registry.read().await;
        let mut delivered = 0usize;

        for conn in registry.values() {
            let matches = match target {
                Target::Room(room) => conn.is_subscribed(room).await,
                Target::User(user_id) => conn.user_id() == user_id,
            };
            if !matches {
                continue;
            }

            match conn.try_enqueue(Arc::clone(frame)) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => {
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(conn_id = %conn.id(), %target, "outbound queue full, dropping frame");
                }
                Err(EnqueueError::Closed) => {
                    debug!(conn_id = %conn.id(), %target, "connection closing, skipping frame");
                }
            }
        }

        debug!(%target, delivered, "dispatched event");
        delivered
    }

    fn stats(&self, registry: &HashMap<ConnectionId, Arc<Connection>>) -> HubStats {
        let users: HashSet<UserId> = registry.values().map(|c| c.user_id()).collect();
        HubStats {
            connections: registry.len(),
            users: users.len(),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_control_loop(shared: Arc<HubShared>, mut commands: mpsc::Receiver<HubCommand>) {
    loop {
        let command = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            HubCommand::Register { conn, done } => {
                let _ = done.send(register(&shared, conn).await);
            }
            HubCommand::Unregister { id, done } => {
                let removed = shared.registry.write().await.remove(&id);
                let removed = match removed {
                    Some(conn) => {
                        conn.close();
                        info!(conn_id = %id, user_id = %conn.user_id(), "client unregistered");
                        true
                    }
                    None => false,
                };
                let _ = done.send(removed);
            }
            HubCommand::Broadcast { room, frame } => {
                shared.dispatch(&frame, Target::Room(&room)).await;
            }
            HubCommand::Stats { reply } => {
                let registry = shared.registry.read().await;
                let _ = reply.send(shared.stats(&registry));
            }
        }
    }

    commands.close();
    let mut registry = shared.registry.write().await;
    let count = registry.len();
    for (_, conn) in registry.drain() {
        conn.close();
    }
    info!(closed = count, "realtime hub stopped");
}

async fn register(shared: &HubShared, conn: Arc<Connection>) -> Result<(), HubError> {
    // A closed connection was unregistered or evicted; its id must not come back.
    if conn.is_closed() {
        return Err(HubError::ConnectionClosed(conn.id()));
    }

    let id = conn.id();
    let user_id = conn.user_id();
    let mut registry = shared.registry.write().await;
    let previous = registry.insert(id, Arc::clone(&conn));
    if let Some(previous) = previous.filter(|p| !Arc::ptr_eq(p, &conn)) {
        warn!(conn_id = %id, "connection id registered twice, closing previous entry");
        previous.close();
    }
    info!(conn_id = %id, %user_id, "client registered");
    Ok(())
}

fn payload_value<P>(event_type: &str, payload: &P) -> Option<serde_json::Value>
where
    P: Serialize + ?Sized,
{
    match serde_json::to_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            error!(event_type, error = %e, "failed to serialize event payload");
            None
        }
    }
}

fn encode(frame: &EventFrame) -> Option<Frame> {
    match frame.encode() {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            error!(event_type = %frame.event_type, error = %e, "failed to encode event frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    async fn registered(hub: &Hub, user_id: UserId) -> (Arc<Connection>, OutboundReceiver) {
        let (conn, rx) = hub.connection(user_id);
        hub.register(Arc::clone(&conn)).await.unwrap();
        (conn, rx)
    }

    fn pending(rx: &mut OutboundReceiver) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn register_and_unregister_update_stats() {
        let hub = Hub::start(HubConfig::default());
        let user = Uuid::new_v4();
        let (a, _rx_a) = registered(&hub, user).await;
        let (_b, _rx_b) = registered(&hub, user).await;

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.users, 1);

        assert!(hub.unregister(a.id()).await);
        assert!(!hub.unregister(a.id()).await);
        assert!(a.is_closed());
        assert_eq!(hub.stats().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn room_broadcast_reaches_only_subscribers() {
        let hub = Hub::start(HubConfig::default());
        let (a, mut rx_a) = registered(&hub, Uuid::new_v4()).await;
        let (_b, mut rx_b) = registered(&hub, Uuid::new_v4()).await;
        a.subscribe("conv-42").await;

        hub.broadcast_to_room("conv-42", "message.created", &json!({"text": "hi"}))
            .await;
        hub.stats().await.unwrap();

        assert_eq!(
            pending(&mut rx_a),
            vec![json!({"type": "message.created", "payload": {"text": "hi"}, "room": "conv-42"})]
        );
        assert!(pending(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn user_broadcast_ignores_rooms() {
        let hub = Hub::start(HubConfig::default());
        let user = Uuid::new_v4();
        let (_a, mut rx_a) = registered(&hub, user).await;
        let (_b, mut rx_b) = registered(&hub, user).await;
        let (c, mut rx_c) = registered(&hub, Uuid::new_v4()).await;
        c.subscribe("notifications").await;

        hub.broadcast_to_user(user, "ping", &serde_json::Value::Null).await;

        let expected = vec![json!({"type": "ping", "payload": null})];
        assert_eq!(pending(&mut rx_a), expected);
        assert_eq!(pending(&mut rx_b), expected);
        assert!(pending(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn overflow_counts_dropped_frames() {
        let hub = Hub::start(HubConfig {
            queue_capacity: 2,
            ..HubConfig::default()
        });
        let user = Uuid::new_v4();
        let (_a, _rx_a) = registered(&hub, user).await;

        for i in 0..3 {
            hub.broadcast_to_user(user, "tick", &i).await;
        }
        assert_eq!(hub.stats().await.unwrap().frames_dropped, 1);
    }

    #[tokio::test]
    async fn closed_connection_cannot_register() {
        let hub = Hub::start(HubConfig::default());
        let (conn, _rx) = hub.connection(Uuid::new_v4());
        conn.close();

        assert!(matches!(
            hub.register(conn).await,
            Err(HubError::ConnectionClosed(_))
        ));
        assert_eq!(hub.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn registering_twice_keeps_connection_open() {
        let hub = Hub::start(HubConfig::default());
        let (conn, _rx) = registered(&hub, Uuid::new_v4()).await;

        hub.register(Arc::clone(&conn)).await.unwrap();

        assert!(!conn.is_closed());
        assert_eq!(hub.stats().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn shutdown_closes_connections_and_rejects_work() {
        let hub = Hub::start(HubConfig::default());
        let (conn, mut rx) = registered(&hub, Uuid::new_v4()).await;

        hub.shutdown().await;

        assert!(hub.is_shut_down());
        assert!(conn.is_closed());
        assert_eq!(rx.recv().await, None);

        let (late, _late_rx) = hub.connection(Uuid::new_v4());
        assert!(matches!(hub.register(late).await, Err(HubError::ShutDown)));
        assert!(matches!(hub.stats().await, Err(HubError::ShutDown)));
        assert!(!hub.unregister(conn.id()).await);

        // Still fire-and-forget after shutdown.
        hub.broadcast_to_room("conv-1", "message.created", &json!({})).await;
        hub.shutdown().await;
    }
}
