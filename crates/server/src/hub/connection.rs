//! One live socket session: its outbound queue and the rooms it listens to.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type UserId = Uuid;

/// A serialized event, shared by every connection that receives it.
pub type Frame = Arc<str>;

/// Frames a connection may have pending before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

/// Server-side state for one socket session.
///
/// Shared between the hub registry and the session's reader task. The room
/// set has its own lock so that broadcasts to unrelated connections never
/// contend on it.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    connected_at: DateTime<Utc>,
    rooms: RwLock<HashSet<String>>,
    outbound: mpsc::Sender<Frame>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection for `user_id` with a fresh id.
    ///
    /// The returned receiver belongs to the session's writer.
    pub fn new(user_id: UserId, queue_capacity: usize) -> (Arc<Self>, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let cancel = CancellationToken::new();

        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id,
            connected_at: Utc::now(),
            rooms: RwLock::new(HashSet::new()),
            outbound: tx,
            closed: AtomicBool::new(false),
            cancel: cancel.clone(),
        });

        (conn, OutboundReceiver { rx, cancel })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Token cancelled when the connection is closed.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Add `room` to the room set. Returns false if it was already there.
    pub async fn subscribe(&self, room: &str) -> bool {
        self.rooms.write().await.insert(room.to_string())
    }

    /// Remove `room` from the room set. Returns false if it was not there.
    pub async fn unsubscribe(&self, room: &str) -> bool {
        self.rooms.write().await.remove(room)
    }

    pub async fn is_subscribed(&self, room: &str) -> bool {
        self.rooms.read().await.contains(room)
    }

    /// Snapshot of the current room set.
    pub async fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.read().await.iter().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Queue a frame without waiting.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue and cancel the session.
    ///
    /// Returns true for the one call that performed the close.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Receiving half of a connection's outbound queue.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
}

impl OutboundReceiver {
    /// Next frame in FIFO order.
    ///
    /// Once the connection is closed, frames that were already queued are
    /// still handed out, then `None`.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            frame = self.rx.recv() => frame,
            _ = self.cancel.cancelled() => {
                self.rx.close();
                self.rx.recv().await
            }
        }
    }

    /// Next already-queued frame, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}
