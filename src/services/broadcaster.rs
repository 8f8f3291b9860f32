use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use crate::models::{PaymentCancelled, PaymentStatusUpdate, RealtimeEvent};

// events a connection may lag behind before it is dropped
pub const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct Subscriber {
    id: u64,
    sender: mpsc::Sender<RealtimeEvent>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Default)]
pub struct RealtimeBroadcaster {
    rooms: RwLock<HashMap<String, HashMap<u64, mpsc::Sender<RealtimeEvent>>>>,
    next_id: AtomicU64,
}

impl RealtimeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    // Rooms are transaction ids. Nothing is replayed to late joiners.
    pub fn subscriber(&self) -> (Subscriber, mpsc::Receiver<RealtimeEvent>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        (Subscriber { id, sender }, receiver)
    }

    pub async fn join(&self, room: &str, subscriber: &Subscriber) {
        self.rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(subscriber.id, subscriber.sender.clone());

        tracing::debug!(room = room, subscriber = subscriber.id, "Joined room");
    }

    pub async fn leave(&self, room: &str, subscriber: &Subscriber) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&subscriber.id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    pub async fn leave_all(&self, subscriber: &Subscriber) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&subscriber.id);
            !members.is_empty()
        });
    }

    pub async fn publish_cancellation(&self, event: PaymentCancelled) -> usize {
        self.publish(RealtimeEvent::Cancelled(event)).await
    }

    pub async fn publish_status(&self, event: PaymentStatusUpdate) -> usize {
        self.publish(RealtimeEvent::StatusUpdate(event)).await
    }

    pub async fn publish(&self, event: RealtimeEvent) -> usize {
        let room = event.room().to_string();
        let mut rooms = self.rooms.write().await;

        let Some(members) = rooms.get_mut(&room) else {
            tracing::debug!(room = %room, "No subscribers for event");
            return 0;
        };

        let mut delivered = 0;
        members.retain(|id, sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(room = %room, subscriber = *id, "Subscriber too slow, dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });

        if members.is_empty() {
            rooms.remove(&room);
        }

        tracing::debug!(room = %room, delivered, "Realtime event published");
        delivered
    }

    pub async fn subscriber_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}
