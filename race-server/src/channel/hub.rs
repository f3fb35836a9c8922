use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use race_core::sync::RaceEvent;
use race_types::{BroadcastPayload, PresenceEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct Subscriber {
    user_id: Uuid,
    username: String,
    sender: mpsc::UnboundedSender<RaceEvent>,
}

/// The single shared race channel for the deployment. Tracks presence keyed
/// by user id and fans typing broadcasts out to every subscriber except the
/// sender.
pub struct ChannelHub {
    subscribers: RwLock<HashMap<SessionId, Subscriber>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a session. The joiner receives a full presence sync; every
    /// other subscriber sees a join for this user.
    pub async fn join(
        &self,
        session_id: SessionId,
        user_id: Uuid,
        username: String,
        sender: mpsc::UnboundedSender<RaceEvent>,
    ) {
        let mut subscribers = self.subscribers.write().await;
        let at = Utc::now().to_rfc3339();
        let entry = PresenceEntry {
            user_id,
            username: username.clone(),
        };

        for other in subscribers.values() {
            let _ = other.sender.send(RaceEvent::PresenceJoin {
                entry: entry.clone(),
                at: at.clone(),
            });
        }

        subscribers.insert(
            session_id,
            Subscriber {
                user_id,
                username,
                sender: sender.clone(),
            },
        );

        let online = online_entries(&subscribers);
        let _ = sender.send(RaceEvent::PresenceSync { online, at });
    }

    /// Unsubscribe. Remaining subscribers see a leave only when the user's
    /// last session is gone; presence is keyed by user, not connection.
    pub async fn leave(&self, session_id: SessionId) {
        let mut subscribers = self.subscribers.write().await;
        let Some(removed) = subscribers.remove(&session_id) else {
            return;
        };

        if subscribers.values().any(|s| s.user_id == removed.user_id) {
            return;
        }

        for other in subscribers.values() {
            let _ = other.sender.send(RaceEvent::PresenceLeave {
                user_id: removed.user_id,
            });
        }
    }

    /// Fan a typing update out to everyone except the sender. The sender's
    /// own view never sees its broadcasts come back; its session injects the
    /// local row into roster snapshots instead.
    pub async fn broadcast_typing(&self, from: SessionId, payload: BroadcastPayload) {
        let subscribers = self.subscribers.read().await;
        for (id, subscriber) in subscribers.iter() {
            if *id != from {
                let _ = subscriber.sender.send(RaceEvent::Broadcast {
                    payload: payload.clone(),
                });
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

fn online_entries(subscribers: &HashMap<SessionId, Subscriber>) -> Vec<PresenceEntry> {
    let mut seen = HashSet::new();
    subscribers
        .values()
        .filter(|s| seen.insert(s.user_id))
        .map(|s| PresenceEntry {
            user_id: s.user_id,
            username: s.username.clone(),
        })
        .collect()
}
