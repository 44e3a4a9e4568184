//! Room-scoped fan-out for the relay server.
//!
//! Each session id owns one [`PeerRoom`]: a tokio broadcast channel carrying
//! pre-encoded frames to every connected peer. Frames carry the sender id so
//! receivers can skip their own messages without re-decoding the JSON.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::protocol::ParticipantInfo;

/// A pre-encoded frame traveling through a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    /// Envelope `userId` of the originating peer.
    pub sender: String,
    /// The raw JSON text, forwarded verbatim.
    pub json: String,
}

/// Snapshot of a room's traffic counters.
#[derive(Debug, Clone, Default)]
pub struct RoomStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// Fan-out group for one session.
///
/// All peers in the session share one broadcast channel; a message from any
/// peer reaches every subscriber, and the sender filters itself out on the
/// receive side. Stats are atomics so the hot path never takes a lock.
pub struct PeerRoom {
    sender: broadcast::Sender<Arc<RelayFrame>>,
    peers: RwLock<HashMap<String, ParticipantInfo>>,
    capacity: usize,
    messages_sent: AtomicU64,
}

impl PeerRoom {
    /// Create a room buffering up to `capacity` frames per lagging receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Register a peer and return its receiver.
    pub async fn add_peer(&self, info: ParticipantInfo) -> broadcast::Receiver<Arc<RelayFrame>> {
        let mut peers = self.peers.write().await;
        peers.insert(info.user_id.clone(), info);
        self.sender.subscribe()
    }

    /// Remove a peer by id.
    pub async fn remove_peer(&self, user_id: &str) -> Option<ParticipantInfo> {
        self.peers.write().await.remove(user_id)
    }

    /// Fan a frame out to every subscriber (sender included; receivers skip
    /// their own frames). Returns the number of receivers reached.
    pub fn broadcast(&self, frame: RelayFrame) -> usize {
        let count = self.sender.send(Arc::new(frame)).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Subscribe without registering a peer (monitoring, tests).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RelayFrame>> {
        self.sender.subscribe()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<ParticipantInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn has_peer(&self, user_id: &str) -> bool {
        self.peers.read().await.contains_key(user_id)
    }

    pub async fn stats(&self) -> RoomStats {
        RoomStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Directory of rooms, keyed by session id.
pub struct RoomDirectory {
    rooms: RwLock<HashMap<String, Arc<PeerRoom>>>,
    default_capacity: usize,
}

impl RoomDirectory {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the room for a session.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<PeerRoom> {
        // Fast path: read lock.
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(session_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring the write lock.
        if let Some(room) = rooms.get(session_id) {
            return room.clone();
        }
        let room = Arc::new(PeerRoom::new(self.default_capacity));
        rooms.insert(session_id.to_owned(), room.clone());
        room
    }

    /// Remove the room if it has no peers left.
    pub async fn remove_if_empty(&self, session_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(session_id) {
            if room.peer_count().await == 0 {
                rooms.remove(session_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_sessions(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
