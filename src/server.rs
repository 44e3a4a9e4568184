//! WebSocket relay server with session-based routing.
//!
//! The relay holds no document state and runs no merge logic: every
//! well-formed frame is fanned out verbatim to the other peers in the room
//! named by its `sessionId`. The one piece of protocol the relay speaks
//! itself is departure — when a socket drops, it synthesizes a
//! `presence: leave` for the peer so remote rosters converge even on
//! ungraceful disconnects.
//!
//! ```text
//! Client A ──┐
//!            ├── PeerRoom (sessionId) ── fan-out ──► other peers
//! Client B ──┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{PeerRoom, RelayFrame, RoomDirectory};
use crate::config::RelayConfig;
use crate::protocol::{ParticipantInfo, PresenceEvent, WireMessage};

/// Relay-wide counters.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_sessions: usize,
}

/// Which peer a connection is registered as, learned from its first
/// well-formed frame.
struct Registration {
    user_id: String,
    user_name: Option<String>,
    session_id: String,
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<RoomDirectory>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let rooms = Arc::new(RoomDirectory::new(config.broadcast_capacity));
        Self {
            config,
            rooms,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Accept connections forever. Call from an async runtime.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Current counters.
    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn rooms(&self) -> &Arc<RoomDirectory> {
        &self.rooms
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: Arc<RoomDirectory>,
    stats: Arc<RwLock<RelayStats>>,
    config: RelayConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Correlates all log lines for this socket.
    let conn_id = Uuid::new_v4();
    log::info!("WebSocket connection {conn_id} established from {addr}");

    {
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let mut registration: Option<Registration> = None;
    let mut room: Option<Arc<PeerRoom>> = None;
    let mut room_rx: Option<tokio::sync::broadcast::Receiver<Arc<RelayFrame>>> = None;

    loop {
        tokio::select! {
            // Inbound frame from this peer.
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let raw = text.as_str();
                        {
                            let mut s = stats.write().await;
                            s.total_messages += 1;
                            s.total_bytes += raw.len() as u64;
                        }

                        let frame = match WireMessage::decode(raw) {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::warn!("Connection {conn_id}: dropping malformed frame: {e}");
                                continue;
                            }
                        };

                        // First well-formed frame registers the peer into
                        // the room its envelope names.
                        if registration.is_none() {
                            let target = rooms.get_or_create(frame.session_id()).await;
                            if target.peer_count().await >= config.max_peers_per_session {
                                log::warn!(
                                    "Connection {conn_id}: session {} full, refusing",
                                    frame.session_id()
                                );
                                let _ = ws_sender.send(Message::Close(None)).await;
                                break;
                            }

                            let info = participant_from(&frame);
                            let user_name = named(&info);
                            log::info!(
                                "Connection {conn_id}: {} joined session {}",
                                info.user_id,
                                frame.session_id()
                            );
                            room_rx = Some(target.add_peer(info).await);
                            registration = Some(Registration {
                                user_id: frame.user_id().to_owned(),
                                user_name,
                                session_id: frame.session_id().to_owned(),
                            });
                            {
                                let mut s = stats.write().await;
                                s.active_sessions = rooms.room_count().await;
                            }
                            room = Some(target);
                        } else if let WireMessage::Presence {
                            data: PresenceEvent::Join { user_name, .. },
                            ..
                        } = &frame
                        {
                            // A join after registration (peer reconnected
                            // through the same socket) refreshes the name
                            // used for synthesized leaves.
                            if let Some(reg) = registration.as_mut() {
                                if !user_name.is_empty() {
                                    reg.user_name = Some(user_name.clone());
                                }
                            }
                        }

                        if let Some(target) = room.as_ref() {
                            target.broadcast(RelayFrame {
                                sender: frame.user_id().to_owned(),
                                json: raw.to_owned(),
                            });
                        }
                    }

                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }

                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection {conn_id} closed");
                        break;
                    }

                    Some(Err(e)) => {
                        log::warn!("Connection {conn_id}: WebSocket error: {e}");
                        break;
                    }

                    _ => {}
                }
            }

            // Outbound frame fanned out from the room.
            frame = async {
                match room_rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    // Not registered yet — nothing to forward.
                    None => std::future::pending().await,
                }
            } => {
                match frame {
                    Ok(frame) => {
                        // Never echo a peer's own frames back.
                        let own = registration
                            .as_ref()
                            .is_some_and(|reg| reg.user_id == frame.sender);
                        if own {
                            continue;
                        }
                        ws_sender
                            .send(Message::Text(frame.json.clone().into()))
                            .await?;
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Connection {conn_id} lagged by {n} frames");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    // Cleanup: deregister and tell the room the peer is gone. A duplicate
    // leave after a graceful one is a no-op on every roster.
    if let (Some(reg), Some(target)) = (registration, room) {
        target.remove_peer(&reg.user_id).await;

        let leave = WireMessage::leave(&reg.user_id, reg.user_name.as_deref(), &reg.session_id);
        if let Ok(encoded) = leave.encode() {
            target.broadcast(RelayFrame {
                sender: reg.user_id.clone(),
                json: encoded,
            });
        }
        log::info!(
            "Connection {conn_id}: {} left session {}",
            reg.user_id,
            reg.session_id
        );

        if target.peer_count().await == 0 && rooms.remove_if_empty(&reg.session_id).await {
            log::info!("Session {} removed (empty)", reg.session_id);
        }

        let mut s = stats.write().await;
        s.active_connections -= 1;
        s.active_sessions = rooms.room_count().await;
    } else {
        let mut s = stats.write().await;
        s.active_connections -= 1;
    }

    Ok(())
}

/// Peer identity for the room's peer map. Joins carry the display name;
/// any other first frame registers the peer anonymously.
fn participant_from(frame: &WireMessage) -> ParticipantInfo {
    match frame {
        WireMessage::Presence {
            data:
                PresenceEvent::Join {
                    user_id,
                    user_name,
                    avatar,
                },
            ..
        } => ParticipantInfo {
            user_id: user_id.clone(),
            name: user_name.clone(),
            avatar: avatar.clone(),
        },
        _ => ParticipantInfo::new(frame.user_id(), ""),
    }
}

fn named(info: &ParticipantInfo) -> Option<String> {
    if info.name.is_empty() {
        None
    } else {
        Some(info.name.clone())
    }
}
