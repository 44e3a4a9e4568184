//! WebSocket transport client.
//!
//! Owns one connection to the collaboration server for a `(user, session)`
//! pair and nothing else: outbound intents are framed as [`WireMessage`]s,
//! inbound frames are decoded and fanned out to every subscriber, and lost
//! connections are retried with capped exponential backoff. The reconciled
//! roster lives in [`crate::session`], never here.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::config::ClientConfig;
use crate::protocol::{
    CollaborationEvent, EditAction, ParticipantInfo, PresenceEvent, PresenceStatus, ProtocolError,
    WireMessage,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events fanned out to subscribers.
///
/// Every subscriber receives every event, in dispatch order.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established (also after each successful reconnect).
    Connected,
    /// Connection lost or closed.
    Disconnected,
    /// A backoff attempt is scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// Remote cursor/selection/edit activity.
    Collaboration(CollaborationEvent),
    /// Remote join/leave/status change.
    Presence(PresenceEvent),
    /// Connection failure with its reason.
    Error(ProtocolError),
}

struct Shared {
    info: ParticipantInfo,
    session_id: String,
    config: ClientConfig,
    state: RwLock<ConnectionState>,
    outgoing: RwLock<Option<mpsc::Sender<String>>>,
    events: broadcast::Sender<ClientEvent>,
    /// Set by an explicit disconnect; suppresses auto-reconnect.
    closed: AtomicBool,
    /// Bumped on every dial; a stale reader must not clobber the state of a
    /// connection that superseded it.
    generation: AtomicU64,
}

/// The transport client.
///
/// Cheap to share: cloning shares the same underlying connection. Exactly one
/// live connection per `(server_url, user, session)` is the
/// [`crate::registry::ConnectionRegistry`]'s job to enforce.
pub struct CollabClient {
    shared: Arc<Shared>,
}

impl CollabClient {
    /// Create a disconnected client for the given identity and session.
    pub fn new(info: ParticipantInfo, session_id: impl Into<String>, config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            shared: Arc::new(Shared {
                info,
                session_id: session_id.into(),
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                outgoing: RwLock::new(None),
                events,
                closed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to the event stream.
    ///
    /// Each receiver sees every event from the moment of subscription;
    /// subscribe before calling [`connect`](Self::connect) to observe the
    /// initial `Connected`.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Open the connection. Idempotent: a call while connecting, connected,
    /// or reconnecting is a no-op.
    ///
    /// With reconnection enabled, a failed dial schedules backoff retries and
    /// returns `Ok(())` — failures surface as [`ClientEvent::Error`] and
    /// [`ClientEvent::Reconnecting`]. With reconnection disabled the dial
    /// error is returned directly.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        {
            let mut state = self.shared.state.write().await;
            match *state {
                ConnectionState::Connected
                | ConnectionState::Connecting
                | ConnectionState::Reconnecting => return Ok(()),
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }
        self.shared.closed.store(false, Ordering::SeqCst);

        match Shared::dial(&self.shared).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.shared.events.send(ClientEvent::Error(e.clone()));
                if self.shared.config.reconnect.enabled() {
                    Shared::spawn_reconnect(self.shared.clone());
                    Ok(())
                } else {
                    *self.shared.state.write().await = ConnectionState::Disconnected;
                    Err(e)
                }
            }
        }
    }

    /// Close the connection gracefully.
    ///
    /// Sends a `presence: leave`, flushes the outbound buffer, closes the
    /// socket, and suppresses any pending reconnect.
    pub async fn disconnect(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);

        let tx = self.shared.outgoing.write().await.take();
        if let Some(tx) = tx {
            let leave = WireMessage::leave(
                &self.shared.info.user_id,
                Some(&self.shared.info.name),
                &self.shared.session_id,
            );
            if let Ok(encoded) = leave.encode() {
                let _ = tx.send(encoded).await;
            }
            // Dropping the sender lets the writer drain and close the socket.
        }

        *self.shared.state.write().await = ConnectionState::Disconnected;
        log::info!(
            "Disconnected {} from session {}",
            self.shared.info.user_id,
            self.shared.session_id
        );
    }

    /// Cursor position intent. Fire-and-forget; dropped while disconnected.
    pub async fn send_cursor_position(&self, x: f64, y: f64) {
        let msg = WireMessage::cursor(&self.shared.info.user_id, &self.shared.session_id, x, y);
        self.send(msg).await;
    }

    /// Selection range intent. Fire-and-forget; dropped while disconnected.
    pub async fn send_selection(&self, start: u64, end: u64, text: &str) {
        let msg = WireMessage::selection(
            &self.shared.info.user_id,
            &self.shared.session_id,
            start,
            end,
            text,
        );
        self.send(msg).await;
    }

    /// Raw edit intent. Relayed to peers without reconciliation.
    pub async fn send_edit(&self, position: u64, text: &str, action: EditAction) {
        let msg = WireMessage::edit(
            &self.shared.info.user_id,
            &self.shared.session_id,
            position,
            text,
            action,
        );
        self.send(msg).await;
    }

    /// Presence status intent.
    pub async fn update_presence(&self, status: PresenceStatus, activity: Option<&str>) {
        let msg = WireMessage::presence_update(
            &self.shared.info.user_id,
            &self.shared.session_id,
            status,
            activity,
        );
        self.send(msg).await;
    }

    /// Current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    /// Whether the connection is currently established.
    pub async fn is_connected(&self) -> bool {
        *self.shared.state.read().await == ConnectionState::Connected
    }

    /// Local participant identity.
    pub fn info(&self) -> &ParticipantInfo {
        &self.shared.info
    }

    /// Session this client is bound to.
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Configured server URL.
    pub fn server_url(&self) -> &str {
        &self.shared.config.server_url
    }

    async fn send(&self, msg: WireMessage) {
        if *self.shared.state.read().await != ConnectionState::Connected {
            log::trace!("Dropping outbound message while disconnected");
            return;
        }
        let encoded = match msg.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                log::debug!("Failed to encode outbound message: {e}");
                return;
            }
        };
        let outgoing = self.shared.outgoing.read().await;
        if let Some(tx) = outgoing.as_ref() {
            if tx.try_send(encoded).is_err() {
                log::trace!("Outbound buffer full; dropping message");
            }
        }
    }
}

impl Clone for CollabClient {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Shared {
    /// Open the socket, spawn the writer and reader tasks, announce the
    /// local participant, and emit `Connected`.
    async fn dial(shared: &Arc<Self>) -> Result<(), ProtocolError> {
        if shared.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::ConnectionClosed);
        }
        let (ws_stream, _) = tokio_tungstenite::connect_async(&shared.config.server_url)
            .await
            .map_err(classify_dial_error)?;
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(shared.config.outgoing_capacity);
        let join_tx = out_tx.clone();
        *shared.outgoing.write().await = Some(out_tx);

        // Writer task: drain the outbound buffer into the socket, then close.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        // Announce ourselves. Re-sent after every reconnect; duplicate joins
        // are benign on the receiving side.
        let join = WireMessage::join(&shared.info, &shared.session_id);
        if let Ok(encoded) = join.encode() {
            let _ = join_tx.send(encoded).await;
        }

        *shared.state.write().await = ConnectionState::Connected;
        let _ = shared.events.send(ClientEvent::Connected);
        log::info!(
            "Connected to {} as {} (session {})",
            shared.config.server_url,
            shared.info.user_id,
            shared.session_id
        );

        // Reader task: decode frames, fan out, trigger reconnect on loss.
        let reader_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match WireMessage::decode(text.as_str()) {
                        Ok(frame) => {
                            // Self-echo suppression.
                            if frame.user_id() == reader_shared.info.user_id {
                                continue;
                            }
                            let event = match frame {
                                WireMessage::Collaboration { data, .. } => {
                                    ClientEvent::Collaboration(data)
                                }
                                WireMessage::Presence { data, .. } => ClientEvent::Presence(data),
                            };
                            let _ = reader_shared.events.send(event);
                        }
                        Err(e) => {
                            log::warn!("Dropping malformed inbound frame: {e}");
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost. A newer dial may already own the state; only
            // the latest generation is allowed to tear it down.
            if reader_shared.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            *reader_shared.outgoing.write().await = None;
            *reader_shared.state.write().await = ConnectionState::Disconnected;
            let _ = reader_shared.events.send(ClientEvent::Disconnected);

            if !reader_shared.closed.load(Ordering::SeqCst)
                && reader_shared.config.reconnect.enabled()
            {
                log::info!("Connection to session {} lost", reader_shared.session_id);
                Shared::spawn_reconnect(reader_shared.clone());
            }
        });

        Ok(())
    }

    /// Retry `dial` with capped exponential backoff until it succeeds, the
    /// client is explicitly closed, or the attempts are exhausted.
    fn spawn_reconnect(shared: Arc<Self>) {
        tokio::spawn(async move {
            *shared.state.write().await = ConnectionState::Reconnecting;
            let policy = shared.config.reconnect.clone();

            for attempt in 1..=policy.max_retries {
                let delay = policy.delay_for(attempt);
                let _ = shared
                    .events
                    .send(ClientEvent::Reconnecting { attempt, delay });
                log::info!(
                    "Reconnect attempt {attempt}/{} to session {} in {delay:?}",
                    policy.max_retries,
                    shared.session_id
                );
                tokio::time::sleep(delay).await;

                if shared.closed.load(Ordering::SeqCst) {
                    return;
                }
                match Shared::dial(&shared).await {
                    Ok(()) => return,
                    Err(e) => log::warn!("Reconnect attempt {attempt} failed: {e}"),
                }
            }

            *shared.state.write().await = ConnectionState::Disconnected;
            let _ = shared.events.send(ClientEvent::Error(ProtocolError::Unreachable(
                "reconnect attempts exhausted".to_string(),
            )));
        });
    }
}

/// Map a handshake failure onto the protocol error taxonomy.
fn classify_dial_error(e: WsError) -> ProtocolError {
    match e {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                ProtocolError::Unauthorized
            } else {
                ProtocolError::ProtocolMismatch(format!("unexpected HTTP status {status}"))
            }
        }
        WsError::Protocol(p) => ProtocolError::ProtocolMismatch(p.to_string()),
        WsError::Io(io) => ProtocolError::Unreachable(io.to_string()),
        WsError::Url(url) => ProtocolError::Unreachable(url.to_string()),
        other => ProtocolError::Unreachable(other.to_string()),
    }
}
