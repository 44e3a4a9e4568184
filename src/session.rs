//! Session manager: the reconciled view of "who else is here".
//!
//! [`Roster`] is the synchronous state machine — it folds the transport
//! event stream into a map of remote collaborators and reports the
//! user-visible side effects of each event. [`CollabSession`] mounts a
//! roster on a registry-acquired client: it pumps events into the roster on
//! a background task and exposes the render-friendly surface (`users`,
//! `is_connected`, intents, notices) to the UI.
//!
//! The roster is a session-scoped cache, not a durable record: it holds
//! exactly the ids that joined and have not left, and it is discarded on
//! unmount.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::client::{ClientEvent, CollabClient};
use crate::protocol::{
    CollaborationEvent, CursorPosition, EditAction, EditOp, ParticipantInfo, PresenceEvent,
    PresenceStatus, ProtocolError, SelectionRange,
};
use crate::registry::{ConnectionRegistry, SessionKey};

/// Fixed palette collaborators are colored from.
pub const PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
    "#BB8FCE", "#85C1E9",
];

/// Display name used when a peer joins with an empty name.
const UNKNOWN_USER: &str = "Unknown User";

/// Display color for one collaborator.
///
/// Derived from a hash of the collaborator id, so the same id always renders
/// in the same palette entry on every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollaboratorColor(&'static str);

impl CollaboratorColor {
    pub fn from_id(id: &str) -> Self {
        let index = (fnv1a(id) % PALETTE.len() as u64) as usize;
        Self(PALETTE[index])
    }

    pub fn hex(&self) -> &'static str {
        self.0
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in s.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// A remote participant in the current session.
#[derive(Debug, Clone, PartialEq)]
pub struct Collaborator {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub status: PresenceStatus,
    pub activity: Option<String>,
    /// Last-known pointer position. Overwritten on each update.
    pub cursor: Option<CursorPosition>,
    /// Last-known text selection. Overwritten on each update.
    pub selection: Option<SelectionRange>,
    pub color: CollaboratorColor,
}

/// One-time user-visible notice (the UI renders these as toasts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: NoticeSeverity,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSeverity {
    Info,
    Success,
    Error,
}

impl Notice {
    fn info(text: impl Into<String>) -> Self {
        Self {
            severity: NoticeSeverity::Info,
            text: text.into(),
        }
    }

    fn success(text: impl Into<String>) -> Self {
        Self {
            severity: NoticeSeverity::Success,
            text: text.into(),
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            severity: NoticeSeverity::Error,
            text: text.into(),
        }
    }
}

/// Edit relayed from a remote peer. Not reconciled into the roster; handed
/// to the application's editing surface as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEdit {
    pub user_id: String,
    pub edit: EditOp,
}

/// Side effect of folding one event into the roster.
#[derive(Debug, Clone, PartialEq)]
pub enum RosterEffect {
    Notice(Notice),
    RemoteEdit(RemoteEdit),
}

/// The roster state machine.
///
/// Keyed by collaborator id; never contains the local user. Events for
/// unknown ids (update-before-join, cursor-before-join) are dropped, not
/// buffered.
pub struct Roster {
    local_user_id: String,
    entries: HashMap<String, Collaborator>,
    connected: bool,
    clear_on_disconnect: bool,
}

impl Roster {
    pub fn new(local_user_id: impl Into<String>, clear_on_disconnect: bool) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            entries: HashMap::new(),
            connected: false,
            clear_on_disconnect,
        }
    }

    /// Fold one transport event into the roster.
    pub fn apply(&mut self, event: &ClientEvent) -> Option<RosterEffect> {
        match event {
            ClientEvent::Connected => {
                if self.connected {
                    return None;
                }
                self.connected = true;
                Some(RosterEffect::Notice(Notice::success(
                    "Connected to collaboration session",
                )))
            }
            ClientEvent::Disconnected => {
                if !self.connected {
                    return None;
                }
                self.connected = false;
                if self.clear_on_disconnect {
                    self.entries.clear();
                }
                Some(RosterEffect::Notice(Notice::error(
                    "Disconnected from collaboration session",
                )))
            }
            ClientEvent::Reconnecting { attempt, .. } => {
                if *attempt == 1 {
                    Some(RosterEffect::Notice(Notice::info(
                        "Reconnecting to collaboration session",
                    )))
                } else {
                    None
                }
            }
            ClientEvent::Error(e) => Some(RosterEffect::Notice(Notice::error(format!(
                "Connection failed: {e}"
            )))),
            ClientEvent::Presence(presence) => self.apply_presence(presence),
            ClientEvent::Collaboration(collab) => self.apply_collaboration(collab),
        }
    }

    fn apply_presence(&mut self, event: &PresenceEvent) -> Option<RosterEffect> {
        if event.user_id() == self.local_user_id {
            return None;
        }

        match event {
            PresenceEvent::Join {
                user_id,
                user_name,
                avatar,
            } => {
                if self.entries.contains_key(user_id) {
                    // Duplicate join (e.g. after a peer reconnect).
                    return None;
                }
                let name = if user_name.is_empty() {
                    UNKNOWN_USER.to_string()
                } else {
                    user_name.clone()
                };
                let notice = Notice::info(format!("{name} joined the session"));
                self.entries.insert(
                    user_id.clone(),
                    Collaborator {
                        id: user_id.clone(),
                        name,
                        avatar: avatar.clone(),
                        status: PresenceStatus::Online,
                        activity: None,
                        cursor: None,
                        selection: None,
                        color: CollaboratorColor::from_id(user_id),
                    },
                );
                Some(RosterEffect::Notice(notice))
            }
            PresenceEvent::Leave { user_id, .. } => {
                let removed = self.entries.remove(user_id)?;
                Some(RosterEffect::Notice(Notice::info(format!(
                    "{} left the session",
                    removed.name
                ))))
            }
            PresenceEvent::Update {
                user_id,
                status,
                activity,
            } => {
                if let Some(entry) = self.entries.get_mut(user_id) {
                    entry.status = *status;
                    if activity.is_some() {
                        entry.activity = activity.clone();
                    }
                }
                None
            }
        }
    }

    fn apply_collaboration(&mut self, event: &CollaborationEvent) -> Option<RosterEffect> {
        if event.user_id() == self.local_user_id {
            return None;
        }

        match event {
            CollaborationEvent::Cursor { user_id, data } => {
                if let Some(entry) = self.entries.get_mut(user_id) {
                    entry.cursor = Some(*data);
                }
                None
            }
            CollaborationEvent::Selection { user_id, data } => {
                if let Some(entry) = self.entries.get_mut(user_id) {
                    entry.selection = Some(data.clone());
                }
                None
            }
            CollaborationEvent::Edit { user_id, data } => {
                Some(RosterEffect::RemoteEdit(RemoteEdit {
                    user_id: user_id.clone(),
                    edit: data.clone(),
                }))
            }
        }
    }

    /// Remote collaborators, sorted by id for stable rendering.
    pub fn users(&self) -> Vec<Collaborator> {
        let mut users: Vec<Collaborator> = self.entries.values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    pub fn get(&self, user_id: &str) -> Option<&Collaborator> {
        self.entries.get(user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }
}

/// Inputs for mounting a session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub user_id: String,
    pub user_name: String,
    pub avatar: Option<String>,
    pub session_id: String,
}

impl SessionParams {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            avatar: None,
            session_id: session_id.into(),
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// A mounted collaboration session.
///
/// Lives for the lifetime of its owning UI scope: mount on enter, call
/// intents and read `users()` while visible, [`unmount`](Self::unmount) on
/// leave. The transport connection is shared through the registry and torn
/// down with the last session using it.
pub struct CollabSession {
    client: CollabClient,
    registry: Arc<ConnectionRegistry>,
    key: SessionKey,
    roster: Arc<RwLock<Roster>>,
    notice_rx: Option<mpsc::Receiver<Notice>>,
    edit_rx: Option<mpsc::Receiver<RemoteEdit>>,
    cursor_interval: Duration,
    cursor_gate: Mutex<Option<Instant>>,
    pump: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for CollabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabSession")
            .field("key", &self.key)
            .field("cursor_interval", &self.cursor_interval)
            .finish_non_exhaustive()
    }
}

impl CollabSession {
    /// Acquire the shared client, start the event pump, and connect.
    ///
    /// Subscription happens before the connect call, so the initial
    /// `Connected` is never missed; when the connection already exists (same
    /// key mounted elsewhere) the roster is seeded from the client state
    /// instead.
    pub async fn mount(
        registry: Arc<ConnectionRegistry>,
        params: SessionParams,
    ) -> Result<Self, ProtocolError> {
        if params.user_id.is_empty() {
            return Err(ProtocolError::InvalidSession("empty user id".to_string()));
        }
        if params.session_id.is_empty() {
            return Err(ProtocolError::InvalidSession(
                "empty session id".to_string(),
            ));
        }

        let mut info = ParticipantInfo::new(params.user_id.as_str(), params.user_name.as_str());
        info.avatar = params.avatar.clone();

        let client = registry.acquire(info, &params.session_id).await;
        let key = registry.key_for(&params.user_id, &params.session_id);
        let clear_on_disconnect = registry.config().clear_roster_on_disconnect;
        let cursor_interval = registry.config().cursor_interval;

        let roster = Arc::new(RwLock::new(Roster::new(
            params.user_id.as_str(),
            clear_on_disconnect,
        )));
        let (notice_tx, notice_rx) = mpsc::channel(64);
        let (edit_tx, edit_rx) = mpsc::channel(64);

        let mut events = client.subscribe();
        let pump_roster = roster.clone();
        let pump_notices = notice_tx.clone();
        let pump = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let effect = pump_roster.write().await.apply(&event);
                        match effect {
                            Some(RosterEffect::Notice(notice)) => {
                                // A slow UI loses notices, never events.
                                let _ = pump_notices.try_send(notice);
                            }
                            Some(RosterEffect::RemoteEdit(edit)) => {
                                let _ = edit_tx.try_send(edit);
                            }
                            None => {}
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Session event pump lagged by {n} events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Err(e) = client.connect().await {
            pump.abort();
            registry.release(&key).await;
            return Err(e);
        }

        // Seed for the already-connected case; the transition guard in the
        // roster keeps this from double-noticing when the Connected event
        // also arrives through the pump.
        if client.is_connected().await {
            if let Some(RosterEffect::Notice(notice)) =
                roster.write().await.apply(&ClientEvent::Connected)
            {
                let _ = notice_tx.try_send(notice);
            }
        }

        Ok(Self {
            client,
            registry,
            key,
            roster,
            notice_rx: Some(notice_rx),
            edit_rx: Some(edit_rx),
            cursor_interval,
            cursor_gate: Mutex::new(None),
            pump,
        })
    }

    /// Remote collaborators currently in the session. Never contains the
    /// local user.
    pub async fn users(&self) -> Vec<Collaborator> {
        self.roster.read().await.users()
    }

    /// Whether the transport is currently connected.
    pub async fn is_connected(&self) -> bool {
        self.roster.read().await.is_connected()
    }

    /// Cursor intent, throttled to the configured interval. Throttled and
    /// disconnected calls are dropped silently.
    pub async fn send_cursor_position(&self, x: f64, y: f64) {
        if !self.cursor_gate_open().await {
            return;
        }
        self.client.send_cursor_position(x, y).await;
    }

    /// Selection intent. Sent on every call (selection changes are rare
    /// compared to cursor moves).
    pub async fn send_selection(&self, start: u64, end: u64, text: &str) {
        self.client.send_selection(start, end, text).await;
    }

    /// Raw edit intent, relayed to peers without reconciliation.
    pub async fn send_edit(&self, position: u64, text: &str, action: EditAction) {
        self.client.send_edit(position, text, action).await;
    }

    /// Presence status intent.
    pub async fn update_presence(&self, status: PresenceStatus, activity: Option<&str>) {
        self.client.update_presence(status, activity).await;
    }

    /// Take the notice stream. Can only be taken once.
    pub fn take_notice_rx(&mut self) -> Option<mpsc::Receiver<Notice>> {
        self.notice_rx.take()
    }

    /// Take the remote-edit stream. Can only be taken once.
    pub fn take_edit_rx(&mut self) -> Option<mpsc::Receiver<RemoteEdit>> {
        self.edit_rx.take()
    }

    /// The underlying transport client (shared with other sessions on the
    /// same key).
    pub fn client(&self) -> &CollabClient {
        &self.client
    }

    pub fn session_id(&self) -> &str {
        &self.key.session_id
    }

    pub fn local_user_id(&self) -> &str {
        &self.key.user_id
    }

    /// Stop the event pump, discard the roster, and release the shared
    /// connection (torn down only when this was the last session on the key).
    pub async fn unmount(self) {
        self.pump.abort();
        self.registry.release(&self.key).await;
    }

    async fn cursor_gate_open(&self) -> bool {
        if self.cursor_interval.is_zero() {
            return true;
        }
        let mut last = self.cursor_gate.lock().await;
        match *last {
            Some(sent) if sent.elapsed() < self.cursor_interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Roster {
        Roster::new("u1", false)
    }

    fn join(user_id: &str, user_name: &str) -> ClientEvent {
        ClientEvent::Presence(PresenceEvent::Join {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            avatar: None,
        })
    }

    fn leave(user_id: &str) -> ClientEvent {
        ClientEvent::Presence(PresenceEvent::Leave {
            user_id: user_id.to_string(),
            user_name: None,
        })
    }

    fn cursor(user_id: &str, x: f64, y: f64) -> ClientEvent {
        ClientEvent::Collaboration(CollaborationEvent::Cursor {
            user_id: user_id.to_string(),
            data: CursorPosition { x, y },
        })
    }

    fn status(user_id: &str, status: PresenceStatus) -> ClientEvent {
        ClientEvent::Presence(PresenceEvent::Update {
            user_id: user_id.to_string(),
            status,
            activity: None,
        })
    }

    #[test]
    fn test_join_inserts_online_collaborator() {
        let mut roster = roster();
        let effect = roster.apply(&join("u2", "Sarah"));

        assert_eq!(roster.len(), 1);
        let sarah = roster.get("u2").unwrap();
        assert_eq!(sarah.name, "Sarah");
        assert_eq!(sarah.status, PresenceStatus::Online);
        assert!(sarah.cursor.is_none());
        assert!(sarah.selection.is_none());

        match effect {
            Some(RosterEffect::Notice(n)) => {
                assert_eq!(n.severity, NoticeSeverity::Info);
                assert_eq!(n.text, "Sarah joined the session");
            }
            other => panic!("Expected join notice, got {other:?}"),
        }
    }

    #[test]
    fn test_join_leave_symmetry() {
        let mut roster = roster();
        roster.apply(&join("u2", "Sarah"));
        roster.apply(&cursor("u2", 5.0, 5.0));
        roster.apply(&status("u2", PresenceStatus::Busy));
        roster.apply(&ClientEvent::Collaboration(CollaborationEvent::Selection {
            user_id: "u2".to_string(),
            data: SelectionRange {
                start: 0,
                end: 3,
                text: "abc".to_string(),
            },
        }));
        roster.apply(&leave("u2"));

        assert!(!roster.contains("u2"));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_update_before_join_is_dropped() {
        let mut roster = roster();

        assert!(roster.apply(&status("ghost", PresenceStatus::Away)).is_none());
        assert!(roster.apply(&cursor("ghost", 1.0, 1.0)).is_none());
        assert!(roster
            .apply(&ClientEvent::Collaboration(CollaborationEvent::Selection {
                user_id: "ghost".to_string(),
                data: SelectionRange {
                    start: 0,
                    end: 1,
                    text: "x".to_string(),
                },
            }))
            .is_none());

        assert!(roster.is_empty());
    }

    #[test]
    fn test_cursor_last_write_wins() {
        let mut roster = roster();
        roster.apply(&join("u2", "Sarah"));
        roster.apply(&cursor("u2", 1.0, 1.0));
        roster.apply(&cursor("u2", 2.0, 2.0));

        let pos = roster.get("u2").unwrap().cursor.unwrap();
        assert_eq!(pos.x, 2.0);
        assert_eq!(pos.y, 2.0);
    }

    #[test]
    fn test_local_user_excluded() {
        let mut roster = roster();
        roster.apply(&join("u1", "Self"));
        roster.apply(&cursor("u1", 1.0, 1.0));

        assert!(roster.is_empty());
        assert!(roster.users().iter().all(|u| u.id != "u1"));
    }

    #[test]
    fn test_disconnect_preserves_roster_by_default() {
        let mut roster = roster();
        roster.apply(&ClientEvent::Connected);
        roster.apply(&join("u2", "Sarah"));
        roster.apply(&cursor("u2", 3.0, 4.0));
        let before = roster.users();

        roster.apply(&ClientEvent::Disconnected);

        assert!(!roster.is_connected());
        assert_eq!(roster.users(), before);
    }

    #[test]
    fn test_disconnect_clears_roster_when_configured() {
        let mut roster = Roster::new("u1", true);
        roster.apply(&ClientEvent::Connected);
        roster.apply(&join("u2", "Sarah"));

        roster.apply(&ClientEvent::Disconnected);

        assert!(!roster.is_connected());
        assert!(roster.is_empty());
    }

    #[test]
    fn test_literal_scenario() {
        // Session manager for u1: connected, u2 joins, moves cursor, leaves.
        let mut roster = roster();
        roster.apply(&ClientEvent::Connected);

        roster.apply(&join("u2", "Sarah"));
        let users = roster.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "u2");
        assert_eq!(users[0].name, "Sarah");
        assert_eq!(users[0].status, PresenceStatus::Online);
        assert!(users[0].cursor.is_none());
        assert!(users[0].selection.is_none());

        roster.apply(&cursor("u2", 10.0, 20.0));
        let pos = roster.get("u2").unwrap().cursor.unwrap();
        assert_eq!(pos.x, 10.0);
        assert_eq!(pos.y, 20.0);

        roster.apply(&leave("u2"));
        assert!(roster.users().is_empty());
    }

    #[test]
    fn test_duplicate_join_is_noop() {
        let mut roster = roster();
        roster.apply(&join("u2", "Sarah"));
        roster.apply(&cursor("u2", 9.0, 9.0));

        // Re-join (e.g. peer reconnect) keeps the entry and emits nothing.
        let effect = roster.apply(&join("u2", "Sarah"));
        assert!(effect.is_none());
        assert_eq!(roster.len(), 1);
        assert!(roster.get("u2").unwrap().cursor.is_some());
    }

    #[test]
    fn test_leave_unknown_id_is_noop() {
        let mut roster = roster();
        assert!(roster.apply(&leave("ghost")).is_none());
    }

    #[test]
    fn test_empty_name_defaults() {
        let mut roster = roster();
        roster.apply(&join("u2", ""));
        assert_eq!(roster.get("u2").unwrap().name, "Unknown User");
    }

    #[test]
    fn test_update_merges_status_and_activity() {
        let mut roster = roster();
        roster.apply(&join("u2", "Sarah"));

        roster.apply(&ClientEvent::Presence(PresenceEvent::Update {
            user_id: "u2".to_string(),
            status: PresenceStatus::Busy,
            activity: Some("reviewing".to_string()),
        }));
        let entry = roster.get("u2").unwrap();
        assert_eq!(entry.status, PresenceStatus::Busy);
        assert_eq!(entry.activity.as_deref(), Some("reviewing"));

        // An update without activity keeps the previous one.
        roster.apply(&status("u2", PresenceStatus::Away));
        let entry = roster.get("u2").unwrap();
        assert_eq!(entry.status, PresenceStatus::Away);
        assert_eq!(entry.activity.as_deref(), Some("reviewing"));
    }

    #[test]
    fn test_connect_notice_fires_once() {
        let mut roster = roster();
        assert!(roster.apply(&ClientEvent::Connected).is_some());
        assert!(roster.apply(&ClientEvent::Connected).is_none());
        assert!(roster.is_connected());
    }

    #[test]
    fn test_disconnect_notice_requires_connection() {
        let mut roster = roster();
        assert!(roster.apply(&ClientEvent::Disconnected).is_none());

        roster.apply(&ClientEvent::Connected);
        match roster.apply(&ClientEvent::Disconnected) {
            Some(RosterEffect::Notice(n)) => assert_eq!(n.severity, NoticeSeverity::Error),
            other => panic!("Expected disconnect notice, got {other:?}"),
        }
    }

    #[test]
    fn test_leave_notice_uses_stored_name() {
        let mut roster = roster();
        roster.apply(&join("u2", "Sarah"));

        match roster.apply(&leave("u2")) {
            Some(RosterEffect::Notice(n)) => assert_eq!(n.text, "Sarah left the session"),
            other => panic!("Expected leave notice, got {other:?}"),
        }
    }

    #[test]
    fn test_edit_passes_through_without_roster_change() {
        let mut roster = roster();
        roster.apply(&join("u2", "Sarah"));
        let before = roster.users();

        let effect = roster.apply(&ClientEvent::Collaboration(CollaborationEvent::Edit {
            user_id: "u2".to_string(),
            data: EditOp {
                position: 4,
                text: "hi".to_string(),
                action: EditAction::Insert,
            },
        }));

        match effect {
            Some(RosterEffect::RemoteEdit(edit)) => {
                assert_eq!(edit.user_id, "u2");
                assert_eq!(edit.edit.position, 4);
                assert_eq!(edit.edit.action, EditAction::Insert);
            }
            other => panic!("Expected remote edit, got {other:?}"),
        }
        assert_eq!(roster.users(), before);
    }

    #[test]
    fn test_color_is_deterministic_and_from_palette() {
        let a = CollaboratorColor::from_id("u2");
        let b = CollaboratorColor::from_id("u2");
        assert_eq!(a, b);
        assert!(PALETTE.contains(&a.hex()));

        let mut roster = roster();
        roster.apply(&join("u2", "Sarah"));
        assert_eq!(roster.get("u2").unwrap().color, a);
    }

    #[test]
    fn test_users_sorted_by_id() {
        let mut roster = roster();
        roster.apply(&join("u9", "Z"));
        roster.apply(&join("u2", "A"));
        roster.apply(&join("u5", "M"));

        let users = roster.users();
        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_reconnecting_notice_only_on_first_attempt() {
        let mut roster = roster();
        let first = roster.apply(&ClientEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(500),
        });
        assert!(first.is_some());

        let second = roster.apply(&ClientEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_secs(1),
        });
        assert!(second.is_none());
    }

    #[test]
    fn test_session_params_validation_shapes() {
        let params = SessionParams::new("u1", "Alice", "s1").with_avatar("https://a.png");
        assert_eq!(params.user_id, "u1");
        assert_eq!(params.avatar.as_deref(), Some("https://a.png"));
    }

    #[tokio::test]
    async fn test_mount_rejects_empty_ids() {
        let registry = Arc::new(ConnectionRegistry::new(crate::config::ClientConfig::new(
            "ws://127.0.0.1:9",
        )));

        let err = CollabSession::mount(registry.clone(), SessionParams::new("", "Alice", "s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSession(_)));

        let err = CollabSession::mount(registry.clone(), SessionParams::new("u1", "Alice", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSession(_)));

        assert_eq!(registry.active_connections().await, 0);
    }

    #[tokio::test]
    async fn test_mount_offline_and_unmount() {
        // Reconnect enabled: mount succeeds even with no server, the
        // connection keeps retrying in the background.
        let config = crate::config::ClientConfig {
            server_url: "ws://127.0.0.1:9".to_string(),
            reconnect: crate::config::ReconnectPolicy {
                max_retries: 2,
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(60),
            },
            ..crate::config::ClientConfig::default()
        };
        let registry = Arc::new(ConnectionRegistry::new(config));

        let session = CollabSession::mount(registry.clone(), SessionParams::new("u1", "Alice", "s1"))
            .await
            .unwrap();

        assert!(!session.is_connected().await);
        assert!(session.users().await.is_empty());
        assert_eq!(session.session_id(), "s1");
        assert_eq!(session.local_user_id(), "u1");

        // Intents while disconnected are silently dropped.
        session.send_cursor_position(1.0, 2.0).await;
        session.update_presence(PresenceStatus::Away, None).await;

        session.unmount().await;
        assert_eq!(registry.active_connections().await, 0);
    }

    #[tokio::test]
    async fn test_mount_failure_releases_registry_entry() {
        // Reconnect disabled: mount propagates the dial error and must not
        // leak the registry entry.
        let config = crate::config::ClientConfig {
            server_url: "ws://127.0.0.1:9".to_string(),
            reconnect: crate::config::ReconnectPolicy::disabled(),
            ..crate::config::ClientConfig::default()
        };
        let registry = Arc::new(ConnectionRegistry::new(config));

        let err = CollabSession::mount(registry.clone(), SessionParams::new("u1", "Alice", "s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Unreachable(_)));
        assert_eq!(registry.active_connections().await, 0);
    }
}
