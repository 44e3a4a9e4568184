//! # copresence — real-time presence for collaborative sessions
//!
//! WebSocket-based presence and collaboration layer: who is in the session,
//! where their cursors are, what they have selected, and a raw relay for
//! edit events.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   subscribe/intents   ┌───────────────┐
//! │ CollabSession │ ◄───────────────────► │ CollabClient  │
//! │ (roster, UI)  │                       │ (WebSocket)   │
//! └───────┬───────┘                       └───────┬───────┘
//!         │ acquired through                      │ JSON frames
//! ┌───────▼───────────┐                   ┌───────▼───────┐
//! │ConnectionRegistry │                   │  RelayServer  │
//! │ (one conn / key)  │                   │ (per-session  │
//! └───────────────────┘                   │   fan-out)    │
//!                                         └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire schema (envelope + payload variants)
//! - [`client`] — transport client with backoff reconnection
//! - [`session`] — roster reconciliation and the mounted session manager
//! - [`registry`] — shared connections keyed by `(url, user, session)`
//! - [`server`] — relay server routing frames between session peers
//! - [`broadcast`] — per-session fan-out groups
//! - [`config`] — client and relay configuration

pub mod broadcast;
pub mod client;
pub mod config;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use broadcast::{PeerRoom, RelayFrame, RoomDirectory, RoomStats};
pub use client::{ClientEvent, CollabClient, ConnectionState};
pub use config::{ClientConfig, ReconnectPolicy, RelayConfig};
pub use protocol::{
    CollaborationEvent, CursorPosition, EditAction, EditOp, ParticipantInfo, PresenceEvent,
    PresenceStatus, ProtocolError, SelectionRange, WireMessage,
};
pub use registry::{ConnectionRegistry, SessionKey};
pub use server::{RelayServer, RelayStats};
pub use session::{
    Collaborator, CollaboratorColor, CollabSession, Notice, NoticeSeverity, RemoteEdit, Roster,
    RosterEffect, SessionParams, PALETTE,
};
