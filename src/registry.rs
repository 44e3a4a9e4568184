//! Connection registry: one shared transport client per session key.
//!
//! Replaces a process-wide singleton with an explicit, injectable registry.
//! Each `(server_url, userId, sessionId)` key maps to one [`CollabClient`];
//! acquirers share the connection and teardown is reference-counted, so
//! releasing one consumer never yanks the socket out from under another.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::client::CollabClient;
use crate::config::ClientConfig;
use crate::protocol::ParticipantInfo;

/// Identity of one logical connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub server_url: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        server_url: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

struct Entry {
    client: CollabClient,
    refs: usize,
}

/// Registry of live transport clients, keyed by [`SessionKey`].
///
/// Owned by the composition root and injected into each session manager.
pub struct ConnectionRegistry {
    config: ClientConfig,
    entries: RwLock<HashMap<SessionKey, Entry>>,
}

impl ConnectionRegistry {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Client configuration used for every connection this registry creates.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Key under which a connection for the given identity is registered.
    pub fn key_for(&self, user_id: &str, session_id: &str) -> SessionKey {
        SessionKey::new(&self.config.server_url, user_id, session_id)
    }

    /// Get or create the shared client for `(user, session)`.
    ///
    /// Does not connect — lifecycle belongs to the caller, and
    /// [`CollabClient::connect`] is idempotent across sharers.
    pub async fn acquire(&self, info: ParticipantInfo, session_id: &str) -> CollabClient {
        let key = self.key_for(&info.user_id, session_id);
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&key) {
            entry.refs += 1;
            return entry.client.clone();
        }

        let client = CollabClient::new(info, session_id, self.config.clone());
        entries.insert(
            key,
            Entry {
                client: client.clone(),
                refs: 1,
            },
        );
        client
    }

    /// Drop one reference to the keyed connection.
    ///
    /// The underlying client is disconnected and removed only when the last
    /// reference is released; returns whether teardown happened. Unknown keys
    /// are a no-op.
    pub async fn release(&self, key: &SessionKey) -> bool {
        let client = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };
            if entry.refs > 1 {
                entry.refs -= 1;
                return false;
            }
            entries.remove(key).map(|e| e.client)
        };

        if let Some(client) = client {
            client.disconnect().await;
            log::info!(
                "Tore down connection for user {} in session {}",
                key.user_id,
                key.session_id
            );
            true
        } else {
            false
        }
    }

    /// Number of live registered connections.
    pub async fn active_connections(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether a connection is registered under the key.
    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.entries.read().await.contains_key(key)
    }
}
