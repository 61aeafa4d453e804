//! Identity resolution and connection tracking.
//!
//! A transport credential maps to one stable identity; a missing credential
//! mints a fresh guest. Each identity owns a set of live connection handles,
//! so closing one of several tabs never evicts the player from a room.

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Resolved identity shared across rooms and connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
}

#[derive(Default)]
pub struct IdentityRegistry {
    by_credential: DashMap<String, Uuid>,
    profiles: DashMap<Uuid, UserProfile>,
    connections: DashMap<Uuid, HashSet<Uuid>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a credential to a stable identity, creating a guest profile on
    /// first contact. A provided name refreshes the stored one.
    pub fn resolve(&self, credential: Option<&str>, name: Option<&str>) -> UserProfile {
        let id = match credential {
            Some(cred) => *self
                .by_credential
                .entry(cred.to_string())
                .or_insert_with(Uuid::new_v4),
            None => Uuid::new_v4(),
        };

        let mut profile = self.profiles.entry(id).or_insert_with(|| UserProfile {
            id,
            name: name.unwrap_or("Guest").to_string(),
        });
        if let Some(name) = name {
            profile.name = name.to_string();
        }
        profile.clone()
    }

    pub fn profile(&self, id: Uuid) -> Option<UserProfile> {
        self.profiles.get(&id).map(|p| p.clone())
    }

    /// Attach a live connection handle to an identity.
    pub fn bind_connection(&self, identity: Uuid, conn: Uuid) {
        self.connections.entry(identity).or_default().insert(conn);
        debug!("bound connection {} to identity {}", conn, identity);
    }

    /// Detach a connection handle. Returns true while the identity still has
    /// other live connections.
    pub fn release_connection(&self, identity: Uuid, conn: Uuid) -> bool {
        let mut still_connected = false;
        if let Some(mut conns) = self.connections.get_mut(&identity) {
            conns.remove(&conn);
            still_connected = !conns.is_empty();
        }
        if !still_connected {
            self.connections.remove(&identity);
        }
        still_connected
    }

    /// Live connection handles for an identity.
    pub fn connections_of(&self, identity: Uuid) -> Vec<Uuid> {
        self.connections
            .get(&identity)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }
}
