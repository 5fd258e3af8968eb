//! Registry of currently-connected peers.

use std::collections::HashMap;

use parking_lot::RwLock;
use saker_wire::PeerId;

use crate::errors::RegistryError;
use crate::remote::Remote;

/// Thread-safe map of peer id to [`Remote`].
///
/// The only state shared across connection drivers. Entries appear exactly
/// when a handshake completes and disappear when the connection closes —
/// a peer id is never visible before its `Remote` is fully constructed.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<PeerId, Remote>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected peer. Fails if the id is already present.
    pub fn add(&self, remote: Remote) -> Result<(), RegistryError> {
        let mut clients = self.clients.write();
        if clients.contains_key(&remote.id()) {
            return Err(RegistryError::DuplicatePeer(remote.id()));
        }
        clients.insert(remote.id(), remote);
        Ok(())
    }

    /// Remove a peer, returning its handle if it was registered.
    pub fn remove(&self, id: PeerId) -> Option<Remote> {
        self.clients.write().remove(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<Remote> {
        self.clients.read().get(&id).cloned()
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.clients.read().contains_key(&id)
    }

    /// A stable snapshot of all connected peers, safe to iterate while
    /// connects and disconnects happen concurrently. No ordering guarantee.
    pub fn snapshot(&self) -> Vec<Remote> {
        self.clients.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}
