use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use thiserror::Error;

use crate::types::{ConnId, PublicKey};

/// Registry invariant violations. Any of these means a bug in the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is already paired")]
    AlreadyPaired(ConnId),
    #[error("connection {0} cannot be paired with itself")]
    SelfPairing(ConnId),
    #[error("queued connection {0} has no public key")]
    MissingKey(ConnId),
}

/// Keys, waiting queue and pairings for every live connection.
///
/// A connection is either queued, in exactly one pairing, or in neither.
#[derive(Debug, Default)]
pub struct RegistryState {
    keys: HashMap<ConnId, PublicKey>,
    queue: VecDeque<ConnId>,
    // Mirrors `queue` for constant-time membership checks.
    queued: HashSet<ConnId>,
    partners: HashMap<ConnId, ConnId>,
}

impl RegistryState {
    /// Overwrites any key already stored for `id`.
    pub fn register_key(&mut self, id: ConnId, key: PublicKey) {
        self.keys.insert(id, key);
    }

    pub fn key_of(&self, id: ConnId) -> Option<&PublicKey> {
        self.keys.get(&id)
    }

    pub fn forget_key(&mut self, id: ConnId) {
        self.keys.remove(&id);
    }

    /// Appends `id` to the back of the queue unless it is already queued or paired.
    pub fn enqueue(&mut self, id: ConnId) {
        if self.partners.contains_key(&id) || !self.queued.insert(id) {
            return;
        }
        self.queue.push_back(id);
    }

    pub fn pop_front(&mut self) -> Option<ConnId> {
        let id = self.queue.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }

    pub fn peek_front(&self) -> Option<ConnId> {
        self.queue.front().copied()
    }

    pub fn is_queued(&self, id: ConnId) -> bool {
        self.queued.contains(&id)
    }

    pub fn remove_from_queue(&mut self, id: ConnId) {
        if self.queued.remove(&id) {
            self.queue.retain(|queued| *queued != id);
        }
    }

    pub fn pair(&mut self, a: ConnId, b: ConnId) -> Result<(), RegistryError> {
        if a == b {
            return Err(RegistryError::SelfPairing(a));
        }
        for id in [a, b] {
            if self.partners.contains_key(&id) {
                return Err(RegistryError::AlreadyPaired(id));
            }
        }
        self.remove_from_queue(a);
        self.remove_from_queue(b);
        self.partners.insert(a, b);
        self.partners.insert(b, a);
        Ok(())
    }

    pub fn partner_of(&self, id: ConnId) -> Option<ConnId> {
        self.partners.get(&id).copied()
    }

    /// Clears both directions of the pairing containing `id` and returns the
    /// former partner. Calling it again returns `None`.
    pub fn unpair(&mut self, id: ConnId) -> Option<ConnId> {
        let partner = self.partners.remove(&id)?;
        if self.partners.get(&partner) == Some(&id) {
            self.partners.remove(&partner);
        }
        Some(partner)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of connections currently paired (twice the number of pairs).
    pub fn pair_count(&self) -> usize {
        self.partners.len()
    }

    pub fn waiting_ids(&self) -> Vec<ConnId> {
        self.queue.iter().copied().collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            waiting: self.queue.len(),
            paired: self.partners.len(),
            known_keys: self.keys.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub waiting: usize,
    pub paired: usize,
    pub known_keys: usize,
}

/// Lock-guarded [`RegistryState`]. Each convenience method takes the lock for a
/// single operation; use [`Registry::lock`] when several steps must be atomic.
#[derive(Debug, Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock()
    }

    pub fn register_key(&self, id: ConnId, key: PublicKey) {
        self.lock().register_key(id, key);
    }

    pub fn key_of(&self, id: ConnId) -> Option<PublicKey> {
        self.lock().key_of(id).cloned()
    }

    pub fn forget_key(&self, id: ConnId) {
        self.lock().forget_key(id);
    }

    pub fn enqueue(&self, id: ConnId) {
        self.lock().enqueue(id);
    }

    pub fn pop_front(&self) -> Option<ConnId> {
        self.lock().pop_front()
    }

    pub fn is_queued(&self, id: ConnId) -> bool {
        self.lock().is_queued(id)
    }

    pub fn remove_from_queue(&self, id: ConnId) {
        self.lock().remove_from_queue(id);
    }

    pub fn pair(&self, a: ConnId, b: ConnId) -> Result<(), RegistryError> {
        self.lock().pair(a, b)
    }

    pub fn partner_of(&self, id: ConnId) -> Option<ConnId> {
        self.lock().partner_of(id)
    }

    pub fn unpair(&self, id: ConnId) -> Option<ConnId> {
        self.lock().unpair(id)
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue_len()
    }

    pub fn pair_count(&self) -> usize {
        self.lock().pair_count()
    }

    pub fn waiting_ids(&self) -> Vec<ConnId> {
        self.lock().waiting_ids()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.lock().snapshot()
    }
}
