//! Ring records and membership
//!
//! A ring is a namespace of keys sharing one root authority. Membership is
//! monotone: once a key id is associated with a ring it stays a member
//! forever, even if every outstanding copy of it is later burned. That makes
//! a ring's permission shape irrevocable while individual grants stay
//! revocable.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{KeyringError, Result};
use crate::types::{KeyId, RingId};

/// A single ring: name, root key, and the monotone member set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ring {
    id: RingId,
    name: String,
    root_key: KeyId,
    members: HashSet<KeyId>,
}

impl Ring {
    /// Create a ring; the root key is a member from the first instant
    pub fn new(id: RingId, name: impl Into<String>, root_key: KeyId) -> Self {
        let mut members = HashSet::new();
        members.insert(root_key);
        Self {
            id,
            name: name.into(),
            root_key,
            members,
        }
    }

    pub fn id(&self) -> RingId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_key(&self) -> KeyId {
        self.root_key
    }

    pub fn is_member(&self, key: KeyId) -> bool {
        self.members.contains(&key)
    }

    /// Idempotent insertion; members are never removed
    pub fn add_member(&mut self, key: KeyId) {
        self.members.insert(key);
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Members in id order, for deterministic views
    pub fn sorted_members(&self) -> Vec<KeyId> {
        let mut members: Vec<KeyId> = self.members.iter().copied().collect();
        members.sort();
        members
    }
}

/// Registry of all rings, with a key-to-ring reverse index
///
/// Every key belongs to exactly one ring; the reverse index is written when
/// the key is registered and never rewritten.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RingRegistry {
    rings: HashMap<RingId, Ring>,
    ring_of: HashMap<KeyId, RingId>,
}

impl RingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new ring; `root_key` becomes its first member
    pub fn create_ring(&mut self, id: RingId, name: impl Into<String>, root_key: KeyId) {
        self.rings.insert(id, Ring::new(id, name, root_key));
        self.ring_of.insert(root_key, id);
    }

    /// Get a ring record
    pub fn ring(&self, id: RingId) -> Result<&Ring> {
        self.rings.get(&id).ok_or(KeyringError::InvalidRing(id))
    }

    /// Ring a key belongs to, if the key has been registered anywhere
    pub fn ring_of(&self, key: KeyId) -> Option<RingId> {
        self.ring_of.get(&key).copied()
    }

    /// Register a key as a member of a ring (idempotent)
    pub fn register_member(&mut self, ring: RingId, key: KeyId) -> Result<()> {
        let record = self
            .rings
            .get_mut(&ring)
            .ok_or(KeyringError::InvalidRing(ring))?;
        record.add_member(key);
        self.ring_of.insert(key, ring);
        Ok(())
    }

    /// Fail unless `key` is a member of `ring`
    pub fn require_member(&self, ring: RingId, key: KeyId) -> Result<()> {
        let record = self.ring(ring)?;
        if !record.is_member(key) {
            return Err(KeyringError::InvalidRingKey { ring, key });
        }
        Ok(())
    }

    pub fn contains_ring(&self, id: RingId) -> bool {
        self.rings.contains_key(&id)
    }
}
