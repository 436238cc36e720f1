//! Identifier allocation
//!
//! The sole source of truth for which ring and key ids exist. Each
//! allocation observes and advances its counter inside a single `&mut`
//! borrow, so two allocations at different re-entrant nesting depths can
//! never receive the same id.

use serde::{Deserialize, Serialize};

use crate::types::{KeyId, RingId};

/// Monotonic, gap-free allocator for ring and key identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySpace {
    next_ring: u64,
    next_key: u64,
}

impl IdentitySpace {
    /// Create a fresh space; the first ids handed out are ring 0 and key 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next ring id
    pub fn next_ring_id(&mut self) -> RingId {
        let id = RingId::new(self.next_ring);
        self.next_ring += 1;
        id
    }

    /// Allocate the next key id
    pub fn next_key_id(&mut self) -> KeyId {
        let id = KeyId::new(self.next_key);
        self.next_key += 1;
        id
    }

    /// Total rings ever allocated
    pub fn ring_count(&self) -> u64 {
        self.next_ring
    }

    /// Total keys ever allocated
    pub fn key_count(&self) -> u64 {
        self.next_key
    }

    /// A ring id is known iff it has been allocated
    pub fn is_known_ring(&self, ring: RingId) -> bool {
        ring.as_u64() < self.next_ring
    }

    /// A key id is known iff it has been allocated; validity never regresses
    pub fn is_known_key(&self, key: KeyId) -> bool {
        key.as_u64() < self.next_key
    }
}
