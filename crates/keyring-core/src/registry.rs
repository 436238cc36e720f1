//! Registry operations: the public mutation surface
//!
//! All registry-owned state lives in one store behind a `RefCell`; the
//! ledger is an injected capability. Two disciplines make unbounded
//! re-entrant nesting safe:
//!
//! 1. Check-effects-interaction ordering. Identifier allocation, ring
//!    membership, metadata, and supply updates are committed (and the state
//!    borrow released) before any ledger call that can deliver a receiver
//!    hook. A hook that re-enters the registry therefore always observes
//!    fully-initialized rings and keys and allocates disjoint ids.
//! 2. Transactional frames. Every mutating entry point snapshots registry
//!    state, takes a ledger checkpoint, and marks the event log on entry; an
//!    `Err` from any nesting depth restores all three and propagates, so the
//!    top-level call unwinds with no partial state change.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::error::{KeyringError, Result};
use crate::event::{EventLog, RegistryEvent};
use crate::identity::IdentitySpace;
use crate::index::KeyLedgerIndex;
use crate::ledger::{MemoryLedger, TokenLedger, TransferGuard};
use crate::metadata::{KeyMetadata, MetadataStore};
use crate::ring::RingRegistry;
use crate::types::{Address, KeyId, RingId};

/// Everything the registry owns, as a single restorable store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    identity: IdentitySpace,
    rings: RingRegistry,
    index: KeyLedgerIndex,
    supply: HashMap<KeyId, u64>,
    metadata: MetadataStore,
}

/// Inspection view of a single key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key: KeyId,
    pub ring: RingId,
    pub is_root: bool,
    pub supply: u64,
    pub metadata: KeyMetadata,
}

/// The ring/key registry and its mutation surface
pub struct KeyRegistry {
    state: RefCell<RegistryState>,
    ledger: Rc<dyn TokenLedger>,
    events: EventLog,
}

impl KeyRegistry {
    /// Create a registry over an existing ledger capability
    ///
    /// The caller is responsible for binding this registry as the ledger's
    /// transfer guard; see [`KeyRegistry::with_memory_ledger`] for wiring
    /// against the reference ledger.
    pub fn new(ledger: Rc<dyn TokenLedger>, events: EventLog) -> Self {
        Self {
            state: RefCell::new(RegistryState::default()),
            ledger,
            events,
        }
    }

    /// Build a registry wired to a fresh [`MemoryLedger`], guard bound
    pub fn with_memory_ledger(events: EventLog) -> (Rc<KeyRegistry>, Rc<MemoryLedger>) {
        let ledger = Rc::new(MemoryLedger::new());
        let registry = Rc::new(KeyRegistry::new(ledger.clone(), events));
        let registry_dyn: Rc<dyn TransferGuard> = registry.clone();
        let guard: std::rc::Weak<dyn TransferGuard> = Rc::downgrade(&registry_dyn);
        ledger.bind_guard(guard);
        (registry, ledger)
    }

    pub fn ledger(&self) -> &Rc<dyn TokenLedger> {
        &self.ledger
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    /// Run one mutating frame with all-or-nothing semantics
    pub(crate) fn transact<T>(&self, frame: impl FnOnce() -> Result<T>) -> Result<T> {
        let checkpoint = self.ledger.checkpoint();
        let saved = self.state.borrow().clone();
        let mark = self.events.mark();
        match frame() {
            Ok(value) => {
                self.ledger.commit(checkpoint);
                Ok(value)
            }
            Err(err) => {
                warn!(%err, "unwinding frame");
                self.ledger.rollback(checkpoint);
                *self.state.borrow_mut() = saved;
                self.events.rewind(mark);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Authorization gates
    // ------------------------------------------------------------------

    /// The sole authorization gate for mutating ring operations
    ///
    /// Evaluated against the ledger's current balances at call time: a
    /// caller stripped of the root key since queueing an action is rejected
    /// here.
    pub fn require_root_holder(&self, caller: Address, root_key: KeyId) -> Result<RingId> {
        if self.ledger.balance_of(caller, root_key) == 0 {
            return Err(KeyringError::KeyNotHeld {
                holder: caller,
                key: root_key,
            });
        }
        let state = self.state.borrow();
        let ring = state
            .rings
            .ring_of(root_key)
            .ok_or(KeyringError::KeyNotRoot(root_key))?;
        let record = state.rings.ring(ring)?;
        if record.root_key() != root_key || !record.is_member(root_key) {
            return Err(KeyringError::KeyNotRoot(root_key));
        }
        Ok(ring)
    }

    /// Confirm a key set's ring affinity before acting on it
    pub fn validate_key_set(&self, ring: RingId, keys: &[KeyId], allow_root: bool) -> Result<()> {
        let state = self.state.borrow();
        let record = state
            .rings
            .ring(ring)
            .map_err(|_| KeyringError::InvalidRing(ring))?;
        if state.supply.get(&record.root_key()).copied().unwrap_or(0) == 0 {
            return Err(KeyringError::InvalidRing(ring));
        }
        for &key in keys {
            if !state.identity.is_known_key(key)
                || (!allow_root && key == record.root_key())
                || !record.is_member(key)
            {
                return Err(KeyringError::InvalidRingKeySet(ring));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutation surface
    // ------------------------------------------------------------------

    /// Create a ring and mint one unit of its fresh root key to `recipient`
    ///
    /// The ring record, member set, metadata, and supply are committed
    /// before the mint fires its recipient hook, so a re-entrant call from
    /// the hook allocates genuinely new identifiers instead of colliding
    /// with the in-progress ring.
    pub fn create_key_ring(
        &self,
        caller: Address,
        ring_name: &str,
        root_key_name: &str,
        uri: &str,
        recipient: Address,
    ) -> Result<(RingId, KeyId)> {
        self.transact(|| {
            let (ring, root_key) = {
                let mut state = self.state.borrow_mut();
                let ring = state.identity.next_ring_id();
                let root_key = state.identity.next_key_id();
                state.rings.create_ring(ring, ring_name, root_key);
                state
                    .metadata
                    .set(root_key, KeyMetadata::new(root_key_name, uri));
                *state.supply.entry(root_key).or_default() += 1;
                (ring, root_key)
            };
            info!(%ring, %root_key, name = ring_name, "ring created");
            self.events.record(RegistryEvent::RingCreated {
                operator: caller,
                ring,
                root_key,
                name: ring_name.to_string(),
            });

            self.ledger.mint(caller, recipient, root_key, 1, &[])?;
            self.events.record(RegistryEvent::KeyMinted {
                operator: caller,
                key: root_key,
                to: recipient,
                amount: 1,
            });
            Ok((ring, root_key))
        })
    }

    /// Create a new key on the caller's ring and mint one unit to `receiver`
    pub fn create_key(
        &self,
        caller: Address,
        root_key: KeyId,
        name: &str,
        uri: &str,
        receiver: Address,
        bind: bool,
    ) -> Result<KeyId> {
        self.transact(|| {
            let ring = self.require_root_holder(caller, root_key)?;
            let key = {
                let mut state = self.state.borrow_mut();
                let key = state.identity.next_key_id();
                state.metadata.set(key, KeyMetadata::new(name, uri));
                state.rings.register_member(ring, key)?;
                if bind {
                    state.index.set_bound(receiver, key, 1);
                }
                *state.supply.entry(key).or_default() += 1;
                key
            };
            debug!(%ring, %key, name, bind, "key created");
            if bind {
                self.events.record(RegistryEvent::SoulboundChanged {
                    operator: caller,
                    holder: receiver,
                    key,
                    amount: 1,
                });
            }

            self.ledger.mint(caller, receiver, key, 1, &[])?;
            self.events.record(RegistryEvent::KeyMinted {
                operator: caller,
                key,
                to: receiver,
                amount: 1,
            });
            Ok(key)
        })
    }

    /// Mint one additional unit of an existing member key to `receiver`
    ///
    /// No new identifier is allocated. With `bind`, the receiver's floor is
    /// raised by the minted unit so an earlier bind is never loosened.
    pub fn copy_key(
        &self,
        caller: Address,
        root_key: KeyId,
        key: KeyId,
        receiver: Address,
        bind: bool,
    ) -> Result<()> {
        self.transact(|| {
            let ring = self.require_root_holder(caller, root_key)?;
            let new_bound = {
                let mut state = self.state.borrow_mut();
                state.rings.require_member(ring, key)?;
                let new_bound = if bind {
                    let bound = state.index.bound(receiver, key) + 1;
                    state.index.set_bound(receiver, key, bound);
                    Some(bound)
                } else {
                    None
                };
                *state.supply.entry(key).or_default() += 1;
                new_bound
            };
            debug!(%ring, %key, bind, "key copied");
            if let Some(amount) = new_bound {
                self.events.record(RegistryEvent::SoulboundChanged {
                    operator: caller,
                    holder: receiver,
                    key,
                    amount,
                });
            }

            self.ledger.mint(caller, receiver, key, 1, &[])?;
            self.events.record(RegistryEvent::KeyMinted {
                operator: caller,
                key,
                to: receiver,
                amount: 1,
            });
            Ok(())
        })
    }

    /// Overwrite a holder's soulbound floor for a member key
    ///
    /// The holder need not currently hold any balance; a floor above the
    /// holder's balance only constrains future outbound transfers.
    pub fn soulbind_key(
        &self,
        caller: Address,
        root_key: KeyId,
        holder: Address,
        key: KeyId,
        amount: u64,
    ) -> Result<()> {
        self.transact(|| {
            let ring = self.require_root_holder(caller, root_key)?;
            {
                let mut state = self.state.borrow_mut();
                state.rings.require_member(ring, key)?;
                state.index.set_bound(holder, key, amount);
            }
            debug!(%ring, %key, %holder, amount, "soulbound floor set");
            self.events.record(RegistryEvent::SoulboundChanged {
                operator: caller,
                holder,
                key,
                amount,
            });
            Ok(())
        })
    }

    /// Burn units of a member key out of `holder`'s balance
    ///
    /// Burns bypass the soulbound floor: a root holder must always be able
    /// to revoke. Over-burns fail with the ledger's own insufficient-balance
    /// condition and unwind the frame. Membership is untouched, so the key
    /// can be copied again later. A root holder burning their own last root
    /// unit permanently loses authority over the ring; there is no recovery
    /// path.
    pub fn burn_key(
        &self,
        caller: Address,
        root_key: KeyId,
        key: KeyId,
        holder: Address,
        amount: u64,
    ) -> Result<()> {
        self.transact(|| {
            let ring = self.require_root_holder(caller, root_key)?;
            {
                let mut state = self.state.borrow_mut();
                state.rings.require_member(ring, key)?;
                let supply = state.supply.entry(key).or_default();
                // an over-burn is rejected by the ledger below, unwinding this
                *supply = supply.saturating_sub(amount);
            }

            self.ledger.burn(caller, holder, key, amount)?;
            info!(%ring, %key, %holder, amount, "key burned");
            self.events.record(RegistryEvent::KeyBurned {
                operator: caller,
                key,
                from: holder,
                amount,
            });
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// A key is root iff it equals its ring's root key and is a member
    pub fn is_root_key(&self, key: KeyId) -> bool {
        let state = self.state.borrow();
        state
            .rings
            .ring_of(key)
            .and_then(|ring| state.rings.ring(ring).ok())
            .is_some_and(|record| record.root_key() == key && record.is_member(key))
    }

    pub fn ring_of_key(&self, key: KeyId) -> Option<RingId> {
        self.state.borrow().rings.ring_of(key)
    }

    pub fn root_key_of(&self, ring: RingId) -> Result<KeyId> {
        Ok(self.state.borrow().rings.ring(ring)?.root_key())
    }

    pub fn ring_name(&self, ring: RingId) -> Result<String> {
        Ok(self.state.borrow().rings.ring(ring)?.name().to_string())
    }

    pub fn ring_members(&self, ring: RingId) -> Result<Vec<KeyId>> {
        Ok(self.state.borrow().rings.ring(ring)?.sorted_members())
    }

    pub fn inspect_key(&self, key: KeyId) -> Result<KeyInfo> {
        let state = self.state.borrow();
        let ring = state
            .rings
            .ring_of(key)
            .ok_or_else(|| KeyringError::InvalidInput(format!("unknown key {key}")))?;
        let record = state.rings.ring(ring)?;
        Ok(KeyInfo {
            key,
            ring,
            is_root: record.root_key() == key && record.is_member(key),
            supply: state.supply.get(&key).copied().unwrap_or(0),
            metadata: state.metadata.get(key).cloned().unwrap_or_default(),
        })
    }

    pub fn supply_of(&self, key: KeyId) -> u64 {
        self.state.borrow().supply.get(&key).copied().unwrap_or(0)
    }

    pub fn keys_of(&self, holder: Address) -> Vec<KeyId> {
        self.state.borrow().index.keys_of(holder)
    }

    pub fn holders_of(&self, key: KeyId) -> Vec<Address> {
        self.state.borrow().index.holders_of(key)
    }

    pub fn bound_of(&self, holder: Address, key: KeyId) -> u64 {
        self.state.borrow().index.bound(holder, key)
    }

    pub fn key_count(&self) -> u64 {
        self.state.borrow().identity.key_count()
    }

    pub fn ring_count(&self) -> u64 {
        self.state.borrow().identity.ring_count()
    }
}

impl TransferGuard for KeyRegistry {
    /// Invoked by the ledger on every balance-changing event, at every
    /// nesting depth, before the recipient hook is delivered
    fn on_key_event(
        &self,
        _operator: Address,
        from: Address,
        to: Address,
        moves: &[(KeyId, u64)],
    ) -> Result<()> {
        // floors first, each leg independently against post-transfer
        // balances; mints and privileged burns are exempt
        if !from.is_zero() && !to.is_zero() {
            let state = self.state.borrow();
            for &(key, _) in moves {
                state
                    .index
                    .enforce_bound(from, key, self.ledger.balance_of(from, key))?;
            }
        }

        let mut state = self.state.borrow_mut();
        for &(key, _) in moves {
            if !from.is_zero() {
                let balance = self.ledger.balance_of(from, key);
                state.index.on_balance_changed(from, key, balance);
            }
            if !to.is_zero() {
                let balance = self.ledger.balance_of(to, key);
                state.index.on_balance_changed(to, key, balance);
            }
        }
        Ok(())
    }
}
