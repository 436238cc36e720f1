//! Token ledger capability and the in-memory reference implementation
//!
//! The registry never owns balances; it consumes them through the
//! [`TokenLedger`] capability. Every mutating ledger call applies balances,
//! then runs the bound [`TransferGuard`], then delivers the recipient's
//! [`KeyReceiver`] hook. Only the hook runs with re-entry into the registry
//! possible, because all internal borrows are released first.
//!
//! [`MemoryLedger`] is the reference substrate used by the tests and the
//! property/fuzz harness. Its mutating operations are internally atomic: a
//! guard or hook failure restores balances to what they were when the call
//! began.

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::debug;

use crate::error::{KeyringError, Result};
use crate::types::{Address, KeyId};

/// Capability interfaces a counterparty can advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceId {
    /// Raw balance substrate
    TokenLedger,
    /// A ledger fronted by a key registry (a transfer guard is bound)
    KeyRegistry,
    /// A counterparty able to accept key deliveries
    KeyReceiver,
}

/// Token for a LIFO balance snapshot
pub type CheckpointId = u64;

/// The balance substrate consumed by the registry and the locker
///
/// `mint` and `transfer` deliver a receiver hook to `to` before returning;
/// `burn` has no recipient and delivers none. The checkpoint trio is the
/// transactional affordance that lets a failed frame unwind balances along
/// with registry state.
pub trait TokenLedger {
    fn balance_of(&self, holder: Address, key: KeyId) -> u64;

    fn mint(&self, operator: Address, to: Address, key: KeyId, amount: u64, data: &[u8])
        -> Result<()>;

    fn burn(&self, operator: Address, from: Address, key: KeyId, amount: u64) -> Result<()>;

    fn transfer(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        key: KeyId,
        amount: u64,
        data: &[u8],
    ) -> Result<()>;

    /// Atomic multi-leg transfer; every leg's guard check is evaluated
    /// against post-transfer balances
    fn transfer_batch(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        moves: &[(KeyId, u64)],
        data: &[u8],
    ) -> Result<()>;

    fn supports(&self, interface: InterfaceId) -> bool;

    fn checkpoint(&self) -> CheckpointId;
    fn commit(&self, checkpoint: CheckpointId);
    fn rollback(&self, checkpoint: CheckpointId);
}

/// Recipient-side delivery hook
///
/// Invoked synchronously after balances and the guard have been applied.
/// The implementation may re-enter any registry or locker entry point.
pub trait KeyReceiver {
    fn on_key_received(
        &self,
        source: &dyn TokenLedger,
        operator: Address,
        from: Address,
        key: KeyId,
        amount: u64,
        data: &[u8],
    ) -> Result<()>;

    fn on_key_batch_received(
        &self,
        source: &dyn TokenLedger,
        operator: Address,
        from: Address,
        moves: &[(KeyId, u64)],
        data: &[u8],
    ) -> Result<()> {
        for &(key, amount) in moves {
            self.on_key_received(source, operator, from, key, amount, data)?;
        }
        Ok(())
    }
}

/// Post-mutation guard run by the ledger on every balance-changing event
pub trait TransferGuard {
    fn on_key_event(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        moves: &[(KeyId, u64)],
    ) -> Result<()>;
}

/// In-memory reference ledger
#[derive(Default)]
pub struct MemoryLedger {
    balances: RefCell<HashMap<Address, HashMap<KeyId, u64>>>,
    receivers: RefCell<HashMap<Address, Rc<dyn KeyReceiver>>>,
    guard: RefCell<Option<Weak<dyn TransferGuard>>>,
    saves: RefCell<Vec<(CheckpointId, HashMap<Address, HashMap<KeyId, u64>>)>>,
    next_save: Cell<CheckpointId>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the registry-side transfer guard (the `notifyReceived` hook
    /// registration); held weakly to break the registry/ledger cycle
    pub fn bind_guard(&self, guard: Weak<dyn TransferGuard>) {
        *self.guard.borrow_mut() = Some(guard);
    }

    /// Register the delivery hook for an address
    pub fn register_receiver(&self, address: Address, receiver: Rc<dyn KeyReceiver>) {
        self.receivers.borrow_mut().insert(address, receiver);
    }

    fn credit(&self, to: Address, key: KeyId, amount: u64) {
        if amount == 0 {
            return;
        }
        *self
            .balances
            .borrow_mut()
            .entry(to)
            .or_default()
            .entry(key)
            .or_default() += amount;
    }

    fn debit(&self, from: Address, key: KeyId, amount: u64) -> Result<()> {
        let mut balances = self.balances.borrow_mut();
        let held = balances
            .get(&from)
            .and_then(|held| held.get(&key))
            .copied()
            .unwrap_or(0);
        if held < amount {
            return Err(KeyringError::InsufficientKeys {
                key,
                needed: amount,
                available: held,
            });
        }
        if let Some(held_keys) = balances.get_mut(&from) {
            let remaining = held - amount;
            if remaining == 0 {
                held_keys.remove(&key);
                if held_keys.is_empty() {
                    balances.remove(&from);
                }
            } else {
                held_keys.insert(key, remaining);
            }
        }
        Ok(())
    }

    /// Run the bound guard, if any; no borrow is held across the call
    fn run_guard(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        moves: &[(KeyId, u64)],
    ) -> Result<()> {
        let guard = self.guard.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(guard) = guard {
            guard.on_key_event(operator, from, to, moves)?;
        }
        Ok(())
    }

    /// Deliver the recipient hook, if one is registered for `to`
    fn notify(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        moves: &[(KeyId, u64)],
        data: &[u8],
        batch: bool,
    ) -> Result<()> {
        let receiver = self.receivers.borrow().get(&to).cloned();
        if let Some(receiver) = receiver {
            if batch {
                receiver.on_key_batch_received(self, operator, from, moves, data)?;
            } else if let Some(&(key, amount)) = moves.first() {
                receiver.on_key_received(self, operator, from, key, amount, data)?;
            }
        }
        Ok(())
    }

    /// Make one mutating operation internally atomic over balances
    fn atomic(&self, op: impl FnOnce() -> Result<()>) -> Result<()> {
        let checkpoint = self.checkpoint();
        match op() {
            Ok(()) => {
                self.commit(checkpoint);
                Ok(())
            }
            Err(err) => {
                self.rollback(checkpoint);
                Err(err)
            }
        }
    }
}

impl TokenLedger for MemoryLedger {
    fn balance_of(&self, holder: Address, key: KeyId) -> u64 {
        self.balances
            .borrow()
            .get(&holder)
            .and_then(|held| held.get(&key))
            .copied()
            .unwrap_or(0)
    }

    fn mint(
        &self,
        operator: Address,
        to: Address,
        key: KeyId,
        amount: u64,
        data: &[u8],
    ) -> Result<()> {
        self.atomic(|| {
            let moves = [(key, amount)];
            self.credit(to, key, amount);
            debug!(%operator, %to, %key, amount, "mint");
            self.run_guard(operator, Address::ZERO, to, &moves)?;
            self.notify(operator, Address::ZERO, to, &moves, data, false)
        })
    }

    fn burn(&self, operator: Address, from: Address, key: KeyId, amount: u64) -> Result<()> {
        self.atomic(|| {
            let moves = [(key, amount)];
            self.debit(from, key, amount)?;
            debug!(%operator, %from, %key, amount, "burn");
            self.run_guard(operator, from, Address::ZERO, &moves)
        })
    }

    fn transfer(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        key: KeyId,
        amount: u64,
        data: &[u8],
    ) -> Result<()> {
        self.atomic(|| {
            let moves = [(key, amount)];
            self.debit(from, key, amount)?;
            self.credit(to, key, amount);
            debug!(%operator, %from, %to, %key, amount, "transfer");
            self.run_guard(operator, from, to, &moves)?;
            self.notify(operator, from, to, &moves, data, false)
        })
    }

    fn transfer_batch(
        &self,
        operator: Address,
        from: Address,
        to: Address,
        moves: &[(KeyId, u64)],
        data: &[u8],
    ) -> Result<()> {
        self.atomic(|| {
            for &(key, amount) in moves {
                self.debit(from, key, amount)?;
                self.credit(to, key, amount);
            }
            debug!(%operator, %from, %to, legs = moves.len(), "transfer batch");
            self.run_guard(operator, from, to, moves)?;
            self.notify(operator, from, to, moves, data, true)
        })
    }

    fn supports(&self, interface: InterfaceId) -> bool {
        match interface {
            InterfaceId::TokenLedger => true,
            InterfaceId::KeyRegistry => self
                .guard
                .borrow()
                .as_ref()
                .is_some_and(|guard| guard.upgrade().is_some()),
            InterfaceId::KeyReceiver => false,
        }
    }

    fn checkpoint(&self) -> CheckpointId {
        let id = self.next_save.get();
        self.next_save.set(id + 1);
        self.saves.borrow_mut().push((id, self.balances.borrow().clone()));
        id
    }

    fn commit(&self, checkpoint: CheckpointId) {
        let mut saves = self.saves.borrow_mut();
        if let Some(pos) = saves.iter().rposition(|(id, _)| *id == checkpoint) {
            saves.truncate(pos);
        }
    }

    fn rollback(&self, checkpoint: CheckpointId) {
        let mut saves = self.saves.borrow_mut();
        let Some(pos) = saves.iter().rposition(|(id, _)| *id == checkpoint) else {
            return;
        };
        let mut drained = saves.drain(pos..);
        if let Some((_, snapshot)) = drained.next() {
            drop(drained);
            drop(saves);
            *self.balances.borrow_mut() = snapshot;
        }
    }
}
