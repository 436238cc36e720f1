//! Observable event feed
//!
//! Events are an append-only record for off-chain style observers. Nothing in
//! the registry or locker reads them back for control flow. Each mutating
//! frame records its events as it goes; a frame that unwinds truncates the
//! log back to where it started, so observers only ever see events from
//! committed operations.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

use crate::types::{Address, KeyId, RingId};

/// A committed registry or locker operation, as seen by observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// A ring and its root key were created
    RingCreated {
        operator: Address,
        ring: RingId,
        root_key: KeyId,
        name: String,
    },

    /// A unit of a key was minted
    KeyMinted {
        operator: Address,
        key: KeyId,
        to: Address,
        amount: u64,
    },

    /// Units of a key were burned
    KeyBurned {
        operator: Address,
        key: KeyId,
        from: Address,
        amount: u64,
    },

    /// A holder's soulbound floor for a key was changed
    SoulboundChanged {
        operator: Address,
        holder: Address,
        key: KeyId,
        amount: u64,
    },

    /// The locker lent keys out for the duration of a call
    LoanInitiated {
        operator: Address,
        key: KeyId,
        destination: Address,
        amount: u64,
    },

    /// The locker accepted a key deposit
    DepositReceived {
        operator: Address,
        from: Address,
        key: KeyId,
        amount: u64,
    },

    /// A root holder withdrew keys from the locker
    RedemptionCompleted {
        operator: Address,
        key: KeyId,
        amount: u64,
    },
}

/// Shared handle to the event feed
///
/// Cheap to clone; the registry and the locker should share one log so a
/// rolled-back frame truncates every event it produced, whichever component
/// recorded it.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Rc<RefCell<Vec<RegistryEvent>>>,
}

impl EventLog {
    /// Create a new empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn record(&self, event: RegistryEvent) {
        self.inner.borrow_mut().push(event);
    }

    /// Snapshot of all committed events, oldest first
    pub fn events(&self) -> Vec<RegistryEvent> {
        self.inner.borrow().clone()
    }

    /// Drain the log, returning everything recorded so far
    pub fn take(&self) -> Vec<RegistryEvent> {
        std::mem::take(&mut *self.inner.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// Current length, used as a frame marker
    pub(crate) fn mark(&self) -> usize {
        self.len()
    }

    /// Truncate back to a frame marker
    pub(crate) fn rewind(&self, mark: usize) {
        self.inner.borrow_mut().truncate(mark);
    }
}
