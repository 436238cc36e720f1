//! Keyring Core - Ring/key access-control registry with a re-entrant loan protocol
//!
//! This crate implements a permission registry organized as independently
//! owned *rings* of *keys*. A ring's root key grants its holder unilateral
//! authority over every other key on the ring: minting, copying,
//! soulbinding, and burning. Balances live in an injected [`TokenLedger`]
//! capability whose mutations deliver synchronous recipient hooks, so every
//! operation stays correct under unbounded re-entrant call nesting. The
//! [`KeyLocker`] lends keys out for the duration of a single call and
//! verifies net balance invariants across the whole nested window.

pub mod error;
pub mod event;
pub mod identity;
pub mod index;
pub mod ledger;
pub mod locker;
pub mod metadata;
pub mod registry;
pub mod ring;
pub mod types;

pub use error::{KeyringError, Result};
pub use event::{EventLog, RegistryEvent};
pub use identity::IdentitySpace;
pub use index::KeyLedgerIndex;
pub use ledger::{
    CheckpointId, InterfaceId, KeyReceiver, MemoryLedger, TokenLedger, TransferGuard,
};
pub use locker::KeyLocker;
pub use metadata::{KeyMetadata, MetadataStore};
pub use registry::{KeyInfo, KeyRegistry};
pub use ring::{Ring, RingRegistry};
pub use types::{Address, KeyId, RingId};
