//! Error taxonomy for the keyring registry
//!
//! Every failure surfaced by the mutation surface is one of these ten
//! conditions; there is no generic fallback path. A failure at any nesting
//! depth propagates unchanged and unwinds the whole top-level call.

use thiserror::Error;

use crate::types::{Address, KeyId, RingId};

/// Result type alias for registry and locker operations
pub type Result<T> = std::result::Result<T, KeyringError>;

/// Errors that can occur in registry and locker operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyringError {
    /// Ring does not exist or has no minted root key
    #[error("ring {0} does not exist or has no minted root key")]
    InvalidRing(RingId),

    /// Caller does not hold the key required for the operation
    #[error("{holder} does not hold key {key}")]
    KeyNotHeld { holder: Address, key: KeyId },

    /// Key is not the root key of its ring
    #[error("key {0} is not a root key")]
    KeyNotRoot(KeyId),

    /// Key is not a member of the ring
    #[error("key {key} is not a member of ring {ring}")]
    InvalidRingKey { ring: RingId, key: KeyId },

    /// A key in the presented set is unknown, disallowed, or off-ring
    #[error("key set is not valid for ring {0}")]
    InvalidRingKeySet(RingId),

    /// Transfer would leave the sender below its soulbound floor
    #[error("transfer would leave {holder} below the soulbound floor of {bound} for key {key}")]
    SoulboundTransferBreach {
        holder: Address,
        key: KeyId,
        bound: u64,
    },

    /// Balance is too small for the requested movement
    #[error("insufficient balance of key {key}: needed {needed}, available {available}")]
    InsufficientKeys {
        key: KeyId,
        needed: u64,
        available: u64,
    },

    /// A borrowed key was not fully returned to the locker by unwind
    #[error("key {0} was not fully returned to the locker")]
    KeyNotReturned(KeyId),

    /// The caller's own balance regressed during a loan window
    #[error("caller's balance of key {0} was diminished during the loan")]
    CallerKeyStripped(KeyId),

    /// Malformed or unacceptable input
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
