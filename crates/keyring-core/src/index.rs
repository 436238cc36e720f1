//! Derived holder/key indexes and soulbound thresholds
//!
//! The two indexes mirror the ledger's balances: after every top-level call
//! commits, `key ∈ keys_of(holder) ⟺ holder ∈ holders_of(key) ⟺
//! balance(holder, key) > 0`. Mid-frame the indexes may trail the ledger;
//! the transfer guard re-synchronizes them on every balance event, at every
//! nesting depth.
//!
//! Soulbound thresholds live here too. A threshold survives the balance it
//! floors: burning a bound holder's keys leaves the bound in place until a
//! root holder explicitly resets it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{KeyringError, Result};
use crate::types::{Address, KeyId};

/// Holder/key membership indexes plus per-(holder, key) soulbound floors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyLedgerIndex {
    held_by: HashMap<Address, HashSet<KeyId>>,
    holders: HashMap<KeyId, HashSet<Address>>,
    bounds: HashMap<Address, HashMap<KeyId, u64>>,
}

impl KeyLedgerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-synchronize both indexes for one `(holder, key)` pair
    ///
    /// Must be invoked once per affected pair for every mint, burn, and
    /// transfer, including those triggered recursively.
    pub fn on_balance_changed(&mut self, holder: Address, key: KeyId, new_balance: u64) {
        if new_balance == 0 {
            if let Some(keys) = self.held_by.get_mut(&holder) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.held_by.remove(&holder);
                }
            }
            if let Some(addresses) = self.holders.get_mut(&key) {
                addresses.remove(&holder);
                if addresses.is_empty() {
                    self.holders.remove(&key);
                }
            }
        } else {
            self.held_by.entry(holder).or_default().insert(key);
            self.holders.entry(key).or_default().insert(holder);
        }
    }

    /// Unconditionally overwrite a holder's floor for a key
    pub fn set_bound(&mut self, holder: Address, key: KeyId, amount: u64) {
        if amount == 0 {
            if let Some(bounds) = self.bounds.get_mut(&holder) {
                bounds.remove(&key);
                if bounds.is_empty() {
                    self.bounds.remove(&holder);
                }
            }
        } else {
            self.bounds.entry(holder).or_default().insert(key, amount);
        }
    }

    /// Current floor for a holder/key pair (zero when unbound)
    pub fn bound(&self, holder: Address, key: KeyId) -> u64 {
        self.bounds
            .get(&holder)
            .and_then(|bounds| bounds.get(&key))
            .copied()
            .unwrap_or(0)
    }

    /// Fail if a post-transfer balance sits below the sender's floor
    ///
    /// Callers exempt the mint sentinel and privileged burns before asking.
    pub fn enforce_bound(&self, from: Address, key: KeyId, post_balance: u64) -> Result<()> {
        let bound = self.bound(from, key);
        if post_balance < bound {
            return Err(KeyringError::SoulboundTransferBreach {
                holder: from,
                key,
                bound,
            });
        }
        Ok(())
    }

    pub fn holds(&self, holder: Address, key: KeyId) -> bool {
        self.held_by
            .get(&holder)
            .is_some_and(|keys| keys.contains(&key))
    }

    /// Keys currently held by an address, in id order
    pub fn keys_of(&self, holder: Address) -> Vec<KeyId> {
        let mut keys: Vec<KeyId> = self
            .held_by
            .get(&holder)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Addresses currently holding a key, in byte order
    pub fn holders_of(&self, key: KeyId) -> Vec<Address> {
        let mut addresses: Vec<Address> = self
            .holders
            .get(&key)
            .map(|addresses| addresses.iter().copied().collect())
            .unwrap_or_default();
        addresses.sort();
        addresses
    }
}
