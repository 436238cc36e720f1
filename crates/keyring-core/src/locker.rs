//! Key locker: a re-entrant-safe loan and redemption protocol
//!
//! The locker is stateless: every balance it cares about lives in the
//! ledger, and it is layered on the registry through the ledger capability
//! plus read-only views. A loan hands keys to a destination for the duration
//! of one call and verifies *net* balance invariants across the whole nested
//! window: the destination may re-lend the same or other keys to any depth,
//! as long as the locker and the caller are whole again by unwind.

use tracing::{debug, info};

use crate::error::{KeyringError, Result};
use crate::event::{EventLog, RegistryEvent};
use crate::ledger::{InterfaceId, KeyReceiver, TokenLedger};
use crate::registry::KeyRegistry;
use crate::types::{Address, KeyId};

/// The locker protocol object
///
/// Carries only its own ledger address and the shared event log; give it the
/// same log as the registry so a rolled-back frame truncates loan events
/// along with everything else.
pub struct KeyLocker {
    address: Address,
    events: EventLog,
}

impl KeyLocker {
    pub fn new(address: Address, events: EventLog) -> Self {
        Self { address, events }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Lend `amount` units of `key` to `destination` for one call
    ///
    /// The transfer delivers `payload` through the destination's receiver
    /// hook; the hook may re-enter any registry or locker entry point,
    /// including this one. After the hook unwinds, the locker must hold at
    /// least its starting balance (`KeyNotReturned`) and the caller at least
    /// theirs (`CallerKeyStripped`). Any failure restores the pre-call
    /// balances.
    pub fn use_keys(
        &self,
        registry: &KeyRegistry,
        caller: Address,
        key: KeyId,
        amount: u64,
        destination: Address,
        payload: &[u8],
    ) -> Result<()> {
        registry.transact(|| {
            let ledger = registry.ledger();
            let start_locker = ledger.balance_of(self.address, key);
            let start_caller = ledger.balance_of(caller, key);
            if start_locker < amount {
                return Err(KeyringError::InsufficientKeys {
                    key,
                    needed: amount,
                    available: start_locker,
                });
            }
            self.require_holder_or_root(registry, caller, key)?;

            info!(%caller, %key, amount, %destination, "loan initiated");
            self.events.record(RegistryEvent::LoanInitiated {
                operator: caller,
                key,
                destination,
                amount,
            });

            ledger.transfer(self.address, self.address, destination, key, amount, payload)?;

            if ledger.balance_of(self.address, key) < start_locker {
                return Err(KeyringError::KeyNotReturned(key));
            }
            if ledger.balance_of(caller, key) < start_caller {
                return Err(KeyringError::CallerKeyStripped(key));
            }
            Ok(())
        })
    }

    /// Withdraw `amount` units of `key` to the caller, authorized by the
    /// root key of the ring `key` belongs to; the withdrawn units are not
    /// soulbound to the caller
    pub fn redeem_keys(
        &self,
        registry: &KeyRegistry,
        caller: Address,
        root_key: KeyId,
        key: KeyId,
        amount: u64,
    ) -> Result<()> {
        registry.transact(|| {
            if amount < 1 {
                return Err(KeyringError::InvalidInput(
                    "redemption amount must be at least 1".to_string(),
                ));
            }
            if !registry.is_root_key(root_key) {
                return Err(KeyringError::KeyNotRoot(root_key));
            }
            let ledger = registry.ledger();
            if ledger.balance_of(caller, root_key) == 0 {
                return Err(KeyringError::KeyNotHeld {
                    holder: caller,
                    key: root_key,
                });
            }
            let ring = registry
                .ring_of_key(root_key)
                .ok_or(KeyringError::KeyNotRoot(root_key))?;
            registry.validate_key_set(ring, &[key], true)?;

            let held = ledger.balance_of(self.address, key);
            if held < amount {
                return Err(KeyringError::InsufficientKeys {
                    key,
                    needed: amount,
                    available: held,
                });
            }

            ledger.transfer(self.address, self.address, caller, key, amount, &[])?;
            info!(%caller, %key, amount, "redemption completed");
            self.events.record(RegistryEvent::RedemptionCompleted {
                operator: caller,
                key,
                amount,
            });
            Ok(())
        })
    }

    fn require_holder_or_root(
        &self,
        registry: &KeyRegistry,
        caller: Address,
        key: KeyId,
    ) -> Result<()> {
        let ledger = registry.ledger();
        if ledger.balance_of(caller, key) > 0 {
            return Ok(());
        }
        if let Some(ring) = registry.ring_of_key(key) {
            if let Ok(root_key) = registry.root_key_of(ring) {
                if ledger.balance_of(caller, root_key) > 0 {
                    return Ok(());
                }
            }
        }
        Err(KeyringError::KeyNotHeld {
            holder: caller,
            key,
        })
    }
}

impl KeyReceiver for KeyLocker {
    /// Deposit gate: accept anything a registry-fronted ledger delivers,
    /// reject deliveries from ledgers without the registry capability
    fn on_key_received(
        &self,
        source: &dyn TokenLedger,
        operator: Address,
        from: Address,
        key: KeyId,
        amount: u64,
        _data: &[u8],
    ) -> Result<()> {
        if !source.supports(InterfaceId::KeyRegistry) {
            return Err(KeyringError::InvalidInput(
                "deposit from a ledger without the key registry capability".to_string(),
            ));
        }
        debug!(%operator, %from, %key, amount, "deposit received");
        self.events.record(RegistryEvent::DepositReceived {
            operator,
            from,
            key,
            amount,
        });
        Ok(())
    }
}
