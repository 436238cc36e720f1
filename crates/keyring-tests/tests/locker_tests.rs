//! Key locker loan and redemption tests
//!
//! The loan protocol promises a *net* guarantee: whatever the destination
//! does inside the call window (return the keys, re-lend them, re-enter the
//! registry), the locker and the caller must be whole again by unwind, or
//! the whole call rolls back.

use std::cell::Cell;
use std::rc::Rc;

use keyring_core::{
    Address, EventLog, KeyId, KeyLocker, KeyReceiver, KeyRegistry, KeyringError, MemoryLedger,
    RegistryEvent, Result, TokenLedger,
};

fn holder(byte: u8) -> Address {
    Address::new([byte; 32])
}

struct World {
    registry: Rc<KeyRegistry>,
    ledger: Rc<MemoryLedger>,
    locker: Rc<KeyLocker>,
    events: EventLog,
}

fn world() -> World {
    let events = EventLog::new();
    let (registry, ledger) = KeyRegistry::with_memory_ledger(events.clone());
    let locker = Rc::new(KeyLocker::new(holder(0xF0), events.clone()));
    ledger.register_receiver(locker.address(), locker.clone());
    World {
        registry,
        ledger,
        locker,
        events,
    }
}

/// Creates a ring, grants `caller` a member key, and stocks the locker
fn stocked(w: &World, admin: Address, caller: Address, stock: u64) -> (KeyId, KeyId) {
    let (_, root_key) = w
        .registry
        .create_key_ring(admin, "ops", "ops root", "", admin)
        .unwrap();
    let key = w
        .registry
        .create_key(admin, root_key, "deploy", "", caller, false)
        .unwrap();
    for _ in 0..stock {
        w.registry
            .copy_key(admin, root_key, key, w.locker.address(), false)
            .unwrap();
    }
    (root_key, key)
}

/// Returns every borrowed unit straight back to the locker
struct ReturningBorrower {
    address: Address,
    locker_address: Address,
    payloads: std::cell::RefCell<Vec<Vec<u8>>>,
}

impl KeyReceiver for ReturningBorrower {
    fn on_key_received(
        &self,
        source: &dyn TokenLedger,
        _operator: Address,
        _from: Address,
        key: KeyId,
        amount: u64,
        data: &[u8],
    ) -> Result<()> {
        self.payloads.borrow_mut().push(data.to_vec());
        source.transfer(self.address, self.address, self.locker_address, key, amount, &[])
    }
}

/// Keeps one unit and returns the rest
struct PartialReturner {
    address: Address,
    locker_address: Address,
}

impl KeyReceiver for PartialReturner {
    fn on_key_received(
        &self,
        source: &dyn TokenLedger,
        _operator: Address,
        _from: Address,
        key: KeyId,
        amount: u64,
        _data: &[u8],
    ) -> Result<()> {
        source.transfer(
            self.address,
            self.address,
            self.locker_address,
            key,
            amount.saturating_sub(1),
            &[],
        )
    }
}

#[test]
fn test_loan_round_trip() {
    let w = world();
    let admin = holder(1);
    let caller = holder(2);
    let borrower_address = holder(0xB0);

    let (_, key) = stocked(&w, admin, caller, 1);
    let borrower = Rc::new(ReturningBorrower {
        address: borrower_address,
        locker_address: w.locker.address(),
        payloads: std::cell::RefCell::new(Vec::new()),
    });
    w.ledger.register_receiver(borrower_address, borrower.clone());

    w.locker
        .use_keys(&w.registry, caller, key, 1, borrower_address, b"do the thing")
        .unwrap();

    // net zero for locker and caller; payload reached the destination
    assert_eq!(w.ledger.balance_of(w.locker.address(), key), 1);
    assert_eq!(w.ledger.balance_of(caller, key), 1);
    assert_eq!(w.ledger.balance_of(borrower_address, key), 0);
    assert_eq!(borrower.payloads.borrow().as_slice(), &[b"do the thing".to_vec()]);
    assert!(w
        .events
        .events()
        .iter()
        .any(|event| matches!(event, RegistryEvent::LoanInitiated { .. })));
}

#[test]
fn test_partial_return_fails_and_restores_locker() {
    let w = world();
    let admin = holder(1);
    let caller = holder(2);
    let borrower_address = holder(0xB1);

    let (_, key) = stocked(&w, admin, caller, 2);
    w.ledger.register_receiver(
        borrower_address,
        Rc::new(PartialReturner {
            address: borrower_address,
            locker_address: w.locker.address(),
        }),
    );

    let result = w
        .locker
        .use_keys(&w.registry, caller, key, 2, borrower_address, &[]);
    assert!(matches!(result, Err(KeyringError::KeyNotReturned(_))));

    // the locker's balance is unchanged from before the call
    assert_eq!(w.ledger.balance_of(w.locker.address(), key), 2);
    assert_eq!(w.ledger.balance_of(borrower_address, key), 0);
    // and the failed loan recorded no events
    assert!(!w
        .events
        .events()
        .iter()
        .any(|event| matches!(event, RegistryEvent::LoanInitiated { .. })));
}

/// Re-lends the borrowed key deeper before returning its own unit
struct RelendingBorrower {
    registry: Rc<KeyRegistry>,
    locker: Rc<KeyLocker>,
    address: Address,
    next_destination: Address,
    relent: Cell<bool>,
}

impl KeyReceiver for RelendingBorrower {
    fn on_key_received(
        &self,
        source: &dyn TokenLedger,
        _operator: Address,
        _from: Address,
        key: KeyId,
        amount: u64,
        _data: &[u8],
    ) -> Result<()> {
        if !self.relent.replace(true) {
            // holding the borrowed unit is standing enough to borrow again
            self.locker.use_keys(
                &self.registry,
                self.address,
                key,
                1,
                self.next_destination,
                &[],
            )?;
        }
        source.transfer(self.address, self.address, self.locker.address(), key, amount, &[])
    }
}

#[test]
fn test_nested_re_lending_of_the_same_key() {
    let w = world();
    let admin = holder(1);
    let caller = holder(2);
    let first = holder(0xB2);
    let second = holder(0xB3);

    let (_, key) = stocked(&w, admin, caller, 2);
    w.ledger.register_receiver(
        first,
        Rc::new(RelendingBorrower {
            registry: w.registry.clone(),
            locker: w.locker.clone(),
            address: first,
            next_destination: second,
            relent: Cell::new(false),
        }),
    );
    w.ledger.register_receiver(
        second,
        Rc::new(ReturningBorrower {
            address: second,
            locker_address: w.locker.address(),
            payloads: std::cell::RefCell::new(Vec::new()),
        }),
    );

    w.locker
        .use_keys(&w.registry, caller, key, 1, first, &[])
        .unwrap();

    assert_eq!(w.ledger.balance_of(w.locker.address(), key), 2);
    assert_eq!(w.ledger.balance_of(first, key), 0);
    assert_eq!(w.ledger.balance_of(second, key), 0);

    // both loans committed
    let loans = w
        .events
        .events()
        .iter()
        .filter(|event| matches!(event, RegistryEvent::LoanInitiated { .. }))
        .count();
    assert_eq!(loans, 2);
}

/// Returns the borrowed unit but robs the caller during the window
struct CallerStripper {
    address: Address,
    locker_address: Address,
    caller: Address,
    stripped: Cell<bool>,
}

impl KeyReceiver for CallerStripper {
    fn on_key_received(
        &self,
        source: &dyn TokenLedger,
        _operator: Address,
        _from: Address,
        key: KeyId,
        amount: u64,
        _data: &[u8],
    ) -> Result<()> {
        if self.stripped.replace(true) {
            return Ok(());
        }
        source.transfer(self.address, self.address, self.locker_address, key, amount, &[])?;
        // the reference ledger leaves operator authority to the substrate,
        // so the stripper can move the caller's unit to itself
        source.transfer(self.address, self.caller, self.address, key, 1, &[])
    }
}

#[test]
fn test_caller_stripping_fails_and_restores_caller() {
    let w = world();
    let admin = holder(1);
    let caller = holder(2);
    let stripper_address = holder(0xB4);

    let (_, key) = stocked(&w, admin, caller, 1);
    w.ledger.register_receiver(
        stripper_address,
        Rc::new(CallerStripper {
            address: stripper_address,
            locker_address: w.locker.address(),
            caller,
            stripped: Cell::new(false),
        }),
    );

    let result = w
        .locker
        .use_keys(&w.registry, caller, key, 1, stripper_address, &[]);
    assert!(matches!(result, Err(KeyringError::CallerKeyStripped(_))));

    assert_eq!(w.ledger.balance_of(caller, key), 1);
    assert_eq!(w.ledger.balance_of(stripper_address, key), 0);
    assert_eq!(w.ledger.balance_of(w.locker.address(), key), 1);
}

#[test]
fn test_root_holder_may_borrow_unheld_keys() {
    let w = world();
    let admin = holder(1);
    let caller = holder(2);
    let borrower_address = holder(0xB5);

    let (_root_key, key) = stocked(&w, admin, caller, 1);
    w.ledger.register_receiver(
        borrower_address,
        Rc::new(ReturningBorrower {
            address: borrower_address,
            locker_address: w.locker.address(),
            payloads: std::cell::RefCell::new(Vec::new()),
        }),
    );

    // admin holds the ring's root but no unit of `key`
    assert_eq!(w.ledger.balance_of(admin, key), 0);
    w.locker
        .use_keys(&w.registry, admin, key, 1, borrower_address, &[])
        .unwrap();
    assert_eq!(w.ledger.balance_of(w.locker.address(), key), 1);
}

#[test]
fn test_redemption_yields_unbound_units() {
    let w = world();
    let admin = holder(1);
    let caller = holder(2);

    let (root_key, key) = stocked(&w, admin, caller, 2);

    w.locker
        .redeem_keys(&w.registry, admin, root_key, key, 2)
        .unwrap();

    assert_eq!(w.ledger.balance_of(w.locker.address(), key), 0);
    assert_eq!(w.ledger.balance_of(admin, key), 2);
    assert_eq!(w.registry.bound_of(admin, key), 0);
    assert!(w
        .events
        .events()
        .iter()
        .any(|event| matches!(event, RegistryEvent::RedemptionCompleted { .. })));
}

#[test]
fn test_redemption_rejects_off_ring_keys() {
    let w = world();
    let admin = holder(1);
    let other = holder(2);

    let (root_key, _key) = stocked(&w, admin, admin, 1);
    let (_, other_root) = w
        .registry
        .create_key_ring(other, "other", "other root", "", other)
        .unwrap();

    // admin's root has no claim over the other ring's root key
    let result = w
        .locker
        .redeem_keys(&w.registry, admin, root_key, other_root, 1);
    assert!(matches!(result, Err(KeyringError::InvalidRingKeySet(_))));
}

#[test]
fn test_redemption_rejects_overdraw() {
    let w = world();
    let admin = holder(1);

    let (root_key, key) = stocked(&w, admin, admin, 1);
    let result = w.locker.redeem_keys(&w.registry, admin, root_key, key, 2);
    assert!(matches!(result, Err(KeyringError::InsufficientKeys { .. })));
    assert_eq!(w.ledger.balance_of(w.locker.address(), key), 1);
}

#[test]
fn test_direct_deposits_are_accepted_and_recorded() {
    let w = world();
    let admin = holder(1);
    let caller = holder(2);

    let (_, key) = stocked(&w, admin, caller, 0);
    w.ledger
        .transfer(caller, caller, w.locker.address(), key, 1, &[])
        .unwrap();

    assert_eq!(w.ledger.balance_of(w.locker.address(), key), 1);
    assert!(w
        .events
        .events()
        .iter()
        .any(|event| matches!(
            event,
            RegistryEvent::DepositReceived { from, .. } if *from == caller
        )));
}
