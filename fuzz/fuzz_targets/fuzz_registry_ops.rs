#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use keyring_core::{Address, EventLog, KeyId, KeyRegistry};

#[derive(Debug, Arbitrary)]
enum Op {
    CreateRing { actor: u8 },
    CreateKey { actor: u8, root: u8, receiver: u8, bind: bool },
    CopyKey { actor: u8, root: u8, key: u8, receiver: u8, bind: bool },
    Soulbind { actor: u8, root: u8, key: u8, holder: u8, amount: u8 },
    Burn { actor: u8, root: u8, key: u8, holder: u8, amount: u8 },
    Transfer { from: u8, to: u8, key: u8, amount: u8 },
}

fn address(byte: u8) -> Address {
    Address::new([byte % 8 + 1; 32])
}

fn resolve_key(registry: &KeyRegistry, hint: u8) -> Option<KeyId> {
    let count = registry.key_count();
    if count == 0 {
        None
    } else {
        Some(KeyId::new(u64::from(hint) % count))
    }
}

fuzz_target!(|ops: Vec<Op>| {
    if ops.len() > 64 {
        return;
    }

    let (registry, ledger) = KeyRegistry::with_memory_ledger(EventLog::new());

    for op in &ops {
        // failed calls are fine; they must just unwind without a panic
        match *op {
            Op::CreateRing { actor } => {
                let _ =
                    registry.create_key_ring(address(actor), "ring", "root", "", address(actor));
            }
            Op::CreateKey {
                actor,
                root,
                receiver,
                bind,
            } => {
                if let Some(root) = resolve_key(&registry, root) {
                    let _ =
                        registry.create_key(address(actor), root, "key", "", address(receiver), bind);
                }
            }
            Op::CopyKey {
                actor,
                root,
                key,
                receiver,
                bind,
            } => {
                if let (Some(root), Some(key)) =
                    (resolve_key(&registry, root), resolve_key(&registry, key))
                {
                    let _ = registry.copy_key(address(actor), root, key, address(receiver), bind);
                }
            }
            Op::Soulbind {
                actor,
                root,
                key,
                holder,
                amount,
            } => {
                if let (Some(root), Some(key)) =
                    (resolve_key(&registry, root), resolve_key(&registry, key))
                {
                    let _ = registry.soulbind_key(
                        address(actor),
                        root,
                        address(holder),
                        key,
                        u64::from(amount),
                    );
                }
            }
            Op::Burn {
                actor,
                root,
                key,
                holder,
                amount,
            } => {
                if let (Some(root), Some(key)) =
                    (resolve_key(&registry, root), resolve_key(&registry, key))
                {
                    let _ = registry.burn_key(
                        address(actor),
                        root,
                        key,
                        address(holder),
                        u64::from(amount),
                    );
                }
            }
            Op::Transfer {
                from,
                to,
                key,
                amount,
            } => {
                if let Some(key) = resolve_key(&registry, key) {
                    let _ = ledger.transfer(
                        address(from),
                        address(from),
                        address(to),
                        key,
                        u64::from(amount),
                        &[],
                    );
                }
            }
        }

        // invariants after every committed or unwound call
        for id in 0..registry.key_count() {
            let key = KeyId::new(id);
            let mut outstanding = 0u64;
            for byte in 1..=8u8 {
                let holder = Address::new([byte; 32]);
                let balance = ledger.balance_of(holder, key);
                outstanding += balance;
                assert_eq!(registry.keys_of(holder).contains(&key), balance > 0);
                assert_eq!(registry.holders_of(key).contains(&holder), balance > 0);
            }
            assert_eq!(registry.supply_of(key), outstanding);

            let ring = registry.ring_of_key(key).expect("key without a ring");
            assert!(registry.ring_members(ring).unwrap().contains(&key));
        }
    }
});
