#![no_main]

use libfuzzer_sys::fuzz_target;

use keyring_core::Address;

fuzz_target!(|data: &[u8]| {
    // Parsing arbitrary text must never panic
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(address) = Address::from_hex(text) {
            // Round-trip
            let reencoded = address.to_hex();
            let recovered = Address::from_hex(&reencoded).unwrap();
            assert_eq!(address, recovered);

            // Display forms are total
            let _ = address.short();
            let _ = format!("{address}");
        }
    }

    // Raw 32-byte inputs map onto addresses directly
    if data.len() >= 32 {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&data[..32]);
        let address = Address::new(bytes);
        assert_eq!(Address::from_hex(&address.to_hex()), Ok(address));
    }
});
