//! Fuzz target for the DNS response decoder.
//!
//! ```bash
//! cargo +nightly fuzz run decode_message
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use srv_locate::dns::wire::decode_message;

fuzz_target!(|data: &[u8]| {
    // must never panic, whatever the input
    if let Ok(message) = decode_message(data) {
        for entry in message.answers.iter().chain(&message.additional) {
            assert!(entry.name().len() <= 255);
        }
    }
});
