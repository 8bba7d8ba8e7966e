//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text to `HarnessConfig::parse()` and validates whatever
//! parses, looking for panics in parsing, JID checks or derived validation.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = ibbcheck_config::HarnessConfig::parse(s) {
            let _ = config.validate();
            let _ = config.client_jid();
        }
    }
});
