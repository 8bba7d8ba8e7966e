//! Fuzz target for JID parsing.
//!
//! Run with: cargo +nightly fuzz run fuzz_jid_parser
//!
//! Any JID that parses must print back to something that parses to the same
//! JID, and its bare form must match it.

#![no_main]

use ibbcheck_config::Jid;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(jid) = Jid::parse(s) {
        let reparsed = Jid::parse(&jid.to_string()).expect("display output parses");
        assert_eq!(jid, reparsed);
        assert!(jid.bare().matches(&jid));
    }
});
