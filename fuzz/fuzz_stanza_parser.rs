//! Fuzz target for the message stanza parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_stanza_parser
//!
//! Parsed messages are serialized and parsed again; the rendezvous marker and
//! body must survive.

#![no_main]

use ibbcheck_core::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(message) = Message::from_xml(s) {
        let again = Message::from_xml(&message.to_xml()).expect("serialized message parses");
        assert_eq!(message.signal, again.signal);
        assert_eq!(message.body, again.body);
    }
});
