//! Integration tests for the ibbcheck-macros derive macros.
//!
//! These live in ibbcheck-core because proc-macro crates can't have
//! integration tests that use their own macros.

#![allow(dead_code)]

use ibbcheck_macros::{Redact, SecureZeroize, Validate};
use pretty_assertions::assert_eq;

// ── Redact ────────────────────────────────────────────────────────

#[derive(Redact)]
struct Account {
    pub jid: String,
    #[redact]
    pub password: String,
}

#[test]
fn test_redact_debug_output() {
    let account = Account {
        jid: "tester@localhost".to_string(),
        password: "s3cret".to_string(),
    };

    let debug = format!("{account:?}");
    assert!(debug.contains("tester@localhost"), "jid should be visible");
    assert!(!debug.contains("s3cret"), "password leaked: {debug}");
    assert!(debug.contains("[REDACTED]"));
}

#[derive(Redact)]
struct Plain {
    pub name: String,
    pub value: i32,
}

#[test]
fn test_redact_without_marked_fields() {
    let debug = format!(
        "{:?}",
        Plain {
            name: "test".to_string(),
            value: 42,
        }
    );
    assert!(debug.contains("test"));
    assert!(debug.contains("42"));
    assert!(!debug.contains("[REDACTED]"));
}

// ── Validate ──────────────────────────────────────────────────────

#[derive(Validate)]
struct Client {
    #[validate(non_empty, max_len = 16)]
    pub jid: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    #[validate(range(min = 1))]
    pub block_size: u32,
    #[validate(one_of("warn", "debug"))]
    pub level: String,
}

fn client() -> Client {
    Client {
        jid: "a@b".to_string(),
        port: 5222,
        block_size: 4096,
        level: "warn".to_string(),
    }
}

#[test]
fn test_validate_all_valid() {
    assert!(client().validate().is_ok());
}

#[test]
fn test_validate_collects_every_violation_in_field_order() {
    let config = Client {
        jid: String::new(),
        port: 0,
        block_size: 0,
        level: "loud".to_string(),
    };
    let errors = config.validate().unwrap_err();
    assert_eq!(
        errors,
        vec![
            "jid: must not be empty".to_string(),
            "port: must be at least 1".to_string(),
            "block_size: must be at least 1".to_string(),
            r#"level: must be one of ["warn", "debug"], got "loud""#.to_string(),
        ]
    );
}

#[test]
fn test_validate_max_len() {
    let config = Client {
        jid: "x".repeat(17),
        ..client()
    };
    assert_eq!(
        config.validate().unwrap_err(),
        vec!["jid: length must be at most 16".to_string()]
    );
}

#[derive(Validate)]
struct Limits {
    #[validate(range(max = 86400))]
    pub deadline_secs: u64,
}

#[test]
fn test_validate_range_on_wide_unsigned() {
    let limits = Limits {
        deadline_secs: u64::MAX,
    };
    assert_eq!(
        limits.validate().unwrap_err(),
        vec!["deadline_secs: must be at most 86400".to_string()]
    );
    assert!(Limits { deadline_secs: 86400 }.validate().is_ok());
}

// ── SecureZeroize ─────────────────────────────────────────────────

#[derive(SecureZeroize)]
struct Secret {
    pub key: Vec<u8>,
    #[no_zeroize]
    pub label: String,
}

#[test]
fn test_secure_zeroize_drops_cleanly() {
    let secret = Secret {
        key: vec![1, 2, 3],
        label: "session".to_string(),
    };
    assert_eq!(secret.label, "session");
    drop(secret);
}

#[test]
fn test_secure_zeroize_composes_with_redact() {
    #[derive(Redact, SecureZeroize)]
    struct Login {
        #[no_zeroize]
        jid: String,
        #[redact]
        password: String,
    }

    let login = Login {
        jid: "tester@localhost".to_string(),
        password: "hunter2".to_string(),
    };
    let debug = format!("{login:?}");
    assert!(debug.contains("tester@localhost"));
    assert!(!debug.contains("hunter2"));
}
