#![deny(unsafe_code)]

//! Shared test utilities for the ibbcheck workspace.
//!
//! Provides config builders, a loopback harness backed by a temporary config
//! file, and tracing helpers so that individual crate tests stay concise.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! ibbcheck-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod harness;
pub mod tracing_setup;
