//! One overall deadline per run.
//!
//! The deadline is fixed when the run starts and every suspension point is
//! wrapped with it, so a silent peer fails the run instead of hanging it.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

use crate::error::RunError;

/// Where a run was suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Connect,
    AwaitStart,
    AwaitOffer,
    OpenStream,
    Transfer,
    AwaitClose,
    SendMessage,
    AwaitEcho,
    /// Anywhere else inside a scenario.
    Scenario,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Connect => "connect",
            Phase::AwaitStart => "await start signal",
            Phase::AwaitOffer => "await stream offer",
            Phase::OpenStream => "open stream",
            Phase::Transfer => "transfer",
            Phase::AwaitClose => "await stream close",
            Phase::SendMessage => "send message",
            Phase::AwaitEcho => "await echo",
            Phase::Scenario => "scenario",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline `limit` from now, or none. A limit too far out to be
    /// represented means no deadline.
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            at: limit.and_then(|d| Instant::now().checked_add(d)),
        }
    }

    pub fn none() -> Self {
        Self { at: None }
    }

    /// Time left, saturating at zero. `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Await `fut`, failing with [`RunError::Timeout`] once the deadline
    /// passes.
    pub async fn run<F: Future>(&self, phase: Phase, fut: F) -> Result<F::Output, RunError> {
        let Some(at) = self.at else {
            return Ok(fut.await);
        };
        tokio::time::timeout_at(at, fut).await.map_err(|_| {
            warn!(%phase, "run deadline expired");
            RunError::Timeout(phase)
        })
    }
}
