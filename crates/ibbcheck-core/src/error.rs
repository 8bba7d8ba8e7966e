//! Errors that end a run, and the exit status each maps to.

use ibbcheck_config::ConfigError;

use crate::deadline::Phase;
use crate::rendezvous::RendezvousError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("connect failed: {0}")]
    ConnectFailed(TransportError),

    #[error("stream failed: {0}")]
    Stream(TransportError),

    #[error("messaging failed: {0}")]
    Messaging(TransportError),

    #[error("timed out during {0}")]
    Timeout(Phase),

    #[error("rendezvous failed: {0}")]
    Rendezvous(#[from] RendezvousError),

    #[error("received {actual:?}, expected {expected:?}")]
    DataMismatch { expected: String, actual: String },

    #[error("peer echoed {actual:?}, expected {expected:?}")]
    EchoMismatch { expected: String, actual: String },
}

impl RunError {
    /// Process exit status for this error. Never zero.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) => 2,
            RunError::ConnectFailed(_) => 3,
            RunError::Stream(_) | RunError::Messaging(_) => 4,
            RunError::Timeout(_) => 5,
            RunError::Rendezvous(_) => 6,
            RunError::DataMismatch { .. } | RunError::EchoMismatch { .. } => 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendezvous::RendezvousSignal;

    #[test]
    fn test_exit_codes_are_nonzero_and_distinct_per_class() {
        let errors = [
            RunError::Config(ConfigError::Validation("x".into())),
            RunError::ConnectFailed(TransportError::Closed),
            RunError::Stream(TransportError::Closed),
            RunError::Timeout(Phase::Connect),
            RunError::Rendezvous(RendezvousError::NotAnnounced(RendezvousSignal::Start)),
            RunError::DataMismatch {
                expected: "a".into(),
                actual: "b".into(),
            },
        ];
        let codes: Vec<u8> = errors.iter().map(RunError::exit_code).collect();
        assert_eq!(codes, vec![2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_stream_error_carries_cause() {
        let err = RunError::Stream(TransportError::Stream("peer reset".into()));
        assert_eq!(err.to_string(), "stream failed: peer reset");
    }
}
