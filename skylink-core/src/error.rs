//! Pipeline error taxonomy.

use crate::cipher::CipherError;
use crate::codec::EncodeError;
use crate::geofence::GeometryError;
use crate::pipeline::RunId;

/// Why a received or decoded payload could not be accepted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerificationFailure {
    #[error("payload is {got} bits, layout expects {expected}")]
    WidthMismatch { expected: usize, got: usize },
    #[error("{field} field decodes to {value}, outside the valid range")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("echoed payload is not a valid field triple: {0}")]
    MalformedEcho(String),
    #[error("server echoed {echoed:?}, but {sent:?} was sent")]
    EchoMismatch { sent: String, echoed: String },
    #[error("decrypted payload does not match the local plaintext")]
    PlaintextMismatch,
}

/// Terminal failure of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),
    #[error("encoding overflow: {0}")]
    EncodingOverflow(#[from] EncodeError),
    #[error("configuration error: {0}")]
    Configuration(#[from] CipherError),
    #[error("insecure key: error rate {error_rate} is not below {threshold}")]
    Security { error_rate: f64, threshold: f64 },
    #[error("transport error (retryable: {retryable}): {reason}")]
    Transport { retryable: bool, reason: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("verification failure: {0}")]
    Verification(#[from] VerificationFailure),
    #[error("run cancelled")]
    Cancelled,
    #[error("run {run} superseded by run {latest}")]
    Stale { run: RunId, latest: RunId },
}

impl PipelineError {
    /// Whether the caller may retry by starting a fresh run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transport { retryable: true, .. })
    }
}
