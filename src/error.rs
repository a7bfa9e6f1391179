use std::io;

use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Failure of a single adapter invocation.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Request body could not be serialized.
    #[error("error marshaling request body: {0}")]
    Marshal(String),

    /// Connect, send or receive failed.
    #[error("error making request: {0}")]
    Transport(String),

    /// The server answered with a status the adapter was not told to expect.
    #[error("unexpected status {actual} (expected {expected})")]
    UnexpectedStatus { expected: u16, actual: u16 },

    /// The response body could not be read or decompressed.
    #[error("error reading body: {0}")]
    Body(String),

    /// Content-Encoding the adapter does not know how to decode.
    #[error("unsupported content encoding '{0}'")]
    UnsupportedEncoding(String),

    /// The input did not deserialize into the target schema.
    #[error("error unmarshaling: {0}")]
    Decode(String),
}

/// Errors that abort a benchmark case or the whole run.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Rejected while constructing a case, adapter or client.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A fixture failed to come up; no sample was recorded.
    #[error("fixture setup failed ({fixture}): {reason}")]
    Setup { fixture: String, reason: String },

    /// An invocation failed before the measured window opened.
    #[error("case '{case}' failed during warm-up iteration {iteration}: {source}")]
    Warmup {
        case: String,
        iteration: u64,
        #[source]
        source: OperationError,
    },

    /// An invocation failed inside the measured window; the case is void.
    #[error(
        "case '{case}' failed at iteration {iteration} on worker {worker} \
         after {completed} samples: {source}"
    )]
    Invocation {
        case: String,
        iteration: u64,
        worker: usize,
        completed: usize,
        #[source]
        source: OperationError,
    },

    /// A fixture did not shut down cleanly.
    #[error("fixture teardown failed ({fixture}): {reason}")]
    Teardown { fixture: String, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BenchError {
    /// Iteration index of the failing invocation, if this error came from one.
    pub fn iteration(&self) -> Option<u64> {
        match self {
            BenchError::Warmup { iteration, .. } | BenchError::Invocation { iteration, .. } => {
                Some(*iteration)
            }
            _ => None,
        }
    }
}
