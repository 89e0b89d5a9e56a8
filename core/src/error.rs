use thiserror::Error;

use crate::run::RunState;

/// Malformed request, rejected before any Run exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("no tools supplied")]
    NoTools,

    #[error("invalid script path: {0:?}")]
    InvalidPath(String),

    #[error("client is closed")]
    ClientClosed,
}

/// A decision that does not match a pending confirmation or prompt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("no pending request with id {id}")]
    Unknown { id: String },

    #[error("request {id} is a {pending}, not a {got}")]
    KindMismatch {
        id: String,
        pending: &'static str,
        got: &'static str,
    },
}

/// An operation invoked in a state that does not allow it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("next_chat requires a run in Continue state, run is {state:?}")]
    NotContinuable { state: RunState },
}

/// Failure of a `Run::text()` wait.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("run aborted")]
    Aborted,
}

/// Failure reported by, or while talking to, the engine session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine transport error: {0}")]
    Transport(String),

    #[error("engine rejected request: status={status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("engine response decode error: {0}")]
    Decode(String),

    #[error("engine session closed")]
    Closed,
}

/// Umbrella error for `Client` and `Run` calls that fail synchronously.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to start events_out writer")]
    EventsOut(#[source] std::io::Error),
}
