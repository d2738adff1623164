// search-core/src/error.rs
//! Error types

use rpc::RequestKind;

/// Dispatch failures, surfaced to the transport as a rejected request
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler available for {0} requests")]
    NoHandler(RequestKind),

    #[error("two handlers registered for {0} requests")]
    DuplicateHandler(RequestKind),

    #[error("handler for {expected} requests received a {got} request")]
    UnexpectedRequest { expected: RequestKind, got: RequestKind },

    #[error("{0}")]
    Handler(String),
}

/// A single backend failing mid-evaluation; never aborts the whole query
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
