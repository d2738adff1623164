pub mod message;
pub mod search;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use message::{ITEM_COUNT_UNSET, Request, RequestKind, Response, ResponseKind};
pub use search::{Hit, NameEntry, QueryRequest, ReindexRequest};

#[tarpc::service]
pub trait Daemon {
    /// Heartbeat
    async fn ping() -> String;

    /// Dispatch one request; asynchronous requests open a response session
    async fn execute(req: Request) -> Result<Reply, RpcError>;

    /// Long-poll the responses queued for a session, at most `max` of them.
    /// An empty batch means nothing arrived before the poll timed out.
    async fn next_responses(session_id: Uuid, max: usize) -> Result<Vec<Response>, RpcError>;

    /// Cancel the session's stream; a `Cancelled` response follows
    async fn cancel(session_id: Uuid) -> bool;

    /// Drop the session without waiting for a terminal response
    async fn close(session_id: Uuid) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// The request was fully answered in one round trip
    Synchronous(Response),

    /// Responses will be delivered through `next_responses`
    Asynchronous { session_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum RpcError {
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    #[error("daemon is shutting down")]
    ShuttingDown,
}
