use serde::{Deserialize, Serialize};
use strum::{Display, EnumDiscriminants};

use crate::search::{Hit, NameEntry, QueryRequest, ReindexRequest};

/// Item count carried by an acknowledgment that did not set one
pub const ITEM_COUNT_UNSET: i64 = -1;

/// Inbound protocol message, dispatched by its [`RequestKind`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(RequestKind), derive(Hash, Display, Serialize, Deserialize))]
pub enum Request {
    Query(QueryRequest),
    DumpNameIndex,
    Reindex(ReindexRequest),
    Shutdown,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        RequestKind::from(self)
    }
}

/// Outbound protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(ResponseKind), derive(Hash, Display, Serialize, Deserialize))]
pub enum Response {
    HitsAdded { hits: Vec<Hit> },
    HitsSubtracted { uris: Vec<String> },
    Finished,
    Cancelled,
    IndexerAcknowledgment { item_count: i64 },
    NameIndex(Vec<NameEntry>),
}

impl Response {
    pub fn kind(&self) -> ResponseKind {
        ResponseKind::from(self)
    }

    /// `Finished` and `Cancelled` end an asynchronous stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Response::Finished | Response::Cancelled)
    }

    pub fn acknowledge(item_count: usize) -> Self {
        Response::IndexerAcknowledgment {
            item_count: i64::try_from(item_count).unwrap_or(i64::MAX),
        }
    }

    pub fn acknowledge_unset() -> Self {
        Response::IndexerAcknowledgment {
            item_count: ITEM_COUNT_UNSET,
        }
    }
}
