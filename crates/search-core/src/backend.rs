// search-core/src/backend.rs
//! Queryable backends and their change notifications

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rpc::QueryRequest;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::BackendError;
use crate::result_stream::ResultStream;

/// Position of a backend in the driver registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendId(pub(crate) usize);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend#{}", self.0)
    }
}

/// What changed in a backend's corpus, by document URI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeData {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeData {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub backend: BackendId,
    pub data: Arc<ChangeData>,
}

/// Handed to a backend at registration so it can report corpus changes.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    backend: BackendId,
    sender: broadcast::Sender<ChangeNotification>,
}

impl ChangeNotifier {
    pub(crate) fn new(backend: BackendId, sender: broadcast::Sender<ChangeNotification>) -> Self {
        Self { backend, sender }
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    /// Broadcasts a change to every live session. Returns how many
    /// subscribers received it.
    pub fn notify(&self, data: ChangeData) -> usize {
        if data.is_empty() {
            return 0;
        }
        let notification = ChangeNotification {
            backend: self.backend,
            data: Arc::new(data),
        };
        // No subscribers just means no query is running.
        let delivered = self.sender.send(notification).unwrap_or(0);
        trace!("{} change delivered to {} subscriber(s)", self.backend, delivered);
        delivered
    }
}

/// One independently changing source of searchable content.
#[async_trait]
pub trait Queryable: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this backend wants to see the query at all.
    fn accepts(&self, _query: &QueryRequest) -> bool {
        true
    }

    /// Called once when the backend is registered with the driver.
    fn attach(&self, _notifier: ChangeNotifier) {}

    /// Feeds matches for `query` into `stream`. With `change` set, only the
    /// documents named by the change are considered.
    async fn evaluate(
        &self,
        query: &QueryRequest,
        stream: &ResultStream,
        change: Option<&ChangeData>,
    ) -> Result<(), BackendError>;
}
