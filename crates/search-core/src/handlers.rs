// search-core/src/handlers.rs
//! Built-in synchronous request handlers

use async_trait::async_trait;
use rpc::{Request, RequestKind, Response};
use tracing::{info, warn};

use crate::context::DaemonContext;
use crate::dispatch::{Execution, RequestHandler, ResponseSink, expect_kind};
use crate::error::DispatchError;

/// Answers `DumpNameIndex` with every name index entry.
pub struct NameIndexDumper {
    context: DaemonContext,
}

impl NameIndexDumper {
    pub fn new(context: DaemonContext) -> Self {
        Self { context }
    }

    pub fn factory(context: &DaemonContext) -> Box<dyn RequestHandler> {
        Box::new(Self::new(context.clone()))
    }
}

#[async_trait]
impl RequestHandler for NameIndexDumper {
    async fn execute(&mut self, request: Request, _sink: ResponseSink) -> Result<Execution, DispatchError> {
        expect_kind(&request, RequestKind::DumpNameIndex)?;
        let entries = self.context.name_index.dump();
        Ok(Execution::Synchronous(Response::NameIndex(entries)))
    }

    fn cleanup(&mut self) {}
}

/// Rescans name index roots and acknowledges the number of entries seen.
pub struct ReindexExecutor {
    context: DaemonContext,
}

impl ReindexExecutor {
    pub fn new(context: DaemonContext) -> Self {
        Self { context }
    }

    pub fn factory(context: &DaemonContext) -> Box<dyn RequestHandler> {
        Box::new(Self::new(context.clone()))
    }
}

#[async_trait]
impl RequestHandler for ReindexExecutor {
    async fn execute(&mut self, request: Request, _sink: ResponseSink) -> Result<Execution, DispatchError> {
        let got = request.kind();
        let Request::Reindex(reindex) = request else {
            return Err(DispatchError::UnexpectedRequest {
                expected: RequestKind::Reindex,
                got,
            });
        };

        let index = self.context.name_index.clone();
        let guard = self.context.shutdown.worker("reindex");
        let count = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            index.rescan(&reindex.paths)
        })
        .await
        .map_err(|e| DispatchError::Handler(format!("reindex task failed: {e}")))?;

        info!("Reindex finished: {} entries", count);
        Ok(Execution::Synchronous(Response::acknowledge(count)))
    }

    fn cleanup(&mut self) {}
}

/// Starts a coordinated shutdown and acknowledges right away.
pub struct ShutdownExecutor {
    context: DaemonContext,
}

impl ShutdownExecutor {
    pub fn new(context: DaemonContext) -> Self {
        Self { context }
    }

    pub fn factory(context: &DaemonContext) -> Box<dyn RequestHandler> {
        Box::new(Self::new(context.clone()))
    }
}

#[async_trait]
impl RequestHandler for ShutdownExecutor {
    async fn execute(&mut self, request: Request, _sink: ResponseSink) -> Result<Execution, DispatchError> {
        expect_kind(&request, RequestKind::Shutdown)?;

        if self.context.shutdown.shutdown_requested() {
            warn!("Shutdown already in progress");
        } else {
            // Blocks until every worker has ended.
            let shutdown = self.context.shutdown.clone();
            tokio::task::spawn_blocking(move || shutdown.begin_shutdown());
        }
        Ok(Execution::Synchronous(Response::acknowledge_unset()))
    }

    fn cleanup(&mut self) {}
}
