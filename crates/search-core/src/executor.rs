// search-core/src/executor.rs
//! Query execution session
//!
//! Binds one `Query` request to one result stream and one change-feed
//! subscription, translating stream events into responses. A change reported
//! by a backend re-runs the query against that backend only, and only while
//! the stream is still live.

use std::sync::Arc;

use async_trait::async_trait;
use rpc::{QueryRequest, Request, RequestKind};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::DaemonContext;
use crate::dispatch::{Execution, RequestHandler, ResponseSink};
use crate::error::DispatchError;
use crate::result_stream::{ResultStream, SubscriptionId};
use crate::shutdown::WorkerGuard;

struct ActiveQuery {
    stream: Arc<ResultStream>,
    subscription: SubscriptionId,
    change_feed: CancellationToken,
    _worker: WorkerGuard,
}

pub struct QueryExecutor {
    context: DaemonContext,
    active: Option<ActiveQuery>,
}

impl QueryExecutor {
    pub fn new(context: DaemonContext) -> Self {
        Self { context, active: None }
    }

    pub fn factory(context: &DaemonContext) -> Box<dyn RequestHandler> {
        Box::new(Self::new(context.clone()))
    }

    pub fn stream(&self) -> Option<&Arc<ResultStream>> {
        self.active.as_ref().map(|active| &active.stream)
    }

    fn follow_changes(&self, query: Arc<QueryRequest>, stream: Arc<ResultStream>) -> CancellationToken {
        let token = CancellationToken::new();
        let stop = token.clone();
        // Subscribed before the query starts so no change slips through.
        let mut changes = self.context.driver.subscribe_changes();
        let driver = Arc::clone(&self.context.driver);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    received = changes.recv() => {
                        match received {
                            Ok(change) => {
                                if !stream.is_live() {
                                    continue;
                                }
                                driver
                                    .do_one_query(change.backend, Arc::clone(&query), Arc::clone(&stream), change.data)
                                    .await;
                            }
                            Err(RecvError::Lagged(missed)) => {
                                warn!("stream {} missed {} change notification(s)", stream.id(), missed);
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
            debug!("stream {} stopped following changes", stream.id());
        });

        token
    }

    fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.stream.unsubscribe(active.subscription);
        active.change_feed.cancel();
        active.stream.cancel();
        active.stream.dispose();
        debug!("query session {} cleaned up", active.stream.id());
    }
}

#[async_trait]
impl RequestHandler for QueryExecutor {
    async fn execute(&mut self, request: Request, sink: ResponseSink) -> Result<Execution, DispatchError> {
        let got = request.kind();
        let Request::Query(query) = request else {
            return Err(DispatchError::UnexpectedRequest {
                expected: RequestKind::Query,
                got,
            });
        };
        self.disconnect();

        let stream = ResultStream::new();
        let worker = self
            .context
            .shutdown
            .worker(format!("query session {}", stream.id()));
        let subscription = stream.subscribe(move |event| {
            sink.send(event.to_response());
        });

        let query = Arc::new(query);
        let change_feed = self.follow_changes(Arc::clone(&query), Arc::clone(&stream));
        debug!("query session {} started: {:?}", stream.id(), query.clauses);

        self.active = Some(ActiveQuery {
            stream: Arc::clone(&stream),
            subscription,
            change_feed,
            _worker: worker,
        });
        self.context.driver.do_query(query, stream);

        Ok(Execution::Asynchronous)
    }

    fn cancel(&mut self) {
        if let Some(active) = &self.active {
            active.stream.cancel();
        }
    }

    fn cleanup(&mut self) {
        self.disconnect();
    }
}

impl Drop for QueryExecutor {
    fn drop(&mut self) {
        self.disconnect();
    }
}
