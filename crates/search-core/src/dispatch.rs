// search-core/src/dispatch.rs
//! Request dispatch by request kind
//!
//! Each request gets a fresh handler from the factory registered for its
//! kind. A handler either answers in one response or keeps pushing responses
//! through its [`ResponseSink`] until a terminal one; in the latter case the
//! caller owns the handler and must run `cleanup` once the exchange ends.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use rpc::{Request, RequestKind, Response};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::context::DaemonContext;
use crate::error::DispatchError;
use crate::executor::QueryExecutor;
use crate::handlers::{NameIndexDumper, ReindexExecutor, ShutdownExecutor};

/// Outbound half of a session's response channel
#[derive(Debug, Clone)]
pub struct ResponseSink {
    tx: mpsc::UnboundedSender<Response>,
}

impl ResponseSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a response. Returns false once the receiving side is gone.
    pub fn send(&self, response: Response) -> bool {
        trace!("queueing {} response", response.kind());
        self.tx.send(response).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Outcome of a handler's `execute`
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Synchronous(Response),
    /// Responses follow through the sink, ending with a terminal response
    Asynchronous,
}

#[async_trait]
pub trait RequestHandler: Send {
    async fn execute(&mut self, request: Request, sink: ResponseSink) -> Result<Execution, DispatchError>;

    /// Explicit cancellation by the client.
    fn cancel(&mut self) {}

    /// Releases everything the handler holds. Safe to call more than once.
    fn cleanup(&mut self);
}

pub type HandlerFactory = fn(&DaemonContext) -> Box<dyn RequestHandler>;

pub enum Dispatched {
    Synchronous(Response),
    Asynchronous(Box<dyn RequestHandler>),
}

impl fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatched::Synchronous(response) => f.debug_tuple("Synchronous").field(response).finish(),
            Dispatched::Asynchronous(_) => f.write_str("Asynchronous"),
        }
    }
}

pub struct DispatcherBuilder {
    context: DaemonContext,
    factories: Vec<(RequestKind, HandlerFactory)>,
}

impl DispatcherBuilder {
    pub fn register(mut self, kind: RequestKind, factory: HandlerFactory) -> Self {
        self.factories.push((kind, factory));
        self
    }

    /// Fails if two factories were registered for the same kind.
    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        let mut handlers = HashMap::with_capacity(self.factories.len());
        for (kind, factory) in self.factories {
            if handlers.insert(kind, factory).is_some() {
                return Err(DispatchError::DuplicateHandler(kind));
            }
        }
        Ok(Dispatcher {
            context: self.context,
            handlers,
        })
    }
}

pub struct Dispatcher {
    context: DaemonContext,
    handlers: HashMap<RequestKind, HandlerFactory>,
}

impl Dispatcher {
    pub fn builder(context: DaemonContext) -> DispatcherBuilder {
        DispatcherBuilder {
            context,
            factories: Vec::new(),
        }
    }

    pub fn with_default_handlers(context: DaemonContext) -> Result<Self, DispatchError> {
        Self::builder(context)
            .register(RequestKind::Query, QueryExecutor::factory)
            .register(RequestKind::DumpNameIndex, NameIndexDumper::factory)
            .register(RequestKind::Reindex, ReindexExecutor::factory)
            .register(RequestKind::Shutdown, ShutdownExecutor::factory)
            .build()
    }

    pub fn context(&self) -> &DaemonContext {
        &self.context
    }

    pub fn handles(&self, kind: RequestKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Runs `request` through a new handler. A synchronous handler is
    /// cleaned up before this returns; an asynchronous one is handed back.
    pub async fn dispatch(&self, request: Request, sink: ResponseSink) -> Result<Dispatched, DispatchError> {
        let kind = request.kind();
        let factory = self.handlers.get(&kind).ok_or(DispatchError::NoHandler(kind))?;
        let mut handler = factory(&self.context);
        debug!("dispatching {} request", kind);

        match handler.execute(request, sink).await {
            Ok(Execution::Synchronous(response)) => {
                handler.cleanup();
                Ok(Dispatched::Synchronous(response))
            }
            Ok(Execution::Asynchronous) => Ok(Dispatched::Asynchronous(handler)),
            Err(e) => {
                handler.cleanup();
                Err(e)
            }
        }
    }
}

/// Rejects anything but `expected`; shared by the built-in handlers.
pub(crate) fn expect_kind(request: &Request, expected: RequestKind) -> Result<(), DispatchError> {
    let got = request.kind();
    if got != expected {
        return Err(DispatchError::UnexpectedRequest { expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StaticBackend, context_with};
    use rpc::QueryRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CLEANUPS: AtomicUsize = AtomicUsize::new(0);

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn execute(&mut self, _request: Request, _sink: ResponseSink) -> Result<Execution, DispatchError> {
            Ok(Execution::Synchronous(Response::acknowledge(7)))
        }

        fn cleanup(&mut self) {
            CLEANUPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn echo(_: &DaemonContext) -> Box<dyn RequestHandler> {
        Box::new(Echo)
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected() {
        let dispatcher = Dispatcher::builder(context_with(vec![])).build().unwrap();
        let (sink, _rx) = ResponseSink::channel();

        let err = dispatcher.dispatch(Request::Shutdown, sink).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoHandler(RequestKind::Shutdown)));
        assert_eq!(err.to_string(), "no handler available for Shutdown requests");
    }

    #[test]
    fn test_duplicate_registration_fails_build() {
        let result = Dispatcher::builder(context_with(vec![]))
            .register(RequestKind::Shutdown, echo)
            .register(RequestKind::Shutdown, echo)
            .build();
        assert!(matches!(result, Err(DispatchError::DuplicateHandler(RequestKind::Shutdown))));
    }

    #[tokio::test]
    async fn test_synchronous_handler_is_cleaned_up() {
        let dispatcher = Dispatcher::builder(context_with(vec![]))
            .register(RequestKind::DumpNameIndex, echo)
            .build()
            .unwrap();
        let (sink, _rx) = ResponseSink::channel();

        let before = CLEANUPS.load(Ordering::SeqCst);
        let dispatched = dispatcher.dispatch(Request::DumpNameIndex, sink).await.unwrap();

        assert!(matches!(
            dispatched,
            Dispatched::Synchronous(Response::IndexerAcknowledgment { item_count: 7 })
        ));
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_default_query_is_asynchronous() {
        let context = context_with(vec![StaticBackend::new("A", ["x1"]).shared()]);
        let dispatcher = Dispatcher::with_default_handlers(context).unwrap();
        assert!(dispatcher.handles(RequestKind::Reindex));

        let (sink, mut rx) = ResponseSink::channel();
        let dispatched = dispatcher
            .dispatch(Request::Query(QueryRequest::new(["x"])), sink)
            .await
            .unwrap();
        let Dispatched::Asynchronous(mut handler) = dispatched else {
            panic!("query should be asynchronous");
        };

        let mut received = Vec::new();
        while let Some(response) = rx.recv().await {
            let terminal = response.is_terminal();
            received.push(response);
            if terminal {
                break;
            }
        }
        handler.cleanup();

        assert_eq!(received.last(), Some(&Response::Finished));
        assert_eq!(received.len(), 2);
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (sink, rx) = ResponseSink::channel();
        assert!(sink.send(Response::Finished));
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.send(Response::Finished));
    }
}
