// search-core/src/driver.rs
//! Query driver - registry of queryable backends
//!
//! `do_query` runs a query against every accepting backend, each on its own
//! task, and lets the stream finish once the last evaluation is done.
//! `do_one_query` re-runs a query against a single backend after that backend
//! reported a change; it never finishes the stream.

use std::sync::Arc;

use rpc::QueryRequest;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backend::{BackendId, ChangeData, ChangeNotification, ChangeNotifier, Queryable};
use crate::config::{BackendFilter, CoreConfig};
use crate::result_stream::ResultStream;
use crate::shutdown::Shutdown;

pub struct QueryDriverBuilder {
    filter: BackendFilter,
    backends: Vec<Arc<dyn Queryable>>,
    changes: broadcast::Sender<ChangeNotification>,
    shutdown: Arc<Shutdown>,
}

impl QueryDriverBuilder {
    /// Registers a backend unless the backend filter excludes it.
    pub fn register(mut self, backend: Arc<dyn Queryable>) -> Self {
        let name = backend.name().to_string();
        if !self.filter.permits(&name) {
            info!("Backend {} disabled by configuration", name);
            return self;
        }

        let id = BackendId(self.backends.len());
        backend.attach(ChangeNotifier::new(id, self.changes.clone()));
        info!("Registered backend {} as {}", name, id);
        self.backends.push(backend);
        self
    }

    pub fn build(self) -> Arc<QueryDriver> {
        Arc::new(QueryDriver {
            backends: self.backends,
            changes: self.changes,
            shutdown: self.shutdown,
        })
    }
}

pub struct QueryDriver {
    backends: Vec<Arc<dyn Queryable>>,
    changes: broadcast::Sender<ChangeNotification>,
    shutdown: Arc<Shutdown>,
}

impl QueryDriver {
    pub fn builder(config: &CoreConfig, shutdown: Arc<Shutdown>) -> QueryDriverBuilder {
        let (changes, _) = broadcast::channel(config.change_feed_capacity.max(1));
        QueryDriverBuilder {
            filter: config.backends.clone(),
            backends: Vec::new(),
            changes,
            shutdown,
        }
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn backend_name(&self, id: BackendId) -> Option<&str> {
        self.backends.get(id.0).map(|b| b.name())
    }

    pub fn find_backend(&self, name: &str) -> Option<BackendId> {
        self.backends
            .iter()
            .position(|b| b.name().eq_ignore_ascii_case(name))
            .map(BackendId)
    }

    /// Subscribes to the global change feed. Dropping the receiver unsubscribes.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeNotification> {
        self.changes.subscribe()
    }

    /// Evaluates `query` against every accepting backend. Must be called from
    /// within a tokio runtime; returns as soon as the evaluations are spawned.
    pub fn do_query(&self, query: Arc<QueryRequest>, stream: Arc<ResultStream>) {
        // Held while launching so a query no backend accepts still finishes.
        let Some(launch) = stream.worker() else {
            debug!("stream {} no longer active, not querying", stream.id());
            return;
        };

        for (index, backend) in self.backends.iter().enumerate() {
            if !backend.accepts(&query) {
                debug!("{} declined the query", backend.name());
                continue;
            }
            let Some(worker) = stream.worker() else {
                break;
            };

            let id = BackendId(index);
            let backend = Arc::clone(backend);
            let query = Arc::clone(&query);
            let guard = self
                .shutdown
                .worker(format!("query {} on {}", stream.id(), backend.name()));

            tokio::spawn(async move {
                let _guard = guard;
                let stream = worker.stream();
                tokio::select! {
                    result = backend.evaluate(&query, stream, None) => {
                        if let Err(e) = result {
                            warn!("{} ({}) failed evaluating query: {}", backend.name(), id, e);
                        }
                    }
                    _ = stream.cancelled() => {
                        debug!("{} stopped: stream {} cancelled", backend.name(), stream.id());
                    }
                }
                drop(worker);
            });
        }

        drop(launch);
    }

    /// Re-evaluates `query` against one backend in the context of a change.
    /// The evaluation runs on its own task; a panicking backend is logged and
    /// counts as no hits.
    pub async fn do_one_query(
        &self,
        backend: BackendId,
        query: Arc<QueryRequest>,
        stream: Arc<ResultStream>,
        change: Arc<ChangeData>,
    ) {
        let Some(queryable) = self.backends.get(backend.0) else {
            warn!("change from unknown {}", backend);
            return;
        };
        if !stream.is_live() || !queryable.accepts(&query) {
            return;
        }

        let queryable = Arc::clone(queryable);
        let guard = self
            .shutdown
            .worker(format!("incremental query {} on {}", stream.id(), queryable.name()));
        let name = queryable.name().to_string();

        let task = tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                result = queryable.evaluate(&query, &stream, Some(change.as_ref())) => {
                    if let Err(e) = result {
                        warn!("{} failed re-evaluating query: {}", queryable.name(), e);
                    }
                }
                _ = stream.cancelled() => {}
            }
        });

        if let Err(e) = task.await {
            warn!("{} ({}) aborted re-evaluating query: {}", name, backend, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result_stream::{StreamEvent, StreamState};
    use crate::testing::{StaticBackend, collect_until_terminal, recorder};
    use rpc::Hit;
    use std::time::Duration;

    fn driver_with(backends: Vec<Arc<dyn Queryable>>) -> (Arc<QueryDriver>, Arc<Shutdown>) {
        let config = CoreConfig::default();
        let shutdown = Shutdown::new(&config.shutdown);
        let mut builder = QueryDriver::builder(&config, shutdown.clone());
        for backend in backends {
            builder = builder.register(backend);
        }
        (builder.build(), shutdown)
    }

    #[tokio::test]
    async fn test_two_backends_then_finished() {
        let a = StaticBackend::new("A", ["x1", "x2"]).shared();
        let b = StaticBackend::new("B", ["x3"]).shared();
        let (driver, _) = driver_with(vec![a, b]);

        let stream = ResultStream::new();
        let events = recorder(&stream);
        driver.do_query(Arc::new(QueryRequest::new(["report"])), stream.clone());

        let events = collect_until_terminal(&events).await;
        let added: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::HitsAdded(_)))
            .collect();
        assert_eq!(added.len(), 2);
        assert_eq!(events.last(), Some(&StreamEvent::Finished));
        assert_eq!(stream.hit_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_backend_is_isolated() {
        let broken = StaticBackend::failing("Broken").shared();
        let ok = StaticBackend::new("Ok", ["x1"]).shared();
        let (driver, _) = driver_with(vec![broken, ok]);

        let stream = ResultStream::new();
        let events = recorder(&stream);
        driver.do_query(Arc::new(QueryRequest::new(["report"])), stream.clone());

        let events = collect_until_terminal(&events).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::HitsAdded(vec![Hit::new("x1", 1.0, "Ok")]),
                StreamEvent::Finished
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_backend_still_finishes() {
        let (driver, shutdown) = driver_with(vec![StaticBackend::panicking("Panics").shared()]);

        let stream = ResultStream::new();
        let events = recorder(&stream);
        driver.do_query(Arc::new(QueryRequest::new(["report"])), stream.clone());

        assert_eq!(collect_until_terminal(&events).await, vec![StreamEvent::Finished]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shutdown.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_no_accepting_backend_finishes_immediately() {
        let (driver, _) = driver_with(vec![StaticBackend::declining("Picky").shared()]);

        let stream = ResultStream::new();
        driver.do_query(Arc::new(QueryRequest::new(["report"])), stream.clone());

        assert_eq!(stream.state(), StreamState::Finished);
    }

    #[tokio::test]
    async fn test_filter_skips_denied_backend() {
        let mut config = CoreConfig::default();
        config.backends.deny = vec!["b".to_string()];
        let shutdown = Shutdown::new(&config.shutdown);
        let driver = QueryDriver::builder(&config, shutdown)
            .register(StaticBackend::new("A", ["x1"]).shared())
            .register(StaticBackend::new("B", ["x2"]).shared())
            .build();

        assert_eq!(driver.backend_count(), 1);
        assert_eq!(driver.find_backend("a"), Some(BackendId(0)));
        assert_eq!(driver.find_backend("B"), None);
    }

    #[tokio::test]
    async fn test_cancel_stops_slow_backend() {
        let slow = StaticBackend::new("Slow", ["x1"]).with_delay(Duration::from_secs(30)).shared();
        let (driver, shutdown) = driver_with(vec![slow.clone()]);

        let stream = ResultStream::new();
        let events = recorder(&stream);
        driver.do_query(Arc::new(QueryRequest::new(["report"])), stream.clone());
        stream.cancel();

        assert_eq!(collect_until_terminal(&events).await, vec![StreamEvent::Cancelled]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shutdown.worker_count(), 0);
        assert_eq!(stream.hit_count(), 0);
    }

    #[tokio::test]
    async fn test_do_one_query_never_finishes_stream() {
        let a = StaticBackend::new("A", ["x1"]).with_change_hits(["x9"]).shared();
        let (driver, _) = driver_with(vec![a.clone()]);

        let stream = ResultStream::new();
        let _hold = stream.worker();
        let query = Arc::new(QueryRequest::new(["report"]));
        driver
            .do_one_query(BackendId(0), query, stream.clone(), Arc::default())
            .await;

        assert_eq!(stream.state(), StreamState::Active);
        assert!(stream.contains("x9"));
        assert_eq!(a.change_evaluations(), 1);
    }

    #[tokio::test]
    async fn test_do_one_query_skips_finished_stream() {
        let a = StaticBackend::new("A", ["x1"]).with_change_hits(["x9"]).shared();
        let (driver, _) = driver_with(vec![a.clone()]);

        let stream = ResultStream::new();
        drop(stream.worker());
        driver
            .do_one_query(BackendId(0), Arc::new(QueryRequest::new(["report"])), stream.clone(), Arc::default())
            .await;

        assert_eq!(a.change_evaluations(), 0);
    }

    #[tokio::test]
    async fn test_do_one_query_survives_panicking_backend() {
        let (driver, shutdown) = driver_with(vec![StaticBackend::panicking("Panics").shared()]);

        let stream = ResultStream::new();
        let _hold = stream.worker();
        driver
            .do_one_query(BackendId(0), Arc::new(QueryRequest::new(["report"])), stream.clone(), Arc::default())
            .await;

        assert_eq!(stream.state(), StreamState::Active);
        assert_eq!(stream.hit_count(), 0);
        assert_eq!(shutdown.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_change_feed_reaches_every_subscriber() {
        let a = StaticBackend::new("A", ["x1"]).shared();
        let (driver, _) = driver_with(vec![a.clone()]);

        let mut first = driver.subscribe_changes();
        let mut second = driver.subscribe_changes();
        let delivered = a.notify_change(ChangeData {
            added: vec!["x2".to_string()],
            removed: vec![],
        });

        assert_eq!(delivered, 2);
        assert_eq!(first.recv().await.unwrap().backend, BackendId(0));
        assert_eq!(second.recv().await.unwrap().data.added, vec!["x2".to_string()]);
    }
}
