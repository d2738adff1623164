// search-core/src/testing.rs
//! Test backends and helpers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use rpc::{Hit, QueryRequest};

use crate::backend::{ChangeData, ChangeNotifier, Queryable};
use crate::config::{CoreConfig, ShutdownConfig};
use crate::context::DaemonContext;
use crate::driver::QueryDriver;
use crate::error::BackendError;
use crate::name_index::NameIndex;
use crate::result_stream::{ResultStream, StreamEvent};
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Answer,
    Fail,
    Panic,
    Decline,
}

/// Answers every query with a fixed set of URIs.
pub struct StaticBackend {
    name: String,
    uris: Vec<String>,
    change_uris: Vec<String>,
    delay: Option<Duration>,
    behaviour: Behaviour,
    notifier: OnceLock<ChangeNotifier>,
    evaluations: AtomicUsize,
    change_evaluations: AtomicUsize,
}

impl StaticBackend {
    pub fn new<I, S>(name: &str, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            uris: uris.into_iter().map(Into::into).collect(),
            change_uris: Vec::new(),
            delay: None,
            behaviour: Behaviour::Answer,
            notifier: OnceLock::new(),
            evaluations: AtomicUsize::new(0),
            change_evaluations: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, ["never"]).with_behaviour(Behaviour::Fail)
    }

    pub fn panicking(name: &str) -> Self {
        Self::new(name, ["never"]).with_behaviour(Behaviour::Panic)
    }

    pub fn declining(name: &str) -> Self {
        Self::new(name, ["never"]).with_behaviour(Behaviour::Decline)
    }

    fn with_behaviour(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// URIs answered when evaluating in the context of a change
    pub fn with_change_hits<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.change_uris = uris.into_iter().map(Into::into).collect();
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn change_evaluations(&self) -> usize {
        self.change_evaluations.load(Ordering::SeqCst)
    }

    pub fn notify_change(&self, data: ChangeData) -> usize {
        self.notifier.get().map_or(0, |n| n.notify(data))
    }

    fn hits(&self, uris: &[String]) -> Vec<Hit> {
        uris.iter().map(|uri| Hit::new(uri.as_str(), 1.0, self.name.as_str())).collect()
    }
}

#[async_trait]
impl Queryable for StaticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, _query: &QueryRequest) -> bool {
        self.behaviour != Behaviour::Decline
    }

    fn attach(&self, notifier: ChangeNotifier) {
        let _ = self.notifier.set(notifier);
    }

    async fn evaluate(
        &self,
        _query: &QueryRequest,
        stream: &ResultStream,
        change: Option<&ChangeData>,
    ) -> Result<(), BackendError> {
        match change {
            Some(_) => self.change_evaluations.fetch_add(1, Ordering::SeqCst),
            None => self.evaluations.fetch_add(1, Ordering::SeqCst),
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.behaviour {
            Behaviour::Fail => return Err(BackendError::Other("index unavailable".to_string())),
            Behaviour::Panic => panic!("backend {} blew up", self.name),
            Behaviour::Answer | Behaviour::Decline => {}
        }
        match change {
            Some(_) => stream.add(self.hits(&self.change_uris)),
            None => stream.add(self.hits(&self.uris)),
        }
        Ok(())
    }
}

pub type Recorded = Arc<Mutex<Vec<StreamEvent>>>;

pub fn recorder(stream: &ResultStream) -> Recorded {
    let events: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    stream.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

/// Waits (bounded) until the recorded events end with a terminal event.
pub async fn collect_until_terminal(events: &Recorded) -> Vec<StreamEvent> {
    let wait = async {
        loop {
            {
                let events = events.lock().unwrap();
                if matches!(events.last(), Some(StreamEvent::Finished | StreamEvent::Cancelled)) {
                    return events.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("stream never reached a terminal event")
}

/// Daemon context over the given backends with a fast-polling shutdown.
pub fn context_with(backends: Vec<Arc<dyn Queryable>>) -> DaemonContext {
    let config = CoreConfig {
        shutdown: ShutdownConfig {
            poll_interval: Duration::from_millis(20),
        },
        ..CoreConfig::default()
    };
    let shutdown = Shutdown::new(&config.shutdown);
    let mut builder = QueryDriver::builder(&config, shutdown.clone());
    for backend in backends {
        builder = builder.register(backend);
    }
    DaemonContext::new(builder.build(), shutdown, NameIndex::new())
}
