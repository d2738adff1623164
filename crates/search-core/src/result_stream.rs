// search-core/src/result_stream.rs
//! Live result stream for one in-flight query
//!
//! A stream accumulates hits keyed by URI and raises four events to its
//! subscribers: hits added, hits subtracted, finished and cancelled.
//!
//! State machine: `Active -> Finished | Cancelled -> Disposed`. Only one
//! terminal transition ever happens, and once the stream has left `Active`
//! every further add/subtract is silently dropped. Events are raised while
//! the stream lock is held, so subscribers observe them in raising order and
//! must not call back into the stream.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rpc::{Hit, Response};
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Active,
    Finished,
    Cancelled,
    Disposed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StreamState::Active)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    HitsAdded(Vec<Hit>),
    HitsSubtracted(Vec<String>),
    Finished,
    Cancelled,
}

impl StreamEvent {
    pub fn to_response(&self) -> Response {
        match self {
            StreamEvent::HitsAdded(hits) => Response::HitsAdded { hits: hits.clone() },
            StreamEvent::HitsSubtracted(uris) => Response::HitsSubtracted { uris: uris.clone() },
            StreamEvent::Finished => Response::Finished,
            StreamEvent::Cancelled => Response::Cancelled,
        }
    }
}

/// Handle returned by [`ResultStream::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn Fn(&StreamEvent) + Send + Sync>;

struct StreamInner {
    state: StreamState,
    /// Evaluations still feeding the stream; reaching zero finishes it
    workers: usize,
    hits: HashMap<String, Hit>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl StreamInner {
    fn emit(&self, event: StreamEvent) {
        for (_, subscriber) in &self.subscribers {
            subscriber(&event);
        }
    }
}

pub struct ResultStream {
    id: Uuid,
    inner: Mutex<StreamInner>,
    stop: CancellationToken,
}

impl fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl ResultStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            inner: Mutex::new(StreamInner {
                state: StreamState::Active,
                workers: 0,
                hits: HashMap::new(),
                subscribers: Vec::new(),
                next_subscription: 0,
            }),
            stop: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    /// True until the stream finishes, is cancelled or is disposed.
    pub fn is_live(&self) -> bool {
        self.state() == StreamState::Active
    }

    /// True once producers should stop: the stream was cancelled or disposed.
    pub fn is_cancelled(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves when producers should stop feeding this stream.
    pub async fn cancelled(&self) {
        self.stop.cancelled().await;
    }

    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;

        // A disposed stream never delivers anything, so there is nothing to attach to.
        if inner.state != StreamState::Disposed {
            inner.subscribers.push((id, Box::new(subscriber)));
        }
        id
    }

    /// Detaches a subscriber. Returns false if it was already detached.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn hit_count(&self) -> usize {
        self.lock().hits.len()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.lock().hits.contains_key(uri)
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.lock().hits.values().cloned().collect()
    }

    /// Adds a batch of hits. A URI already present is replaced, and the
    /// replacement is announced by a subtraction of the old copy first.
    pub fn add<I>(&self, hits: I)
    where
        I: IntoIterator<Item = Hit>,
    {
        let mut inner = self.lock();
        if inner.state != StreamState::Active {
            trace!("stream {}: dropping hits, state {:?}", self.id, inner.state);
            return;
        }

        let mut batch: Vec<Hit> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut replaced = Vec::new();

        for hit in hits.into_iter().filter(Hit::is_valid) {
            if let Some(&pos) = positions.get(&hit.uri) {
                batch[pos] = hit;
                continue;
            }
            if inner.hits.contains_key(&hit.uri) {
                replaced.push(hit.uri.clone());
            }
            positions.insert(hit.uri.clone(), batch.len());
            batch.push(hit);
        }

        if batch.is_empty() {
            return;
        }

        for hit in &batch {
            inner.hits.insert(hit.uri.clone(), hit.clone());
        }

        if !replaced.is_empty() {
            inner.emit(StreamEvent::HitsSubtracted(replaced));
        }
        inner.emit(StreamEvent::HitsAdded(batch));
    }

    /// Removes hits by URI. URIs never added to this stream are ignored.
    pub fn subtract<I, S>(&self, uris: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.lock();
        if inner.state != StreamState::Active {
            trace!("stream {}: dropping subtraction, state {:?}", self.id, inner.state);
            return;
        }

        let removed: Vec<String> = uris
            .into_iter()
            .map(Into::into)
            .filter(|uri| inner.hits.remove(uri).is_some())
            .collect();

        if !removed.is_empty() {
            inner.emit(StreamEvent::HitsSubtracted(removed));
        }
    }

    /// Moves an active stream to `Cancelled`. Returns false (and raises
    /// nothing) if the stream had already left `Active`.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != StreamState::Active {
            return false;
        }
        inner.state = StreamState::Cancelled;
        self.stop.cancel();
        inner.emit(StreamEvent::Cancelled);
        true
    }

    /// Detaches every subscriber and releases the accumulated hits. Idempotent.
    pub fn dispose(&self) {
        let mut inner = self.lock();
        if inner.state == StreamState::Disposed {
            return;
        }
        inner.state = StreamState::Disposed;
        inner.subscribers.clear();
        inner.hits.clear();
        self.stop.cancel();
    }

    /// Registers one more evaluation feeding the stream. `None` once the
    /// stream has left `Active`.
    pub fn worker(self: &Arc<Self>) -> Option<StreamWorker> {
        let mut inner = self.lock();
        if inner.state != StreamState::Active {
            return None;
        }
        inner.workers += 1;
        Some(StreamWorker {
            stream: Arc::clone(self),
        })
    }

    fn worker_finished(&self) {
        let mut inner = self.lock();
        debug_assert!(inner.workers > 0, "too many stream worker releases");
        inner.workers = inner.workers.saturating_sub(1);

        if inner.workers == 0 && inner.state == StreamState::Active {
            inner.state = StreamState::Finished;
            inner.emit(StreamEvent::Finished);
        }
    }
}

/// Keeps a stream from finishing while an evaluation is still running.
#[must_use = "the stream finishes as soon as the worker is dropped"]
pub struct StreamWorker {
    stream: Arc<ResultStream>,
}

impl StreamWorker {
    pub fn stream(&self) -> &Arc<ResultStream> {
        &self.stream
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stream.worker_finished();
    }
}
