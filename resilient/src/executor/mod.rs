//! Durable execution queue.
//!
//! Requests are persisted before they run, drained by a single dequeue
//! worker, executed concurrently through the traced strategy chain and
//! removed from storage once finished. The same id never runs twice at the
//! same time.

mod queue;
mod request;

pub use request::ExecutorRequest;

use crate::cancellation::{CancelListener, CancellationToken};
use crate::core::{downcast, protect, ExceptionType, ExecutionEvent, ExecutionType, Strategy};
use crate::errors::{ResilientError, Result};
use crate::events::{Emitter, EventSink, EventStream, EventSubscription, NoOpEventSink};
use crate::policy::{ExecutionTracer, ResponseReceiver};
use crate::storage::{MemoryStorage, Storage, StorageAdapter};
use crate::strategies::ComposedStrategy;
use crate::utils::generate_id;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use queue::{Claim, DurableQueue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

type ExecuteFn<I, O> =
    Arc<dyn Fn(I, CancellationToken) -> BoxFuture<'static, anyhow::Result<O>> + Send + Sync>;

/// Live state of a request known to this process.
struct Reference<I, O> {
    request: ExecutorRequest<I, O>,
    emitter: Emitter,
    response: Arc<watch::Sender<Option<Result<O>>>>,
    listener: Arc<Mutex<Option<CancelListener>>>,
}

impl<I: Clone, O: Clone> Clone for Reference<I, O> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            emitter: self.emitter.clone(),
            response: Arc::clone(&self.response),
            listener: Arc::clone(&self.listener),
        }
    }
}

impl<I, O> Reference<I, O> {
    /// Settles the response once and stops reporting cancellation.
    fn settle(&self, result: Result<O>) {
        self.response.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
        self.listener.lock().take();
    }
}

#[derive(Default)]
struct Worker {
    running: bool,
    /// More work was requested while running.
    rescan: bool,
}

struct Inner<I, O> {
    execute: ExecuteFn<I, O>,
    strategy: ComposedStrategy,
    queue: Arc<DurableQueue>,
    references: DashMap<String, Reference<I, O>>,
    events: EventStream,
    sink: Arc<dyn EventSink>,
    worker: Mutex<Worker>,
}

fn ready() -> ResponseReceiver<()> {
    watch::channel(Some(Ok(()))).1
}

impl<I, O> Inner<I, O>
where
    I: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn upsert(&self, id: &str, args: I, storage: ResponseReceiver<()>) -> Reference<I, O> {
        self.references
            .entry(id.to_string())
            .or_insert_with(|| self.reference(id, args, storage))
            .value()
            .clone()
    }

    fn reference(&self, id: &str, args: I, storage: ResponseReceiver<()>) -> Reference<I, O> {
        let stream = EventStream::replaying();
        let emitter = Emitter::new(stream.clone(), self.events.clone(), Arc::clone(&self.sink));
        let token = CancellationToken::new();
        let (tx, rx) = watch::channel(None);

        let listener = {
            let emitter = emitter.clone();
            let id = id.to_string();
            token.on_cancel(move || {
                emitter.emit(ExecutionEvent::execution(id, ExecutionType::Cancel));
            })
        };

        Reference {
            request: ExecutorRequest {
                id: id.to_string(),
                args,
                events: stream,
                storage,
                response: rx,
                token,
            },
            emitter,
            response: Arc::new(tx),
            listener: Arc::new(Mutex::new(Some(listener))),
        }
    }

    /// Ends a live request with a storage failure, reported on its own
    /// stream only.
    fn fail(&self, id: &str, err: ResilientError) {
        error!(id = %id, error = %err, "Queued execution failed in storage");
        if let Some((_, reference)) = self.references.remove(id) {
            reference.emitter.emit_local(ExecutionEvent::exception(
                id,
                ExceptionType::Error,
                err.clone(),
            ));
            reference.settle(Err(err));
            reference.emitter.close();
        }
    }

    /// Starts the dequeue worker, or asks the running one to scan again.
    fn work(self: &Arc<Self>) {
        {
            let mut worker = self.worker.lock();
            if worker.running {
                worker.rescan = true;
                return;
            }
            worker.running = true;
            worker.rescan = false;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.dequeue().await });
    }

    async fn dequeue(self: Arc<Self>) {
        loop {
            match self.queue.claim().await {
                Ok(claims) => {
                    for claim in claims {
                        self.dispatch(claim);
                    }
                }
                Err(err) => error!(error = %err, "Failed to read the execution queue"),
            }

            let again = {
                let mut worker = self.worker.lock();
                if worker.rescan {
                    worker.rescan = false;
                } else {
                    worker.running = false;
                }
                worker.running
            };
            if !again {
                return;
            }
        }
    }

    fn dispatch(self: &Arc<Self>, claim: Claim) {
        match claim {
            Claim::Ready(id, value) => match serde_json::from_value::<I>(value) {
                Ok(args) => {
                    debug!(id = %id, "Dequeued execution");
                    let inner = Arc::clone(self);
                    tokio::spawn(async move { inner.run(id, args).await });
                }
                Err(err) => {
                    self.fail(&id, err.into());
                    let queue = Arc::clone(&self.queue);
                    tokio::spawn(async move {
                        if let Err(err) = queue.exclude(&id).await {
                            warn!(id = %id, error = %err, "Failed to remove unreadable execution");
                        }
                    });
                }
            },
            Claim::Failed(id, err) => self.fail(&id, err),
        }
    }

    async fn run(self: Arc<Self>, id: String, args: I) {
        let reference = self.upsert(&id, args.clone(), ready());
        let token = reference.request.token.clone();

        let operation = {
            let execute = Arc::clone(&self.execute);
            let token = token.clone();
            protect(move || execute(args.clone(), token.clone()))
        };
        let tracer = ExecutionTracer::new(id.clone(), reference.emitter.clone());
        let result = tracer
            .trace(&self.strategy, operation, Some(token))
            .await
            .and_then(downcast::<O>);
        reference.settle(result);

        match self.queue.exclude(&id).await {
            Ok(()) => {
                reference
                    .emitter
                    .emit(ExecutionEvent::execution(id.clone(), ExecutionType::Clear));
            }
            Err(err) => {
                error!(id = %id, error = %err, "Failed to remove finished execution");
                reference
                    .emitter
                    .emit_local(ExecutionEvent::exception(id.clone(), ExceptionType::Error, err));
            }
        }

        reference.emitter.close();
        self.references.remove(&id);
    }
}

/// Durable, observable execution queue.
///
/// Cloning yields another handle to the same executor.
pub struct Executor<I, O> {
    inner: Arc<Inner<I, O>>,
}

impl<I, O> Clone for Executor<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O> Executor<I, O>
where
    I: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Creates an executor with in-memory storage and no strategies.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<F, Fut>(execute: F) -> Self
    where
        F: Fn(I, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        Self::builder(execute).build()
    }

    /// Starts building an executor around `execute`.
    pub fn builder<F, Fut>(execute: F) -> ExecutorBuilder<I, O>
    where
        F: Fn(I, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        ExecutorBuilder {
            execute: Arc::new(move |args, token| execute(args, token).boxed()),
            storage: None,
            strategies: Vec::new(),
            sink: None,
        }
    }

    /// Subscribes to the events of every request.
    #[must_use]
    pub fn events(&self) -> EventSubscription {
        self.inner.events.subscribe()
    }

    /// Queues a request. The returned handle is live immediately; its
    /// [`storage`](ExecutorRequest::storage) settles once it is persisted.
    pub fn execute(&self, args: I) -> ExecutorRequest<I, O> {
        let id = generate_id();
        let (storage_tx, storage_rx) = watch::channel(None);
        let reference = self.inner.upsert(&id, args.clone(), storage_rx);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let persisted = match serde_json::to_value(&args) {
                Ok(value) => inner.queue.enqueue(id.clone(), value).await,
                Err(err) => Err(err.into()),
            };
            storage_tx.send_replace(Some(persisted.clone()));

            match persisted {
                Ok(()) => inner.work(),
                Err(err) => inner.fail(&id, err),
            }
        });

        reference.request
    }

    /// Looks up a request by id.
    ///
    /// Returns the live request if this process knows it, otherwise a
    /// request rebuilt from storage (without queueing it again), otherwise
    /// `None`.
    pub async fn query(&self, id: &str) -> Result<Option<ExecutorRequest<I, O>>> {
        let live = self.inner.references.get(id).map(|r| r.request.clone());
        if live.is_some() {
            return Ok(live);
        }

        let stored = self
            .inner
            .queue
            .adapter()
            .get_values(&[id.to_string()])
            .await?
            .pop()
            .and_then(|entry| entry.value);
        let Some(value) = stored else {
            return Ok(None);
        };

        let args: I = serde_json::from_value(value)?;
        Ok(Some(self.inner.upsert(id, args, ready()).request))
    }

    /// Returns the number of requests this process is tracking.
    #[must_use]
    pub fn live_requests(&self) -> usize {
        self.inner.references.len()
    }
}

impl<I, O> std::fmt::Debug for Executor<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("strategy", &self.inner.strategy)
            .field("live_requests", &self.inner.references.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Executor`].
pub struct ExecutorBuilder<I, O> {
    execute: ExecuteFn<I, O>,
    storage: Option<Arc<dyn Storage>>,
    strategies: Vec<Arc<dyn Strategy>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl<I, O> ExecutorBuilder<I, O>
where
    I: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Sets the storage backend. Defaults to [`MemoryStorage`].
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Appends a strategy as the new innermost element of the chain.
    #[must_use]
    pub fn strategy(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Replaces the strategy chain, first = outermost.
    #[must_use]
    pub fn strategies(mut self, strategies: Vec<Arc<dyn Strategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Sets a sink observing every event.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the executor and starts draining persisted requests.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Executor<I, O> {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let inner = Arc::new(Inner {
            execute: self.execute,
            strategy: ComposedStrategy::new(self.strategies),
            queue: Arc::new(DurableQueue::new(StorageAdapter::new(storage))),
            references: DashMap::new(),
            events: EventStream::new(),
            sink: self.sink.unwrap_or_else(|| Arc::new(NoOpEventSink)),
            worker: Mutex::new(Worker::default()),
        });

        inner.work();
        Executor { inner }
    }
}
