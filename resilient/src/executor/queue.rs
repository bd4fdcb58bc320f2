//! Durable FIFO of queued executions.

use crate::errors::{ResilientError, Result};
use crate::storage::{EntryMutation, StorageAdapter};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Ack = oneshot::Sender<Result<()>>;

#[derive(Default)]
struct Pending {
    include: Vec<(String, Value, Ack)>,
    exclude: Vec<(String, Ack)>,
    /// A flush task is running.
    flushing: bool,
}

/// Outcome of claiming one queued id.
#[derive(Debug)]
pub(crate) enum Claim {
    /// The id is now in progress; its value was read.
    Ready(String, Value),
    /// The id is now in progress but reading its value failed.
    Failed(String, ResilientError),
}

/// Queue of `{id, value}` entries persisted through a [`StorageAdapter`].
///
/// Writes are coalesced: every include/exclude requested while a flush is
/// running is applied together by the next flush. Ids are tracked as in
/// progress from claim until their exclusion completes.
pub(crate) struct DurableQueue {
    adapter: StorageAdapter,
    pending: Mutex<Pending>,
    in_progress: Mutex<HashSet<String>>,
}

impl DurableQueue {
    pub(crate) fn new(adapter: StorageAdapter) -> Self {
        Self {
            adapter,
            pending: Mutex::new(Pending::default()),
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn adapter(&self) -> &StorageAdapter {
        &self.adapter
    }

    /// Persists a new entry at the tail of the queue.
    pub(crate) async fn enqueue(self: &Arc<Self>, id: String, value: Value) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().include.push((id, value, tx));
        self.work();
        Self::acknowledged(rx).await
    }

    /// Removes an entry and its value, then releases the id.
    pub(crate) async fn exclude(self: &Arc<Self>, id: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().exclude.push((id.to_string(), tx));
        self.work();
        let result = Self::acknowledged(rx).await;
        self.release(id);
        result
    }

    /// Claims every queued id not already in progress, in queue order.
    ///
    /// Ids whose value is missing are excluded in the background and
    /// skipped.
    pub(crate) async fn claim(self: &Arc<Self>) -> Result<Vec<Claim>> {
        let ids = self.adapter.get_ids().await?;
        let mut claims = Vec::new();

        for id in ids {
            if !self.in_progress.lock().insert(id.clone()) {
                continue;
            }

            let read = self.adapter.get_values(std::slice::from_ref(&id)).await;
            match read.map(|mut entries| entries.pop().and_then(|entry| entry.value)) {
                Ok(Some(value)) => claims.push(Claim::Ready(id, value)),
                Ok(None) => {
                    warn!(id = %id, "Queued id has no stored value, removing it");
                    let queue = Arc::clone(self);
                    tokio::spawn(async move {
                        if let Err(err) = queue.exclude(&id).await {
                            warn!(id = %id, error = %err, "Failed to remove orphan id");
                        }
                    });
                }
                Err(err) => {
                    self.release(&id);
                    claims.push(Claim::Failed(id, err));
                }
            }
        }

        Ok(claims)
    }

    /// Returns whether an id is currently claimed.
    pub(crate) fn is_in_progress(&self, id: &str) -> bool {
        self.in_progress.lock().contains(id)
    }

    fn release(&self, id: &str) {
        self.in_progress.lock().remove(id);
    }

    async fn acknowledged(rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        rx.await.unwrap_or_else(|_| {
            Err(ResilientError::Internal(
                "queue flush ended without acknowledging".to_string(),
            ))
        })
    }

    fn work(self: &Arc<Self>) {
        {
            let mut pending = self.pending.lock();
            if pending.flushing {
                return;
            }
            pending.flushing = true;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let (include, exclude) = {
                    let mut pending = queue.pending.lock();
                    if pending.include.is_empty() && pending.exclude.is_empty() {
                        pending.flushing = false;
                        return;
                    }
                    (
                        std::mem::take(&mut pending.include),
                        std::mem::take(&mut pending.exclude),
                    )
                };

                debug!(include = include.len(), exclude = exclude.len(), "Flushing queue mutations");
                let mut include_values = Vec::with_capacity(include.len());
                let mut include_ids = Vec::with_capacity(include.len());
                let mut acks = Vec::with_capacity(include.len() + exclude.len());
                for (id, value, ack) in include {
                    include_values.push(EntryMutation::Put {
                        id: id.clone(),
                        value,
                    });
                    include_ids.push(id);
                    acks.push(ack);
                }
                let mut exclude_ids = HashSet::with_capacity(exclude.len());
                for (id, ack) in exclude {
                    exclude_ids.insert(id);
                    acks.push(ack);
                }

                let result = queue.flush(include_values, include_ids, exclude_ids).await;
                if let Err(ref err) = result {
                    warn!(error = %err, "Queue flush failed");
                }
                for ack in acks {
                    let _ = ack.send(result.clone());
                }
            }
        });
    }

    /// Values are written before their id is listed and deleted after it
    /// is unlisted, so a listed id always has a value.
    async fn flush(
        &self,
        include_values: Vec<EntryMutation>,
        include_ids: Vec<String>,
        exclude_ids: HashSet<String>,
    ) -> Result<()> {
        self.adapter.set_values(include_values).await?;

        let ids: Vec<String> = self
            .adapter
            .get_ids()
            .await?
            .into_iter()
            .filter(|id| !exclude_ids.contains(id))
            .chain(include_ids)
            .collect();
        self.adapter.set_ids(&ids).await?;

        let removals = exclude_ids
            .into_iter()
            .map(|id| EntryMutation::Remove { id })
            .collect();
        self.adapter.set_values(removals).await
    }
}
