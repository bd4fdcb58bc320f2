//! Test doubles for operations and storage.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::storage::{MemoryStorage, Mutation, Storage, StorageResponse};

/// Shared call counter for protected operations.
///
/// Clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicUsize>,
}

impl CallCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a call and returns its 1-based number.
    pub fn hit(&self) -> usize {
        self.calls.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resets the count.
    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Returns an operation that fails `failures` times, then yields `value`.
    pub fn flaky<T>(
        &self,
        failures: usize,
        value: T,
    ) -> impl Fn() -> futures::future::Ready<anyhow::Result<T>> + Send + Sync + 'static
    where
        T: Clone + Send + Sync + 'static,
    {
        let counter = self.clone();
        move || {
            let attempt = counter.hit();
            futures::future::ready(if attempt > failures {
                Ok(value.clone())
            } else {
                Err(anyhow::anyhow!("attempt {attempt} failed"))
            })
        }
    }
}

/// In-memory storage whose reads and writes can be made to fail.
#[derive(Debug, Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    batch: bool,
}

impl FailingStorage {
    /// Creates a healthy store that applies batches atomically.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batch: true,
            ..Self::default()
        }
    }

    /// Creates a healthy store without batch support.
    #[must_use]
    pub fn without_batch() -> Self {
        Self::default()
    }

    /// Makes every `get` fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every `set` and `batch` fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> anyhow::Result<()> {
        if flag.load(Ordering::SeqCst) {
            anyhow::bail!("{op} unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn get(&self, key: &str) -> anyhow::Result<StorageResponse> {
        self.check(&self.fail_reads, "read")?;
        self.inner.get(key).await
    }

    async fn set(&self, mutation: Mutation) -> anyhow::Result<()> {
        self.check(&self.fail_writes, "write")?;
        self.inner.set(mutation).await
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn batch(&self, mutations: Vec<Mutation>) -> anyhow::Result<()> {
        self.check(&self.fail_writes, "write")?;
        self.inner.batch(mutations).await
    }
}
