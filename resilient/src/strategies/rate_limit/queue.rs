//! Serialized dispatcher behind the rate limit strategy.

use crate::utils::bound;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<(u64, oneshot::Sender<()>)>,
    /// Dispatch times inside the current window, oldest first.
    timestamps: VecDeque<Instant>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the pending timer is discarded.
    epoch: u64,
    locked: bool,
    next_id: u64,
}

/// FIFO of calls waiting for dispatch, released one at a time as the
/// sliding window allows.
pub(crate) struct RateLimitQueue {
    limit: Option<u64>,
    interval: Duration,
    smooth: bool,
    state: Mutex<QueueState>,
}

impl RateLimitQueue {
    pub(crate) fn new(limit: i64, interval: Duration, smooth: bool) -> Self {
        Self {
            limit: bound(limit),
            interval,
            smooth,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Adds a call to the queue. The receiver fires when it is dispatched.
    pub(crate) fn enqueue(self: &Arc<Self>) -> (u64, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.waiting.push_back((id, tx));
            id
        };
        self.process();
        (id, rx)
    }

    /// Removes a waiting call. Clears the pending timer once the queue is empty.
    pub(crate) fn dequeue(&self, id: u64) {
        let mut state = self.state.lock();
        state.waiting.retain(|(entry, _)| *entry != id);

        if state.waiting.is_empty() {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.epoch += 1;
            state.locked = false;
        }
    }

    /// Returns the number of calls waiting for dispatch.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().waiting.len()
    }

    fn process(self: &Arc<Self>) {
        loop {
            let mut state = self.state.lock();
            if state.locked || state.waiting.is_empty() {
                return;
            }

            let now = Instant::now();
            let delay = self.next_delay(&mut state, now);
            if delay.is_zero() {
                Self::dispatch(&mut state, now);
                continue;
            }

            debug!(delay = ?delay, waiting = state.waiting.len(), "Rate limit delaying dispatch");
            state.locked = true;
            let epoch = state.epoch;
            let queue = Arc::clone(self);
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut state = queue.state.lock();
                    if state.epoch != epoch {
                        return;
                    }
                    state.timer = None;
                    Self::dispatch(&mut state, Instant::now());
                    state.locked = false;
                }
                queue.process();
            }));
            return;
        }
    }

    fn dispatch(state: &mut QueueState, now: Instant) {
        if let Some((_, go)) = state.waiting.pop_front() {
            state.timestamps.push_back(now);
            // A dropped receiver means the caller gave up; the slot is spent anyway.
            let _ = go.send(());
        }
    }

    fn next_delay(&self, state: &mut QueueState, now: Instant) -> Duration {
        let window_start = now.checked_sub(self.interval);
        while let (Some(oldest), Some(start)) = (state.timestamps.front(), window_start) {
            if *oldest >= start {
                break;
            }
            state.timestamps.pop_front();
        }

        let Some(&oldest) = state.timestamps.front() else {
            return Duration::ZERO;
        };
        let count = state.timestamps.len() as u64;
        let until_window_frees = || (oldest + self.interval + Duration::from_millis(1)).saturating_duration_since(now);
        let saturated = self.limit.is_some_and(|limit| count >= limit);

        let mut delay = if saturated {
            until_window_frees()
        } else {
            Duration::ZERO
        };

        if self.smooth {
            if let Some(limit) = self.limit.filter(|limit| *limit > 0) {
                let spacing_ms = self.interval.as_millis() * u128::from(count) / u128::from(limit);
                let spacing = Duration::from_millis(u64::try_from(spacing_ms).unwrap_or(u64::MAX));
                delay = delay.max((oldest + spacing).saturating_duration_since(now));
            }
        }

        delay
    }
}
