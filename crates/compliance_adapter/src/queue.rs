#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("work queue is shutting down")]
    ShuttingDown,
    #[error("work queue lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub qps: u32,
    pub burst: u32,
}

impl RateLimiterConfig {
    pub fn mvp_v1() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            qps: 10,
            burst: 100,
        }
    }
}

/// Global token bucket. Reservations always succeed and report how long to wait.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(qps: u32, burst: u32, now: Instant) -> Self {
        Self {
            qps: f64::from(qps.max(1)),
            burst: f64::from(burst.max(1)),
            tokens: f64::from(burst.max(1)),
            last: now,
        }
    }

    pub fn reserve(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst);
        self.last = self.last.max(now);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.qps)
        }
    }
}

/// Per-item exponential backoff combined with the global bucket; the longer delay wins.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    failures: HashMap<String, u32>,
    bucket: TokenBucket,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, now: Instant) -> Self {
        Self {
            config,
            failures: HashMap::new(),
            bucket: TokenBucket::new(config.qps, config.burst, now),
        }
    }

    pub fn when(&mut self, item: &str, now: Instant) -> Duration {
        let failures = self.failures.entry(item.to_string()).or_insert(0);
        let exponent = (*failures).min(31);
        *failures = failures.saturating_add(1);
        let backoff = self
            .config
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);
        backoff.max(self.bucket.reserve(now))
    }

    pub fn forget(&mut self, item: &str) {
        self.failures.remove(item);
    }

    pub fn num_requeues(&self, item: &str) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct QueueState {
    queue: VecDeque<String>,
    // Waiting to be processed; a name is queued at most once.
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
    limiter: RateLimiter,
}

/// De-duplicating work queue that never hands the same name to two workers at once.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new(config: RateLimiterConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
                limiter: RateLimiter::new(config, Instant::now()),
            }),
            notify: Notify::new(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::Poisoned)
    }

    pub fn add(&self, item: &str) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if state.shutting_down {
            return Err(QueueError::ShuttingDown);
        }
        if !state.dirty.insert(item.to_string()) {
            return Ok(());
        }
        // Re-queued by `done` once the current worker finishes.
        if state.processing.contains(item) {
            return Ok(());
        }
        state.queue.push_back(item.to_string());
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    pub fn add_after(self: &Arc<Self>, item: &str, delay: Duration) -> Result<(), QueueError> {
        if delay.is_zero() {
            return self.add(item);
        }
        if self.is_shutting_down() {
            return Err(QueueError::ShuttingDown);
        }
        let queue = Arc::clone(self);
        let item = item.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = queue.add(&item) {
                debug!(item = %item, error = %err, "dropped delayed requeue");
            }
        });
        Ok(())
    }

    pub fn add_rate_limited(self: &Arc<Self>, item: &str) -> Result<Duration, QueueError> {
        let delay = self.lock()?.limiter.when(item, Instant::now());
        self.add_after(item, delay)?;
        Ok(delay)
    }

    pub fn forget(&self, item: &str) -> Result<(), QueueError> {
        self.lock()?.limiter.forget(item);
        Ok(())
    }

    pub fn num_requeues(&self, item: &str) -> u32 {
        self.lock()
            .map(|s| s.limiter.num_requeues(item))
            .unwrap_or(0)
    }

    /// Waits for the next name. `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock().ok()?;
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    pub fn done(&self, item: &str) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.to_string());
            drop(state);
            self.notify.notify_one();
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        if let Ok(mut state) = self.lock() {
            state.shutting_down = true;
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().map(|s| s.shutting_down).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
impl WorkQueue {
    /// Leaves the state mutex poisoned, as a worker panicking mid-update would.
    pub(crate) fn poison(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        let _ = std::thread::spawn(move || {
            let _guard = queue.state.lock();
            panic!("work queue state poisoned");
        })
        .join();
    }
}
