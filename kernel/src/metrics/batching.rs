// Batching Middleware
//
// Buffers points in memory and forwards them to the wrapped backend on a
// fixed interval, plus one final flush at teardown.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use super::{FlushMode, MetricsBackend, Point};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(15_000);

struct Shared<B> {
    backend: B,
    points: Mutex<Vec<Point>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl<B> Shared<B> {
    /// Snapshot and clear the buffer in one step.
    fn take(&self) -> Vec<Point> {
        std::mem::take(&mut *lock(&self.points))
    }
}

impl<B> Drop for Shared<B> {
    fn drop(&mut self) {
        if let Some(timer) = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`MetricsBackend`] that batches writes for the wrapped backend.
///
/// The flush timer starts with the first write and keeps running until
/// the middleware is dropped. It requires a Tokio runtime; without one,
/// points stay buffered until [`BatchingMiddleware::teardown`].
pub struct BatchingMiddleware<B> {
    shared: Arc<Shared<B>>,
}

impl<B: MetricsBackend + 'static> BatchingMiddleware<B> {
    pub fn new(backend: B) -> Self {
        Self::with_interval(backend, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn with_interval(backend: B, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                points: Mutex::new(Vec::new()),
                timer: Mutex::new(None),
                interval,
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Number of points awaiting the next flush.
    pub fn pending(&self) -> usize {
        lock(&self.shared.points).len()
    }

    pub fn timer_running(&self) -> bool {
        lock(&self.shared.timer).is_some()
    }

    /// Final flush before the host goes away.
    pub async fn teardown(&self, mode: FlushMode) {
        let points = self.shared.take();
        if points.is_empty() {
            return;
        }

        tracing::debug!(points = points.len(), ?mode, "teardown flush");
        match mode {
            FlushMode::Detached => self.shared.backend.write_points(points),
            FlushMode::Synchronous => self.shared.backend.deliver(points).await,
        }
    }

    fn ensure_timer(&self) {
        let mut timer = lock(&self.shared.timer);
        if timer.is_some() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, metrics stay buffered until teardown");
            return;
        };

        let shared = Arc::downgrade(&self.shared);
        let period = self.shared.interval;
        *timer = Some(runtime.spawn(run_timer(shared, period)));
    }
}

async fn run_timer<B: MetricsBackend>(shared: Weak<Shared<B>>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let points = shared.take();
        tracing::debug!(points = points.len(), "flushing metrics");
        shared.backend.write_points(points);
    }
}

#[async_trait]
impl<B: MetricsBackend + 'static> MetricsBackend for BatchingMiddleware<B> {
    fn write_points(&self, points: Vec<Point>) {
        lock(&self.shared.points).extend(points);
        self.ensure_timer();
    }
}
