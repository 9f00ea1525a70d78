use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use loadshed_core::{
    compute_utilization, CounterRead, CounterSnapshot, CounterSource, DegradedReason, ShedError,
    SharedUtilization,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// What a single sampling tick did to the shared value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new utilization was computed and stored.
    Published(u32),
    /// Counters did not advance; the previous value was kept.
    Unchanged,
}

/// Counters reported when the sampler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SamplerStats {
    pub ticks: u64,
    pub published: u64,
    pub skipped: u64,
    pub degraded: u64,
}

/// Periodically turns counter deltas into a published utilization percent.
///
/// Construction takes the baseline snapshot; [`UtilizationSampler::spawn`]
/// moves the sampler onto its own task. Exactly one sampler should write to a
/// given [`SharedUtilization`].
pub struct UtilizationSampler<S> {
    source: Arc<Mutex<S>>,
    shared: SharedUtilization,
    previous: CounterSnapshot,
    stats: SamplerStats,
}

impl<S> UtilizationSampler<S>
where
    S: CounterSource + 'static,
{
    /// Read the baseline snapshot. A degraded baseline is fatal: the gate
    /// could never compute a meaningful delta from it.
    pub fn new(mut source: S, shared: SharedUtilization) -> Result<Self, ShedError> {
        let baseline = source.read();
        if let Some(reason) = baseline.degraded {
            return Err(ShedError::Baseline {
                reason: reason.to_string(),
            });
        }

        debug!(
            idle = baseline.snapshot.idle,
            total = baseline.snapshot.total,
            "Utilization sampler baseline taken"
        );

        Ok(Self {
            source: Arc::new(Mutex::new(source)),
            shared,
            previous: baseline.snapshot,
            stats: SamplerStats::default(),
        })
    }

    /// Take the baseline on the blocking pool and start sampling every
    /// `refresh_interval`.
    pub async fn start(
        source: S,
        shared: SharedUtilization,
        refresh_interval: Duration,
    ) -> Result<SamplerHandle, ShedError> {
        let sampler = tokio::task::spawn_blocking(move || Self::new(source, shared))
            .await
            .map_err(|e| ShedError::Sampler(format!("baseline read task failed: {}", e)))??;
        Ok(sampler.spawn(refresh_interval))
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Read the source on the current thread and apply the result.
    pub fn sample(&mut self) -> TickOutcome {
        let read = read_source(&self.source);
        self.apply(read)
    }

    /// Fold one counter read into the sampler state, publishing if the
    /// counters advanced.
    pub fn apply(&mut self, read: CounterRead) -> TickOutcome {
        self.stats.ticks += 1;

        if let Some(reason) = &read.degraded {
            self.stats.degraded += 1;
            warn!(reason = %reason, "Degraded CPU counter read, using zero snapshot");
        }

        let current = read.snapshot;
        let outcome = match compute_utilization(self.previous, current) {
            Some(percent) => {
                self.shared.publish(percent);
                self.stats.published += 1;
                trace!(utilization = percent, "Published CPU utilization");
                TickOutcome::Published(percent)
            }
            None => {
                self.stats.skipped += 1;
                TickOutcome::Unchanged
            }
        };

        self.previous = current;
        outcome
    }

    /// Move the sampler onto a background task.
    ///
    /// The first tick fires one full interval after the baseline. Cancellation
    /// is observed between ticks; a tick already running completes.
    pub fn spawn(mut self, refresh_interval: Duration) -> SamplerHandle {
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + refresh_interval, refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            debug!(
                refresh_interval_ms = refresh_interval.as_millis() as u64,
                "Utilization sampler started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        let read = self.read_blocking().await;
                        self.apply(read);
                    }
                }
            }

            info!(
                ticks = self.stats.ticks,
                published = self.stats.published,
                skipped = self.stats.skipped,
                degraded = self.stats.degraded,
                last_utilization = self.shared.load(),
                "Utilization sampler stopped"
            );
            self.stats
        });

        SamplerHandle {
            cancel_token,
            task: Some(task),
        }
    }

    /// Read the source in spawn_blocking to keep file I/O off the runtime threads.
    async fn read_blocking(&self) -> CounterRead {
        let source = self.source.clone();
        tokio::task::spawn_blocking(move || read_source(&source))
            .await
            .unwrap_or_else(|e| {
                CounterRead::degraded(DegradedReason::Unreadable(format!(
                    "counter read task failed: {}",
                    e
                )))
            })
    }
}

/// A read that panicked poisons the lock but leaves the source usable.
fn read_source<S: CounterSource>(source: &Mutex<S>) -> CounterRead {
    source.lock().unwrap_or_else(PoisonError::into_inner).read()
}

/// Owner's handle on a running sampler.
///
/// Dropping the handle cancels the sampler; call [`SamplerHandle::shutdown`]
/// to also wait for it and collect its stats.
#[derive(Debug)]
pub struct SamplerHandle {
    cancel_token: CancellationToken,
    task: Option<JoinHandle<SamplerStats>>,
}

impl SamplerHandle {
    /// Ask the sampler to stop at its next tick boundary.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the sampler and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<SamplerStats, ShedError> {
        self.cancel_token.cancel();
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ShedError::Sampler(format!("sampler task failed: {}", e))),
            None => Ok(SamplerStats::default()),
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted reads, repeating the last one once exhausted.
    struct ScriptedSource {
        reads: VecDeque<CounterRead>,
        last: CounterRead,
        count: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(reads: Vec<CounterRead>) -> (Self, Arc<AtomicUsize>) {
            let count = Arc::new(AtomicUsize::new(0));
            let source = Self {
                reads: reads.into(),
                last: CounterRead::ok(CounterSnapshot::ZERO),
                count: count.clone(),
            };
            (source, count)
        }
    }

    impl CounterSource for ScriptedSource {
        fn read(&mut self) -> CounterRead {
            self.count.fetch_add(1, Ordering::SeqCst);
            if let Some(read) = self.reads.pop_front() {
                self.last = read;
            }
            self.last.clone()
        }
    }

    fn ok(idle: u64, total: u64) -> CounterRead {
        CounterRead::ok(CounterSnapshot::new(idle, total))
    }

    /// Panics on the given read (0 is the baseline), then replays `reads`.
    struct PanickingSource {
        panic_on: usize,
        inner: ScriptedSource,
    }

    impl CounterSource for PanickingSource {
        fn read(&mut self) -> CounterRead {
            let n = self.inner.count.load(Ordering::SeqCst);
            if n == self.panic_on {
                self.inner.count.fetch_add(1, Ordering::SeqCst);
                panic!("counter source crashed");
            }
            self.inner.read()
        }
    }

    #[test]
    fn test_baseline_is_not_published() {
        let (source, count) = ScriptedSource::new(vec![ok(400, 1260)]);
        let shared = SharedUtilization::new();
        let sampler = UtilizationSampler::new(source, shared.clone()).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(shared.load(), 0);
        assert_eq!(sampler.stats(), SamplerStats::default());
    }

    #[test]
    fn test_degraded_baseline_is_fatal() {
        let (source, _) = ScriptedSource::new(vec![CounterRead::degraded(
            DegradedReason::MissingSentinel,
        )]);
        let err = UtilizationSampler::new(source, SharedUtilization::new())
            .err()
            .unwrap();
        assert!(matches!(err, ShedError::Baseline { .. }));
    }

    #[test]
    fn test_sample_publishes_delta() {
        let (source, _) = ScriptedSource::new(vec![ok(0, 1), ok(400, 1261)]);
        let shared = SharedUtilization::new();
        let mut sampler = UtilizationSampler::new(source, shared.clone()).unwrap();

        assert_eq!(sampler.sample(), TickOutcome::Published(68));
        assert_eq!(shared.load(), 68);
    }

    #[test]
    fn test_zero_delta_keeps_previous_value() {
        let (source, _) = ScriptedSource::new(vec![ok(0, 100), ok(50, 200), ok(50, 200)]);
        let shared = SharedUtilization::new();
        let mut sampler = UtilizationSampler::new(source, shared.clone()).unwrap();

        assert_eq!(sampler.sample(), TickOutcome::Published(50));
        assert_eq!(sampler.sample(), TickOutcome::Unchanged);
        assert_eq!(shared.load(), 50);
        assert_eq!(sampler.stats().skipped, 1);
    }

    #[test]
    fn test_degraded_tick_keeps_value_then_recomputes_from_zero() {
        let (source, _) = ScriptedSource::new(vec![
            ok(100, 1000),
            ok(150, 1100),
            CounterRead::degraded(DegradedReason::Unreadable("gone".to_string())),
            ok(400, 1260),
        ]);
        let shared = SharedUtilization::new();
        let mut sampler = UtilizationSampler::new(source, shared.clone()).unwrap();

        assert_eq!(sampler.sample(), TickOutcome::Published(50));
        // backwards delta against the zero snapshot
        assert_eq!(sampler.sample(), TickOutcome::Unchanged);
        assert_eq!(shared.load(), 50);
        // next delta is taken from the zero baseline
        assert_eq!(sampler.sample(), TickOutcome::Published(68));

        let stats = sampler.stats();
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.degraded, 1);
    }

    #[test]
    fn test_poisoned_source_lock_is_recovered() {
        let (source, _) = ScriptedSource::new(vec![ok(0, 0), ok(400, 1260)]);
        let shared = SharedUtilization::new();
        let mut sampler = UtilizationSampler::new(source, shared.clone()).unwrap();

        let lock = sampler.source.clone();
        let _ = std::thread::spawn(move || {
            let _guard = lock.lock().unwrap();
            panic!("reader crashed while holding the source");
        })
        .join();
        assert!(sampler.source.is_poisoned());

        assert_eq!(sampler.sample(), TickOutcome::Published(68));
        assert_eq!(shared.load(), 68);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sampler_publishes() {
        let (source, _) = ScriptedSource::new(vec![ok(0, 0), ok(400, 1260)]);
        let shared = SharedUtilization::new();

        let handle = UtilizationSampler::start(source, shared.clone(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(shared.load(), 68);

        // the script now repeats, so every later tick is a zero delta
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(shared.load(), 68);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.ticks, 6);
        assert_eq!(stats.published, 1);
        assert_eq!(stats.skipped, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_sampler_freezes_value() {
        let (source, count) = ScriptedSource::new(vec![ok(0, 0), ok(10, 100)]);
        let shared = SharedUtilization::new();

        let handle = UtilizationSampler::start(source, shared.clone(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(shared.load(), 90);

        handle.cancel();
        let stats = handle.shutdown().await.unwrap();
        let reads_at_stop = count.load(Ordering::SeqCst);
        assert_eq!(stats.ticks, 1);
        assert_eq!(reads_at_stop, 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), reads_at_stop);
        assert_eq!(shared.load(), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels_sampler() {
        let (source, _) = ScriptedSource::new(vec![ok(0, 0)]);
        let handle = UtilizationSampler::start(
            source,
            SharedUtilization::new(),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        let token = handle.cancellation_token();

        drop(handle);
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_interval() {
        let (source, count) = ScriptedSource::new(vec![ok(0, 0), ok(10, 100)]);
        let shared = SharedUtilization::new();

        let handle = UtilizationSampler::start(source, shared.clone(), Duration::from_secs(3600))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3599)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(shared.load(), 0);
        assert!(!handle.is_finished());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(shared.load(), 90);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.ticks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_on_degraded_baseline() {
        let (source, _) = ScriptedSource::new(vec![CounterRead::degraded(DegradedReason::Empty)]);
        let err = UtilizationSampler::start(source, SharedUtilization::new(), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ShedError::Baseline { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_read_degrades_one_tick_then_recovers() {
        let (inner, count) = ScriptedSource::new(vec![ok(100, 1000), ok(400, 1260)]);
        let source = PanickingSource { panic_on: 1, inner };
        let shared = SharedUtilization::new();

        let handle = UtilizationSampler::start(source, shared.clone(), Duration::from_millis(10))
            .await
            .unwrap();

        // first tick panics inside the blocking read
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(shared.load(), 0);

        // second tick takes the poisoned lock and computes from the zero snapshot
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(shared.load(), 68);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.degraded, 1);
        assert_eq!(stats.published, 1);
    }
}
