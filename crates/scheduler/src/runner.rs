use async_trait::async_trait;
use hivemind_core::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// One unit of periodic background work.
#[async_trait]
pub trait Cycle: Send + Sync {
    fn name(&self) -> &str;
    async fn run_once(&self) -> Result<()>;
}

/// Clears the run flag even if the iteration panics.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives a [`Cycle`] on a fixed interval until shutdown.
///
/// At most one iteration runs at a time: a manual [`tick`](Self::tick) while
/// another iteration is in flight is skipped. Shutdown is observed between
/// iterations; a running iteration always finishes.
pub struct CycleRunner {
    cycle: Arc<dyn Cycle>,
    interval: Duration,
    running: AtomicBool,
    completed: AtomicU64,
}

impl CycleRunner {
    pub fn new(cycle: Arc<dyn Cycle>, interval: Duration) -> Self {
        Self {
            cycle,
            interval: interval.max(Duration::from_millis(1)),
            running: AtomicBool::new(false),
            completed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        self.cycle.name()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Iterations run to completion, successful or not.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Run one iteration now. Returns `false` when skipped because another
    /// iteration is in flight.
    pub async fn tick(&self) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!(cycle = self.name(), "Iteration in flight, skipping tick");
            return false;
        }
        let _guard = RunGuard(&self.running);

        if let Err(e) = self.cycle.run_once().await {
            error!(cycle = self.name(), error = %e, "Cycle iteration failed");
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            cycle = self.name(),
            interval_secs = self.interval.as_secs(),
            "Cycle started"
        );

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(_) => {}
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => break,
            }
        }

        info!(cycle = self.name(), completed = self.completed(), "Cycle stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivemind_core::Error;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct Counting {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Cycle for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run_once(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Other("nope".to_string()));
            }
            Ok(())
        }
    }

    struct Gated {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Cycle for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        async fn run_once(&self) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    fn counting(fail: bool) -> Arc<Counting> {
        Arc::new(Counting {
            runs: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval_until_shutdown() {
        let cycle = counting(false);
        let runner = Arc::new(CycleRunner::new(cycle.clone(), Duration::from_secs(30)));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(runner.clone().run_loop(rx));

        time::sleep(Duration::from_secs(29)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(62)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 3);

        tx.send(()).unwrap();
        handle.await.unwrap();

        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 3);
        assert_eq!(runner.completed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_iteration_keeps_loop_alive() {
        let cycle = counting(true);
        let runner = Arc::new(CycleRunner::new(cycle.clone(), Duration::from_secs(10)));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(runner.clone().run_loop(rx));

        time::sleep(Duration::from_secs(35)).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 3);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_tick_skips_while_in_flight() {
        let cycle = Arc::new(Gated {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let runner = Arc::new(CycleRunner::new(cycle.clone(), Duration::from_secs(60)));

        let first = tokio::spawn({
            let runner = runner.clone();
            async move { runner.tick().await }
        });
        cycle.entered.notified().await;
        assert!(runner.is_running());
        assert!(!runner.tick().await);

        cycle.release.notify_one();
        assert!(first.await.unwrap());
        assert!(!runner.is_running());
        assert_eq!(runner.completed(), 1);
    }
}
