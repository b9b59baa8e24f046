//! Long-lived background work owned by the process lifecycle.
//!
//! Every task observes one shared [`CancellationToken`]; [`BackgroundTasks::shutdown`]
//! cancels it and waits for the tasks to wind down.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled on shutdown; child tokens can be cancelled early
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run `task` until it finishes or shutdown begins
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = task => {}
            }
        });
        self.track(handle);
    }

    /// Run `tick` every `period`, first after one full period, until `token`
    /// is cancelled. `token` should be this set's token or a child of it.
    pub fn spawn_periodic<F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        token: CancellationToken,
        mut tick: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = name, period_ms = period.as_millis() as u64, "Background task started");

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => tick().await,
                }
            }

            debug!(task = name, "Background task stopped");
        });
        self.track(handle);
    }

    /// Cancel every task and wait up to `timeout` for each to finish.
    ///
    /// Returns `false` if any task had to be aborted.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.token.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        let total = handles.len();
        let mut all_graceful = true;

        for mut handle in handles {
            if time::timeout(timeout, &mut handle).await.is_err() {
                handle.abort();
                all_graceful = false;
            }
        }

        if all_graceful {
            info!(tasks = total, "Background tasks stopped");
        } else {
            warn!(tasks = total, "Some background tasks were aborted on shutdown");
        }
        all_graceful
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_waits_one_period_then_ticks() {
        let tasks = BackgroundTasks::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        tasks.spawn_periodic("counter", Duration::from_secs(10), tasks.token().clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(21)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        assert!(tasks.shutdown(Duration::from_secs(1)).await);
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_token_stops_single_task() {
        let tasks = BackgroundTasks::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let child = tasks.token().child_token();

        tasks.spawn_periodic("refresh", Duration::from_secs(1), child.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_millis(2_500)).await;
        child.cancel();
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert!(!tasks.is_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_one_shot_tasks() {
        let tasks = BackgroundTasks::new();
        tasks.spawn(std::future::pending());

        assert!(tasks.shutdown(Duration::from_secs(1)).await);
        assert!(tasks.is_shutdown());
    }
}
