//! Single-flight guard for archive conversions.
//!
//! At most one conversion runs per process. Acquisition is a single atomic
//! test-and-set and never waits; a caller that loses the race is expected to
//! answer "not ready yet" instead of queueing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ConversionGuard {
    running: Arc<AtomicBool>,
}

impl ConversionGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the conversion slot if it is free.
    ///
    /// The slot is released when the returned permit is dropped, whether the
    /// conversion succeeded, failed, or panicked.
    #[must_use]
    pub fn try_acquire(&self) -> Option<ConversionPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ConversionPermit {
                running: Arc::clone(&self.running),
            })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Ownership of the conversion slot
#[must_use = "the conversion slot is released as soon as the permit is dropped"]
pub struct ConversionPermit {
    running: Arc<AtomicBool>,
}

impl Drop for ConversionPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let guard = ConversionGuard::new();

        let permit = guard.try_acquire();
        assert!(permit.is_some());
        assert!(guard.is_running());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let guard = ConversionGuard::new();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let guard = guard.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    // Keep the permit alive past the race
                    guard.try_acquire().map(std::mem::forget).is_some()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert!(guard.is_running());
    }

    #[tokio::test]
    async fn test_release_on_task_failure() {
        let guard = ConversionGuard::new();
        let permit = guard.try_acquire().unwrap();

        let task = tokio::spawn(async move {
            let _permit = permit;
            Err::<(), _>("ffmpeg exited with status 1")
        });

        assert!(task.await.unwrap().is_err());
        assert!(guard.try_acquire().is_some());
    }
}
