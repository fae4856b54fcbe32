//! Bounded interval retry
//!
//! Defers a callback while a precondition holds. The predicate is polled on
//! a fixed interval; once it reports `false` the callback runs exactly once.
//! After `max_retries` ticks that still observe `true` the scheduler gives up
//! without ever running the callback.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Parameters for [`retry`]
pub struct RetryOptions<P, C> {
    /// Time between predicate checks
    pub interval: Duration,
    /// Ticks observing `should_retry() == true` before giving up
    pub max_retries: u32,
    /// Keep waiting while this returns true
    pub should_retry: P,
    /// Runs once the predicate is false
    pub callback: C,
}

/// How [`retry`] handled the callback
#[derive(Debug)]
pub enum RetryStart {
    /// The predicate was already false and the callback has run
    Immediate,
    /// Polling continues on this task until the callback ran or the
    /// retries are used up
    Scheduled(JoinHandle<()>),
}

/// Run `callback` now if `should_retry` is false, otherwise poll on a timer.
///
/// The scheduled path spawns onto the current tokio runtime and runs to
/// completion or exhaustion on its own.
pub fn retry<P, C>(options: RetryOptions<P, C>) -> RetryStart
where
    P: Fn() -> bool + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    let RetryOptions {
        interval,
        max_retries,
        should_retry,
        callback,
    } = options;

    if !should_retry() {
        callback();
        return RetryStart::Immediate;
    }

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        let mut retry_count = 0u32;

        loop {
            ticker.tick().await;

            if should_retry() {
                retry_count += 1;
                if retry_count > max_retries {
                    tracing::debug!(retries = retry_count - 1, "Retry budget exhausted, giving up");
                    return;
                }
                continue;
            }

            callback();
            return;
        }
    });

    RetryStart::Scheduled(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        (calls, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_runs_immediately_when_predicate_false() {
        let (calls, callback) = counter();
        let start = retry(RetryOptions {
            interval: Duration::from_secs(1),
            max_retries: 5,
            should_retry: || false,
            callback,
        });
        assert!(matches!(start, RetryStart::Immediate));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_predicate_clears() {
        let blocked = Arc::new(AtomicBool::new(true));
        let (calls, callback) = counter();
        let b = blocked.clone();
        let start = retry(RetryOptions {
            interval: Duration::from_secs(1),
            max_retries: 5,
            should_retry: move || b.load(Ordering::SeqCst),
            callback,
        });
        assert!(matches!(start, RetryStart::Scheduled(_)));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        blocked.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_task_finishes_after_callback() {
        let blocked = Arc::new(AtomicBool::new(true));
        let (calls, callback) = counter();
        let b = blocked.clone();
        let start = retry(RetryOptions {
            interval: Duration::from_secs(1),
            max_retries: 5,
            should_retry: move || b.load(Ordering::SeqCst),
            callback,
        });
        blocked.store(false, Ordering::SeqCst);

        match start {
            RetryStart::Scheduled(task) => task.await.unwrap(),
            RetryStart::Immediate => panic!("predicate was true, expected a scheduled retry"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let blocked = Arc::new(AtomicBool::new(true));
        let checks = Arc::new(AtomicUsize::new(0));
        let (calls, callback) = counter();
        let b = blocked.clone();
        let k = checks.clone();
        retry(RetryOptions {
            interval: Duration::from_secs(1),
            max_retries: 5,
            should_retry: move || {
                k.fetch_add(1, Ordering::SeqCst);
                b.load(Ordering::SeqCst)
            },
            callback,
        });

        tokio::time::sleep(Duration::from_millis(6500)).await;
        // initial check plus six ticks
        assert_eq!(checks.load(Ordering::SeqCst), 7);

        blocked.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(checks.load(Ordering::SeqCst), 7);
    }
}
