//! The default tokio clock and timer, driven by paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use call_rate_limiter::{
    CoalescingAsyncRateLimiter, LeadingRateLimiter, RateLimitConfig, SlotState,
};

use futures::{poll, FutureExt};
use pretty_assertions::assert_eq;
use tokio::time::{sleep, Instant};

#[tokio::test(start_paused = true)]
async fn test_leading_defers_to_end_of_interval() {
    let start = Instant::now();
    let runs = Arc::new(Mutex::new(vec![]));

    let limiter = {
        let runs = Arc::clone(&runs);
        LeadingRateLimiter::new(Duration::from_secs(1), move || {
            runs.lock().unwrap().push(Instant::now() - start)
        })
    };

    limiter.trigger();
    sleep(Duration::from_millis(100)).await;
    limiter.trigger();
    limiter.trigger();
    assert_eq!(limiter.state(), SlotState::Scheduled);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(limiter.state(), SlotState::Idle);
    assert_eq!(
        *runs.lock().unwrap(),
        vec![Duration::from_secs(0), Duration::from_secs(1)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_leading_from_config() {
    let config = RateLimitConfig::from_toml_str("interval_ms = 500").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let limiter = {
        let calls = Arc::clone(&calls);
        LeadingRateLimiter::from_config(&config, move || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert_eq!(limiter.interval(), Duration::from_millis(500));

    limiter.trigger();
    limiter.trigger();
    sleep(Duration::from_millis(499)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(2)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// A slow wrapped function: the follow-up waits a full interval after it completes.
#[tokio::test(start_paused = true)]
async fn test_coalescing_with_slow_function() {
    let start = Instant::now();
    let delivered = Arc::new(Mutex::new(vec![]));

    let limiter = {
        let delivered = Arc::clone(&delivered);
        CoalescingAsyncRateLimiter::new(
            Duration::from_millis(100),
            |n: u64| async move {
                sleep(Duration::from_millis(300)).await;
                n
            },
            move |n: u64| delivered.lock().unwrap().push((n, Instant::now() - start)),
        )
    };

    // Nobody waits on the immediate execution; another task drives it.
    let first = {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.submit(1).await })
    };
    sleep(Duration::from_millis(50)).await;
    assert_eq!(limiter.state(), SlotState::Running);

    limiter.submit(2).await;
    limiter.submit(3).await;
    first.await.unwrap();

    // First completes at 300; the follow-up starts at 400 with the latest value and ends at 700.
    sleep(Duration::from_secs(1)).await;
    assert_eq!(
        *delivered.lock().unwrap(),
        vec![
            (1, Duration::from_millis(300)),
            (3, Duration::from_millis(700))
        ]
    );
    assert_eq!(limiter.state(), SlotState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_coalescing_from_config() {
    let config = RateLimitConfig::default();
    let delivered = Arc::new(AtomicUsize::new(0));

    let limiter = {
        let delivered = Arc::clone(&delivered);
        CoalescingAsyncRateLimiter::from_config(
            &config,
            |n: usize| async move { n },
            move |n: usize| {
                delivered.store(n, Ordering::SeqCst);
            },
        )
    };
    assert_eq!(limiter.interval(), Duration::from_secs(1));

    limiter.submit(1).await;
    limiter.submit(2).await;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(1001)).await;
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
}

/// Dropping a submission mid-execution does not lose parameters coalesced into it.
#[tokio::test(start_paused = true)]
async fn test_coalescing_dropped_submit_runs_follow_up() {
    let calls = Arc::new(Mutex::new(vec![]));

    let limiter = {
        let calls = Arc::clone(&calls);
        CoalescingAsyncRateLimiter::new(
            Duration::from_millis(100),
            move |n: u32| {
                calls.lock().unwrap().push(n);
                async move {
                    if n == 1 {
                        std::future::pending::<()>().await;
                    }
                    n
                }
            },
            |_: u32| {},
        )
    };

    {
        let mut stalled = limiter.submit(1).boxed();
        assert!(poll!(&mut stalled).is_pending());
        limiter.submit(2).await;
    }
    assert_eq!(limiter.state(), SlotState::Scheduled);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
    assert_eq!(limiter.state(), SlotState::Idle);
}
