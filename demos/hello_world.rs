//! Construct a leading limiter and a coalescing limiter that each run at most once a second.
//! Hammer both with random requests and watch what gets through.
//!
//! Run with `RUST_LOG=call_rate_limiter=trace` to see the scheduling decisions.

use std::time::Duration;

use call_rate_limiter::{CoalescingAsyncRateLimiter, LeadingRateLimiter};

use rand::{thread_rng, Rng};
use tokio::time::{sleep, Instant};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let start = Instant::now();

    let refresh = LeadingRateLimiter::new(Duration::from_secs(1), move || {
        info!(at = ?(Instant::now() - start), "refreshing");
    });

    let save = CoalescingAsyncRateLimiter::new(
        Duration::from_secs(1),
        |draft: u32| async move {
            sleep(Duration::from_millis(200)).await;
            format!("draft #{draft}")
        },
        move |saved: String| info!(at = ?(Instant::now() - start), %saved, "saved"),
    );

    for draft in 0..50 {
        let pause = thread_rng().gen_range(10..200);
        sleep(Duration::from_millis(pause)).await;
        refresh.trigger();
        save.submit(draft).await;
    }

    // Let the last deferred runs finish.
    sleep(Duration::from_secs(2)).await;
}
