//! # Call Rate Limiter
//! Wrap a function so that it is invoked no more often than once per interval, without losing the
//! most recent request. Two flavours are provided:
//!
//! * [`LeadingRateLimiter`] wraps a synchronous, argument-less function. The first call runs it
//!   immediately; calls that come too soon afterwards collapse into a single run at the end of
//!   the interval.
//! * [`CoalescingAsyncRateLimiter`] wraps an async function of one parameter. Each run uses the
//!   parameters of the most recent submission, and its result is delivered to a callback.
//!
//! Time and scheduling are injected through the [`Clock`] and [`Timer`] traits. The defaults use
//! tokio; [`manual`] has hand-driven versions for tests.
//!
//! # Example
//! Here, a search is rate limited to once every 100ms. The first query runs straight away. The
//! next two arrive too soon and are coalesced, so only the last one is searched for, once the
//! interval is up.
//! ```
//! # use std::sync::{Arc, Mutex};
//! # use std::time::Duration;
//! # use call_rate_limiter::CoalescingAsyncRateLimiter;
//! # #[tokio::main]
//! # async fn main() {
//!     let searched = Arc::new(Mutex::new(Vec::<String>::new()));
//!     let results = Arc::clone(&searched);
//!     let limiter = CoalescingAsyncRateLimiter::new(
//!         Duration::from_millis(100),
//!         |query: String| async move { format!("results for {query}") },
//!         move |found: String| results.lock().unwrap().push(found),
//!     );
//!
//!     limiter.submit("r".to_string()).await;
//!     limiter.submit("ru".to_string()).await;
//!     limiter.submit("rust".to_string()).await;
//!     tokio::time::sleep(Duration::from_millis(250)).await;
//!
//!     assert_eq!(
//!         *searched.lock().unwrap(),
//!         vec!["results for r".to_string(), "results for rust".to_string()]
//!     );
//! # }
//! ```
//!
//! # Limitations
//! There is no way to cancel a scheduled run; a limiter is meant to live as long as the function
//! it wraps. Panics in the wrapped function are not caught.

mod clock;
mod coalescing;
mod config;
mod leading;
pub mod manual;
mod revision;
mod slot;
mod window;

pub use clock::{Clock, Timer, TokioClock, TokioTimer};
pub use coalescing::CoalescingAsyncRateLimiter;
pub use config::{load_config, ConfigError, RateLimitConfig};
pub use leading::LeadingRateLimiter;
pub use slot::SlotState;
