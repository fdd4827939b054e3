//! Backoff schedules for reconnecting to remote services.
//!
//! A schedule is an [`Iterator`] with `Item = Duration`; every call to `next` yields how long
//! the caller should cool off before its next attempt. Schedules never fail, an exhausted
//! schedule keeps repeating its last (longest) delay, so callers can back off indefinitely
//! without bookkeeping of their own.
//!
//! ```rust
//! use std::time::Duration;
//! use backoff::strategy::stepped::Stepped;
//!
//! let mut schedule = Stepped::from_secs(&[5, 10, 30]);
//! assert_eq!(schedule.next(), Some(Duration::from_secs(5)));
//! assert_eq!(schedule.next(), Some(Duration::from_secs(10)));
//! assert_eq!(schedule.next(), Some(Duration::from_secs(30)));
//! assert_eq!(schedule.next(), Some(Duration::from_secs(30)));
//! ```

/// strategy has all the different backoff strategies. It is an iterator with Item=Duration.
pub mod strategy;
