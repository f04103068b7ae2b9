//! Retry/backoff helper for recoverable operations.
//!
//! Callers signal retryability explicitly through [`RetryError`] instead of
//! letting the helper guess from error text; the stderr heuristic lives in
//! `runtime::remote::is_transient_wsl_error` and feeds this discriminant.

use std::time::Duration;

use crate::errors::{Error, Result};

/// Pure retry configuration, no mutable state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

/// Transient failures are retried with backoff; fatal ones stop immediately.
#[derive(Debug)]
pub enum RetryError {
    Transient(Error),
    Fatal(Error),
}

impl RetryError {
    pub fn into_inner(self) -> Error {
        match self {
            RetryError::Transient(e) | RetryError::Fatal(e) => e,
        }
    }
}

fn scale(backoff: Duration, multiplier: f64) -> Duration {
    Duration::from_secs_f64(backoff.as_secs_f64() * multiplier)
}

/// Run `operation` up to `policy.max_attempts` times. Backoff sleeps go
/// through the injected `sleep` so shutdown paths and tests can interrupt or
/// observe them.
pub fn run_with_retry<T>(
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
    mut operation: impl FnMut() -> std::result::Result<T, RetryError>,
) -> Result<T> {
    let mut backoff = policy.initial_backoff;
    let mut last_error: Option<Error> = None;

    for attempt in 1..=policy.max_attempts {
        match operation() {
            Ok(value) => return Ok(value),
            Err(RetryError::Fatal(e)) => return Err(e),
            Err(RetryError::Transient(e)) => {
                last_error = Some(e);
                if attempt >= policy.max_attempts {
                    break;
                }
                sleep(backoff);
                backoff = scale(backoff, policy.multiplier);
            }
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => Err(Error::runtime(
            "Retry policy exhausted without executing operation.",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient(msg: &str) -> RetryError {
        RetryError::Transient(Error::runtime(msg))
    }

    #[test]
    fn retries_transient_until_success() {
        let policy = RetryPolicy::default();
        let mut slept = Vec::new();
        let mut calls = 0;
        let result = run_with_retry(
            &policy,
            |d| slept.push(d),
            || {
                calls += 1;
                if calls < 3 {
                    Err(transient("flaky"))
                } else {
                    Ok(calls)
                }
            },
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            slept,
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[test]
    fn fatal_stops_immediately() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<()> = run_with_retry(
            &policy,
            |_| panic!("must not sleep on fatal"),
            || {
                calls += 1;
                Err(RetryError::Fatal(Error::validation("bad input")))
            },
        );
        assert_eq!(calls, 1);
        assert_eq!(result.unwrap_err().message(), "bad input");
    }

    #[test]
    fn exhausted_attempts_return_last_error() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let mut calls = 0;
        let result: Result<()> = run_with_retry(
            &policy,
            |_| {},
            || {
                calls += 1;
                Err(transient(&format!("attempt {calls}")))
            },
        );
        assert_eq!(calls, 2);
        assert_eq!(result.unwrap_err().message(), "attempt 2");
    }

    #[test]
    fn zero_attempts_is_an_error() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let result: Result<()> = run_with_retry(&policy, |_| {}, || Ok(()));
        assert!(result.is_err());
    }
}
