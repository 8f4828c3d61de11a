use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::store::StoreError;

/// Exponential backoff for remote table calls. Only rate-limit class errors
/// (HTTP 429/503 semantics) are retried; everything else propagates on the
/// first occurrence with no delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // Matches the Sheets API quota behavior: a few quick retries, capped.
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests.
    #[cfg(test)]
    pub fn immediate(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 2.0,
            jitter: false,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let mut delay = exp.min(self.max_delay.as_secs_f64());
        if self.jitter && delay > 0.0 {
            // up to 25% extra, avoids thundering herd on shared quotas
            delay += rand::thread_rng().gen_range(0.0..=delay * 0.25);
        }
        Duration::from_secs_f64(delay)
    }

    /// Run `op`, retrying rate-limited failures with backoff. After the budget
    /// is exhausted the caller gets `StoreError::RateLimited` with a suggested
    /// retry-after, never a silent swallow.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        for attempt in 0..=self.max_retries {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_rate_limit() => {
                    if attempt == self.max_retries {
                        return Err(StoreError::RateLimited {
                            retry_after: self.max_delay,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "rate limited, waiting {:.1}s before attempt {}/{}",
                        delay.as_secs_f64(),
                        attempt + 2,
                        self.max_retries + 1
                    );
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop always returns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited() -> StoreError {
        StoreError::RateLimited {
            retry_after: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_succeeds_after_n_retryable_failures() {
        let policy = RetryPolicy::immediate(5);
        let mut attempts = 0;
        let result: Result<&str, _> = policy.run(|| {
            attempts += 1;
            if attempts <= 3 { Err(rate_limited()) } else { Ok("done") }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts, 4);
    }

    #[test]
    fn test_exhausted_budget_raises_rate_limited() {
        let policy = RetryPolicy::immediate(3);
        let mut attempts = 0;
        let result: Result<(), _> = policy.run(|| {
            attempts += 1;
            Err(rate_limited())
        });
        assert_eq!(attempts, 4); // max_retries + 1
        assert!(matches!(result, Err(StoreError::RateLimited { .. })));
    }

    #[test]
    fn test_non_retryable_error_propagates_immediately() {
        let policy = RetryPolicy::immediate(5);
        let mut attempts = 0;
        let result: Result<(), _> = policy.run(|| {
            attempts += 1;
            Err(StoreError::TableNotFound("Leads".to_string()))
        });
        assert_eq!(attempts, 1);
        assert!(matches!(result, Err(StoreError::TableNotFound(_))));
    }

    #[test]
    fn test_first_try_success_makes_one_attempt() {
        let policy = RetryPolicy::immediate(3);
        let mut attempts = 0;
        let result = policy.run(|| {
            attempts += 1;
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_delay_is_capped_at_max() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }
}
