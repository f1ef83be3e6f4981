//! Bounded retry of transport failures.

use std::thread;
use std::time::Duration;

use stepverify_authority::AuthorityError;
use tracing::warn;

use crate::error::{ReplayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles after every failed attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(200),
                max: Duration::from_secs(5),
            },
        }
    }
}

impl RetryPolicy {
    /// A single attempt.
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Delay before attempt `attempt + 1`, after `attempt` failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }

    /// Run `call`, repeating it while it fails at the transport level.
    /// Other errors are returned immediately.
    pub fn run<T>(
        &self,
        what: &str,
        mut call: impl FnMut() -> std::result::Result<T, AuthorityError>,
    ) -> Result<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() && attempt < max_attempts => {
                    let delay = self.delay(attempt);
                    warn!(what, attempt, max_attempts, ?delay, "transport failure, retrying: {e}");
                    thread::sleep(delay);
                }
                Err(e) if e.is_transport() => {
                    return Err(ReplayError::RetriesExhausted {
                        what: what.to_string(),
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::net::TcpListener;
    use stepverify_authority::rpc::RpcClient;

    #[test]
    fn retries_transport_failures_until_success() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let mut calls = 0;
        let value = policy
            .run("step", || {
                calls += 1;
                if calls < 3 {
                    Err(AuthorityError::Transport("reset".into()))
                } else {
                    Ok(calls)
                }
            })
            .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn exhaustion_is_reported_with_attempt_count() {
        let policy = RetryPolicy::fixed(2, Duration::ZERO);
        let result: Result<()> =
            policy.run("step", || Err(AuthorityError::Transport("down".into())));
        assert!(matches!(
            result,
            Err(ReplayError::RetriesExhausted { attempts: 2, .. })
        ));
    }

    #[test]
    fn non_transport_errors_are_not_retried() {
        let policy = RetryPolicy::fixed(5, Duration::ZERO);
        let mut calls = 0;
        let result: Result<()> = policy.run("step", || {
            calls += 1;
            Err(AuthorityError::Decode("garbage".into()))
        });
        assert!(matches!(result, Err(ReplayError::Authority(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn timeouts_are_retried_like_other_transport_failures() {
        // Accepts connections into its backlog but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap())
            .parse()
            .unwrap();
        let client = RpcClient::new(url, Duration::from_millis(100)).unwrap();

        let policy = RetryPolicy::fixed(2, Duration::ZERO);
        let mut calls = 0;
        let result: Result<Value> = policy.run("eth_blockNumber", || {
            calls += 1;
            client.rpc_request("eth_blockNumber", json!([]))
        });
        assert!(matches!(
            result,
            Err(ReplayError::RetriesExhausted {
                attempts: 2,
                last: AuthorityError::Timeout { .. },
                ..
            })
        ));
        assert_eq!(calls, 2);
        drop(listener);
    }

    #[test]
    fn exponential_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_millis(350),
            },
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(350));
    }
}
