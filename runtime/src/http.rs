use std::time::Duration;

use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Builds a pooled client. Construct once per collaborator and reuse across turns.
pub fn client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("ordersight/", env!("CARGO_PKG_VERSION")))
        .build()
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("request returned status {status} after {attempts} attempt(s)")]
    Status { status: StatusCode, attempts: u32 },
}

impl HttpError {
    pub fn attempts(&self) -> u32 {
        match self {
            HttpError::Transport { attempts, .. } | HttpError::Status { attempts, .. } => *attempts,
        }
    }
}

/// Bounded retry with exponential backoff, applied to idempotent reads only.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each following retry
    pub backoff_base: Duration,
    pub retry_statuses: Vec<StatusCode>,
}

impl RetryPolicy {
    /// Five attempts, 0.5s initial backoff, retrying 400-404 and 500/502-504.
    pub fn authorization_default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(500),
            retry_statuses: [400, 401, 402, 403, 404, 500, 502, 503, 504]
                .into_iter()
                .filter_map(|code| StatusCode::from_u16(code).ok())
                .collect(),
        }
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Delay slept before attempt `attempt` (1-based; the first attempt never waits).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }

    pub fn retries_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status)
    }

    fn retries_method(method: &Method) -> bool {
        matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    /// Sends `request`, retrying transport errors and listed statuses.
    ///
    /// Returns the first 2xx response. Non-idempotent requests are sent exactly once.
    pub async fn send(
        &self,
        client: &reqwest::Client,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, HttpError> {
        let max_attempts = if Self::retries_method(request.method()) {
            self.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 0;
        let mut next = Some(request);
        while let Some(current) = next.take() {
            attempt += 1;
            if attempt < max_attempts {
                next = current.try_clone();
            }
            let can_retry = next.is_some();

            tokio::time::sleep(self.delay_before(attempt)).await;
            match client.execute(current).await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    if !(can_retry && self.retries_status(status)) {
                        return Err(HttpError::Status {
                            status,
                            attempts: attempt,
                        });
                    }
                    tracing::debug!(attempt, status = %status, "retrying request after status");
                }
                Err(source) => {
                    if !can_retry {
                        return Err(HttpError::Transport {
                            attempts: attempt,
                            source,
                        });
                    }
                    tracing::debug!(attempt, error = %source, "retrying request after transport error");
                }
            }
        }
        unreachable!("the final attempt always returns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::authorization_default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(2000));
        assert_eq!(policy.delay_before(5), Duration::from_millis(4000));
    }

    #[test]
    fn default_policy_retries_client_and_server_statuses() {
        let policy = RetryPolicy::authorization_default();
        assert_eq!(policy.max_attempts, 5);
        for code in [400u16, 401, 402, 403, 404, 500, 502, 503, 504] {
            assert!(policy.retries_status(StatusCode::from_u16(code).unwrap()), "{code}");
        }
        assert!(!policy.retries_status(StatusCode::CONFLICT));
        assert!(!policy.retries_status(StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn only_idempotent_reads_are_retried() {
        assert!(RetryPolicy::retries_method(&Method::GET));
        assert!(!RetryPolicy::retries_method(&Method::POST));
    }
}
