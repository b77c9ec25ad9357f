// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bounded retry with exponential backoff for networked storage.
//!
//! Only transient faults are retried: dropped connections, pool exhaustion,
//! serialization conflicts and server restarts. Domain outcomes (duplicate,
//! not found, validation) surface immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::DatabaseSettings;
use crate::domain::repository::RepositoryError;

const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// Worth another attempt.
    Transient(String),
    /// Final; returned to the caller as is.
    Fatal(RepositoryError),
}

impl AttemptError {
    pub fn classify(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
            _ => false,
        };
        if transient {
            AttemptError::Transient(err.to_string())
        } else {
            AttemptError::Fatal(RepositoryError::StorageUnavailable(err.to_string()))
        }
    }
}

impl From<RepositoryError> for AttemptError {
    fn from(err: RepositoryError) -> Self {
        AttemptError::Fatal(err)
    }
}

/// Connection exceptions (class 08), serialization failure, deadlock,
/// server shutdown and too-many-connections.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "53300" | "57P01" | "57P02" | "57P03")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            base_delay: settings.retry_delay,
        }
    }

    /// Delay before the attempt following attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }

    /// Run `attempt` until it succeeds, fails fatally, or attempts run out.
    /// The closure receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, RepositoryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut last_error = String::new();
        for n in 0..self.max_attempts {
            match attempt(n).await {
                Ok(value) => {
                    if n > 0 {
                        info!(operation, attempt = n + 1, "Storage operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(reason)) => {
                    warn!(
                        operation,
                        attempt = n + 1,
                        max_attempts = self.max_attempts,
                        error = %reason,
                        "Transient storage failure"
                    );
                    last_error = reason;
                    if n + 1 < self.max_attempts {
                        tokio::time::sleep(self.delay_for(n)).await;
                    }
                }
            }
        }
        Err(RepositoryError::StorageUnavailable(format!(
            "{} failed after {} attempt(s): {}",
            operation, self.max_attempts, last_error
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(20), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("read", |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AttemptError::Transient("connection reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(5)
            .run("create", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(AttemptError::Fatal(RepositoryError::DuplicateId {
                        entity: "agent",
                        id: "x".into(),
                    }))
                }
            })
            .await;

        assert!(result.unwrap_err().is_duplicate());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_storage_unavailable() {
        let result: Result<(), _> = policy(2)
            .run("list", |_| async { Err(AttemptError::Transient("server closed the connection".into())) })
            .await;

        match result {
            Err(RepositoryError::StorageUnavailable(reason)) => {
                assert!(reason.contains("list failed after 2 attempt(s)"));
                assert!(reason.contains("server closed the connection"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_classification() {
        assert!(matches!(AttemptError::classify(sqlx::Error::PoolTimedOut), AttemptError::Transient(_)));
        assert!(matches!(AttemptError::classify(sqlx::Error::RowNotFound), AttemptError::Fatal(_)));
        assert!(is_transient_sqlstate("08006"));
        assert!(is_transient_sqlstate("40001"));
        assert!(!is_transient_sqlstate("23505"));
    }
}
