//! Exponential-backoff retry over transient cluster-state errors.
//!
//! Cluster-state reads race with membership changes: a node that has just
//! left can still be referenced for a short while. Those errors are expected
//! and are absorbed here; every other error is surfaced on first sight.

use crate::error::{QueryError, Result};
use crate::{QueryClient, QueryResponse};
use decom_config::RetrySettings;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Shortest sleep between attempts; keeps the accumulated sleep growing.
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Backoff schedule plus the predicate deciding which errors are retried.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Sleep after the first retryable failure.
    pub initial_backoff: Duration,
    /// Factor applied to the sleep after every retry.
    pub multiplier: f64,
    /// Total sleep after which the last retryable error is returned.
    pub deadline: Duration,
    /// Decides whether an error is retried.
    pub retryable: fn(&QueryError) -> bool,
}

impl RetryPolicy {
    /// Policy retrying only transient cluster-state errors.
    pub fn new(initial_backoff: Duration, multiplier: f64, deadline: Duration) -> Self {
        Self {
            initial_backoff,
            multiplier,
            deadline,
            retryable: QueryError::is_transient_cluster_state,
        }
    }

    /// Replaces the retryable predicate.
    pub fn with_retryable(mut self, retryable: fn(&QueryError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(Duration::ZERO, 1.0, Duration::ZERO).with_retryable(|_| false)
    }

    /// Backoff of the first retry, never below [`MIN_BACKOFF`].
    fn first_backoff(&self) -> Duration {
        self.initial_backoff.clamp(MIN_BACKOFF, self.backoff_cap())
    }

    /// Grows `current` by the multiplier, capped at the deadline.
    fn next_backoff(&self, current: Duration) -> Duration {
        let cap = self.backoff_cap();
        let grown = current.as_secs_f64() * self.multiplier.max(1.0);
        Duration::try_from_secs_f64(grown).map_or(cap, |next| next.clamp(MIN_BACKOFF, cap))
    }

    fn backoff_cap(&self) -> Duration {
        self.deadline.max(MIN_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(
            settings.initial_backoff(),
            settings.multiplier,
            settings.deadline(),
        )
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("initial_backoff", &self.initial_backoff)
            .field("multiplier", &self.multiplier)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Executes a statement, retrying per `policy`.
///
/// Always makes at least one attempt. A retryable failure sleeps the current
/// backoff and retries until the accumulated sleep reaches the deadline, at
/// which point the last retryable error is returned. Non-retryable errors are
/// returned immediately. Each sleep lies between [`MIN_BACKOFF`] and the
/// deadline, so the loop ends for any policy.
pub async fn execute_with_retry(
    client: &dyn QueryClient,
    statement: &str,
    params: &[Value],
    policy: &RetryPolicy,
) -> Result<QueryResponse> {
    let mut waited = Duration::ZERO;
    let mut backoff = policy.first_backoff();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match client.execute(statement, params).await {
            Ok(response) => return Ok(response),
            Err(err) if (policy.retryable)(&err) => {
                if waited >= policy.deadline {
                    warn!(
                        endpoint = %client.endpoint(),
                        attempt,
                        waited_ms = waited.as_millis() as u64,
                        error = %err,
                        "retry deadline exhausted"
                    );
                    return Err(err);
                }
                debug!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "transient query failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                waited += backoff;
                backoff = policy.next_backoff(backoff);
            }
            Err(err) => return Err(err),
        }
    }
}

/// A [`RetryPolicy`] bound to call sites that share it.
#[derive(Debug, Clone, Default)]
pub struct RetryingExecutor {
    policy: RetryPolicy,
}

impl RetryingExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// See [`execute_with_retry`].
    pub async fn execute(
        &self,
        client: &dyn QueryClient,
        statement: &str,
        params: &[Value],
    ) -> Result<QueryResponse> {
        execute_with_retry(client, statement, params, &self.policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Replays scripted outcomes; once exhausted it repeats the fallback.
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<QueryResponse>>>,
        fallback: fn() -> Result<QueryResponse>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(
            script: Vec<Result<QueryResponse>>,
            fallback: fn() -> Result<QueryResponse>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryClient for ScriptedClient {
        async fn execute(&self, _statement: &str, _params: &[Value]) -> Result<QueryResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(self.fallback)
        }

        async fn execute_bulk(
            &self,
            statement: &str,
            _bulk_params: &[Vec<Value>],
        ) -> Result<QueryResponse> {
            self.execute(statement, &[]).await
        }

        fn endpoint(&self) -> String {
            "scripted".to_string()
        }
    }

    fn transient() -> Result<QueryResponse> {
        Err(QueryError::sql("Node 'n1' not found in cluster state"))
    }

    fn fatal() -> Result<QueryResponse> {
        Err(QueryError::sql("SQLParseException: boom"))
    }

    fn ok() -> Result<QueryResponse> {
        Ok(QueryResponse::affected(0))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(10), 2.0, Duration::from_millis(10_500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_passes_through() {
        let client = ScriptedClient::new(vec![], ok);
        let resp = execute_with_retry(&client, "select 1", &[], &policy())
            .await
            .unwrap();
        assert_eq!(resp, QueryResponse::affected(0));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_absorbed_until_success() {
        let client = ScriptedClient::new(vec![transient(), transient(), transient()], ok);
        let start = Instant::now();
        execute_with_retry(&client, "select 1", &[], &policy())
            .await
            .unwrap();
        assert_eq!(client.calls(), 4);
        // 10 + 20 + 40 ms of backoff.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(70), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(80), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_surfaces_immediately() {
        let client = ScriptedClient::new(vec![transient(), fatal()], ok);
        let err = execute_with_retry(&client, "select 1", &[], &policy())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SQLParseException"));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_transient_fails_after_deadline() {
        let client = ScriptedClient::new(vec![], transient);
        let start = Instant::now();
        let err = execute_with_retry(&client, "select 1", &[], &policy())
            .await
            .unwrap_err();
        assert!(err.is_transient_cluster_state());
        // 10ms doubling: sleeps sum to 10 * (2^k - 1); first sum >= 10.5s is 20.47s at k = 11.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(20_470), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(20_500), "{elapsed:?}");
        assert_eq!(client.calls(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_deadline_still_attempts_once() {
        let client = ScriptedClient::new(vec![], transient);
        let policy = RetryPolicy::new(Duration::from_millis(10), 2.0, Duration::ZERO);
        assert!(
            execute_with_retry(&client, "select 1", &[], &policy)
                .await
                .is_err()
        );
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_policy() {
        let client = ScriptedClient::new(vec![transient()], ok);
        let executor = RetryingExecutor::new(RetryPolicy::no_retry());
        assert!(executor.execute(&client, "select 1", &[]).await.is_err());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let client = ScriptedClient::new(vec![fatal()], ok);
        let policy = policy().with_retryable(|_| true);
        assert!(
            execute_with_retry(&client, "select 1", &[], &policy)
                .await
                .is_ok()
        );
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_backoff_still_reaches_deadline() {
        let client = ScriptedClient::new(vec![], transient);
        let policy = RetryPolicy::new(Duration::ZERO, 2.0, Duration::from_millis(100));
        let start = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            execute_with_retry(&client, "select 1", &[], &policy),
        )
        .await
        .expect("retry loop must end at the deadline");
        assert!(result.unwrap_err().is_transient_cluster_state());
        // 1 + 2 + 4 + ... + 64 = 127ms is the first sum past 100ms.
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_multiplier_with_zero_backoff_terminates() {
        let client = ScriptedClient::new(vec![], transient);
        let policy = RetryPolicy::new(Duration::ZERO, 1.0, Duration::from_millis(20));
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            execute_with_retry(&client, "select 1", &[], &policy),
        )
        .await
        .expect("retry loop must end at the deadline");
        assert!(result.is_err());
        assert_eq!(client.calls(), 21);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_finite_multiplier_is_capped() {
        for multiplier in [f64::INFINITY, f64::NAN, f64::MAX] {
            let client = ScriptedClient::new(vec![], transient);
            let policy = RetryPolicy::new(Duration::from_millis(10), multiplier, Duration::from_millis(50));
            let start = Instant::now();
            assert!(
                execute_with_retry(&client, "select 1", &[], &policy)
                    .await
                    .is_err()
            );
            assert!(start.elapsed() < Duration::from_millis(200), "{multiplier}");
        }
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = RetryPolicy::from(&RetrySettings::default());
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(policy.deadline, Duration::from_millis(10_500));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
    }

    proptest! {
        /// Fewer transient failures than fit in the deadline always converge to success.
        #[test]
        fn transient_prefix_converges(failures in 0usize..10) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let client = ScriptedClient::new((0..failures).map(|_| transient()).collect(), ok);
            let result = rt.block_on(execute_with_retry(&client, "select 1", &[], &policy()));
            prop_assert!(result.is_ok());
            prop_assert_eq!(client.calls(), failures + 1);
        }

        /// A condition that never clears fails no earlier than the deadline.
        #[test]
        fn never_fails_before_deadline(initial_ms in 1u64..200, deadline_ms in 0u64..5_000) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let client = ScriptedClient::new(vec![], transient);
            let policy = RetryPolicy::new(
                Duration::from_millis(initial_ms),
                2.0,
                Duration::from_millis(deadline_ms),
            );
            let elapsed = rt.block_on(async {
                let start = Instant::now();
                let result = execute_with_retry(&client, "select 1", &[], &policy).await;
                assert!(result.is_err());
                start.elapsed()
            });
            prop_assert!(elapsed >= Duration::from_millis(deadline_ms));
        }
    }
}
