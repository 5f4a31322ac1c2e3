//! Retrying wrapper around the external pair query capability.
//!
//! Each logical query runs a small state machine:
//!
//! ```text
//! Idle -> Querying -> Succeeded
//!            |  ^
//!            v  |
//!         Retrying          (retry_delay, counted against max_retries)
//!            |
//!   Querying -> ReAuthenticating -> Querying   (once per query, not counted)
//!            |
//!            v
//!          Failed
//! ```
//!
//! `inter_query_delay` is applied after every logical query, success or
//! failure, to respect upstream rate limits.
//!
//! Concurrent queries that hit the same expired session share one login.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::client::{Credentials, PairQueryClient, Session};
use crate::config::EngineConfig;
use crate::domain::{FailureKind, PairQueryResult, Source};
use crate::error::{AuthError, CatalogError, QueryError, QueryFailure};
use crate::metrics::{QueryMetrics, QueryMetricsSnapshot};

/// Retry, delay, and timeout bounds for one runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per query (at least 1).
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub inter_query_delay: Duration,
    pub query_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay,
            inter_query_delay: config.inter_query_delay,
            query_timeout: config.query_timeout,
        }
    }
}

#[derive(Debug)]
enum QueryState {
    Idle,
    Querying { attempt: u32 },
    Retrying { attempt: u32, error: QueryError },
    /// `stale` is the token the failed attempt carried.
    ReAuthenticating { attempt: u32, stale: String },
    Succeeded(PairQueryResult),
    Failed(QueryFailure),
}

/// Wraps a [`PairQueryClient`] with bounded retry and session renewal.
///
/// Safe to share across concurrent propagation queries. Renewal is
/// serialized: queries that saw the same expired token share one login.
pub struct RetryingQueryRunner {
    client: Arc<dyn PairQueryClient>,
    credentials: Credentials,
    session: RwLock<Session>,
    renewal: Mutex<()>,
    policy: RetryPolicy,
    metrics: QueryMetrics,
}

impl RetryingQueryRunner {
    /// Log in and build a runner around the resulting session.
    pub async fn connect(
        client: Arc<dyn PairQueryClient>,
        credentials: Credentials,
        policy: RetryPolicy,
    ) -> Result<Self, AuthError> {
        let session = client.login(&credentials).await?;
        debug!(issued_at = %session.issued_at, "session established");
        Ok(Self {
            client,
            credentials,
            session: RwLock::new(session),
            renewal: Mutex::new(()),
            policy,
            metrics: QueryMetrics::new(),
        })
    }

    pub fn metrics(&self) -> QueryMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn flush_metrics(&self) {
        self.metrics.flush();
    }

    /// List sources with the current session, renewing it once if it expired.
    pub async fn list_sources(&self) -> Result<Vec<Source>, CatalogError> {
        let session = self.session.read().await.clone();
        match self.client.list_sources(&session).await {
            Err(CatalogError::AuthExpired) => {
                self.reauthenticate(&session.token)
                    .await
                    .map_err(|e| CatalogError::Unavailable(e.to_string()))?;
                let session = self.session.read().await.clone();
                self.client.list_sources(&session).await
            }
            other => other,
        }
    }

    /// Query the pair average of `x` and `y` under the retry policy.
    pub async fn query(&self, x: &Source, y: &Source) -> Result<PairQueryResult, QueryFailure> {
        self.metrics.inc_queries();
        let max_attempts = self.policy.max_retries.max(1);
        let mut reauth_used = false;
        let mut state = QueryState::Idle;

        let outcome = loop {
            state = match state {
                QueryState::Idle => QueryState::Querying { attempt: 1 },
                QueryState::Querying { attempt } => {
                    let session = self.session.read().await.clone();
                    let result = self.attempt(&session, x, y, attempt).await;
                    match result {
                        Ok(result) => QueryState::Succeeded(result),
                        Err(QueryError::AuthExpired) if !reauth_used => {
                            reauth_used = true;
                            QueryState::ReAuthenticating {
                                attempt,
                                stale: session.token,
                            }
                        }
                        Err(error) if attempt < max_attempts => QueryState::Retrying { attempt, error },
                        Err(error) => QueryState::Failed(QueryFailure::new(&error, attempt)),
                    }
                }
                QueryState::ReAuthenticating { attempt, stale } => match self.reauthenticate(&stale).await {
                    Ok(()) => QueryState::Querying { attempt },
                    Err(e) => QueryState::Failed(QueryFailure {
                        kind: FailureKind::AuthExpired,
                        attempts: attempt,
                        detail: format!("re-authentication failed: {e}"),
                    }),
                },
                QueryState::Retrying { attempt, error } => {
                    debug!(x = %x, y = %y, attempt, error = %error, "retrying pair query");
                    self.metrics.inc_retries();
                    if !self.policy.retry_delay.is_zero() {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                    QueryState::Querying { attempt: attempt + 1 }
                }
                QueryState::Succeeded(result) => break Ok(result),
                QueryState::Failed(failure) => break Err(failure),
            };
        };

        if let Err(failure) = &outcome {
            self.metrics.inc_failures();
            warn!(x = %x, y = %y, kind = %failure.kind, attempts = failure.attempts, "pair query failed");
        }
        if !self.policy.inter_query_delay.is_zero() {
            tokio::time::sleep(self.policy.inter_query_delay).await;
        }
        outcome
    }

    async fn attempt(
        &self,
        session: &Session,
        x: &Source,
        y: &Source,
        attempt: u32,
    ) -> Result<PairQueryResult, QueryError> {
        self.metrics.inc_attempts();
        let limit = self.policy.query_timeout;

        let rows = match tokio::time::timeout(limit, self.client.query_pair(session, x, y)).await {
            Ok(rows) => rows?,
            Err(_elapsed) => {
                self.metrics.inc_timeouts();
                return Err(QueryError::Timeout {
                    limit_ms: limit.as_millis() as u64,
                });
            }
        };

        let result = PairQueryResult::from_rows(x.id(), y.id(), rows, attempt);
        if result.is_empty() {
            return Err(QueryError::EmptyResult);
        }
        debug!(x = %x, y = %y, entities = result.averages.len(), attempt, "pair query succeeded");
        Ok(result)
    }

    /// Replace the session that carried `stale`.
    ///
    /// A no-op when another query already renewed it while this one waited.
    async fn reauthenticate(&self, stale: &str) -> Result<(), AuthError> {
        let _renewal = self.renewal.lock().await;
        if self.session.read().await.token != stale {
            debug!("session already renewed by a concurrent query");
            return Ok(());
        }
        self.metrics.inc_reauthentications();
        let fresh = self.client.login(&self.credentials).await?;
        info!(issued_at = %fresh.issued_at, "session renewed");
        *self.session.write().await = fresh;
        Ok(())
    }
}
