//! The external pairwise-average capability.
//!
//! The engine never inspects how a client is implemented (UI automation, an
//! HTTP API, a fixture file). Implement [`PairQueryClient`] to plug one in;
//! [`crate::fakes::ScriptedPairClient`] is the deterministic test double.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{RankedEntity, Source};
use crate::error::{AuthError, CatalogError, QueryError};

/// Login credentials for the external capability.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// An authenticated session handle issued by [`PairQueryClient::login`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            issued_at: Utc::now(),
        }
    }
}

/// Pairwise-average data source.
///
/// Guarantees expected of implementations:
/// - `query_pair(s, x, y)` returns the per-entity average of x's and y's values
///   over the entities the upstream returned for that pair.
/// - A stale session yields `QueryError::AuthExpired` rather than a transport error.
#[async_trait]
pub trait PairQueryClient: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError>;

    /// List every source that can be paired, in upstream order.
    async fn list_sources(&self, session: &Session) -> Result<Vec<Source>, CatalogError>;

    async fn query_pair(
        &self,
        session: &Session,
        x: &Source,
        y: &Source,
    ) -> Result<Vec<RankedEntity>, QueryError>;
}
