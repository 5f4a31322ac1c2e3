//! In-memory fake for [`PairQueryClient`] (testing and fixtures)
//!
//! `ScriptedPairClient` answers pair queries with the exact average of two
//! sources' known individual values and lets tests script failures, stalls,
//! session expiry, and latency per pair.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{Credentials, PairQueryClient, Session};
use crate::domain::{EntityId, PairKey, RankedEntity, Source, SourceId};
use crate::error::{AuthError, CatalogError, QueryError};

#[derive(Debug, Default)]
struct ScriptState {
    sources: Vec<Source>,
    values: HashMap<SourceId, BTreeMap<EntityId, f64>>,
    labels: HashMap<EntityId, String>,
    pair_results: HashMap<PairKey, Vec<(EntityId, f64)>>,
    scripted: HashMap<PairKey, VecDeque<QueryError>>,
    permanent: HashMap<PairKey, QueryError>,
    unavailable: HashMap<SourceId, QueryError>,
    stalls: HashMap<PairKey, usize>,
    listing_error: Option<String>,
    reject_logins: bool,
    valid_token: Option<String>,
    logins: usize,
    calls: Vec<PairKey>,
}

/// Deterministic pair-query double.
#[derive(Debug, Default)]
pub struct ScriptedPairClient {
    state: Mutex<ScriptState>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedPairClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(x: &str, y: &str) -> PairKey {
        PairKey::new(&SourceId::from(x), &SourceId::from(y))
    }

    /// List `source` with its individual values.
    pub fn with_source(self, source: Source, values: &[(&str, f64)]) -> Self {
        {
            let mut state = self.state();
            let id = source.id();
            state
                .values
                .insert(id, values.iter().map(|(e, v)| (EntityId::from(*e), *v)).collect());
            state.sources.push(source);
        }
        self
    }

    pub fn with_label(self, entity: &str, label: &str) -> Self {
        self.state()
            .labels
            .insert(EntityId::from(entity), label.to_string());
        self
    }

    /// Answer the pair with these averages instead of computing them.
    pub fn with_pair_result(self, x: &str, y: &str, averages: &[(&str, f64)]) -> Self {
        let rows = averages
            .iter()
            .map(|(e, v)| (EntityId::from(*e), *v))
            .collect();
        self.state().pair_results.insert(Self::key(x, y), rows);
        self
    }

    /// Fail the next queries for the pair with `errors`, in order, then succeed.
    pub fn fail_pair(self, x: &str, y: &str, errors: Vec<QueryError>) -> Self {
        self.state()
            .scripted
            .entry(Self::key(x, y))
            .or_default()
            .extend(errors);
        self
    }

    /// Fail every query for the pair.
    pub fn fail_pair_always(self, x: &str, y: &str, error: QueryError) -> Self {
        self.state().permanent.insert(Self::key(x, y), error);
        self
    }

    /// Fail every query involving `source`.
    pub fn fail_source_always(self, source: &str, error: QueryError) -> Self {
        self.state().unavailable.insert(SourceId::from(source), error);
        self
    }

    /// Never answer the next `times` queries for the pair.
    pub fn stall_pair(self, x: &str, y: &str, times: usize) -> Self {
        self.state().stalls.insert(Self::key(x, y), times);
        self
    }

    pub fn fail_listing(self, reason: &str) -> Self {
        self.state().listing_error = Some(reason.to_string());
        self
    }

    /// Delay every answered query by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Invalidate the current session; the next query sees `AuthExpired`.
    pub fn expire_sessions(&self) {
        self.state().valid_token = None;
    }

    pub fn reject_logins(&self) {
        self.state().reject_logins = true;
    }

    pub fn login_count(&self) -> usize {
        self.state().logins
    }

    pub fn query_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn queries_for(&self, x: &str, y: &str) -> usize {
        let key = Self::key(x, y);
        self.state().calls.iter().filter(|k| **k == key).count()
    }

    /// Highest number of queries observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn answer(&self, session: &Session, x: &SourceId, y: &SourceId) -> Result<Vec<RankedEntity>, QueryError> {
        let key = PairKey::new(x, y);
        let mut state = self.state();

        if let Some(error) = state.scripted.get_mut(&key).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if let Some(error) = state.permanent.get(&key) {
            return Err(error.clone());
        }
        for id in [x, y] {
            if let Some(error) = state.unavailable.get(id) {
                return Err(error.clone());
            }
        }
        if state.valid_token.as_deref() != Some(session.token.as_str()) {
            return Err(QueryError::AuthExpired);
        }

        let label = |id: &EntityId| state.labels.get(id).cloned().unwrap_or_default();
        if let Some(rows) = state.pair_results.get(&key) {
            return Ok(rows
                .iter()
                .map(|(id, avg)| RankedEntity::new(id.as_str(), label(id), *avg))
                .collect());
        }

        let (Some(xs), Some(ys)) = (state.values.get(x), state.values.get(y)) else {
            return Err(QueryError::Transport(format!("unknown pair {key}")));
        };
        Ok(xs
            .iter()
            .filter_map(|(id, xv)| ys.get(id).map(|yv| (id, (xv + yv) / 2.0)))
            .map(|(id, avg)| RankedEntity::new(id.as_str(), label(id), avg))
            .collect())
    }
}

#[async_trait]
impl PairQueryClient for ScriptedPairClient {
    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let mut state = self.state();
        if state.reject_logins {
            return Err(AuthError::Rejected(format!(
                "login refused for '{}'",
                credentials.username
            )));
        }
        state.logins += 1;
        let session = Session::new(format!("session-{}", state.logins));
        state.valid_token = Some(session.token.clone());
        Ok(session)
    }

    async fn list_sources(&self, session: &Session) -> Result<Vec<Source>, CatalogError> {
        let state = self.state();
        if let Some(reason) = &state.listing_error {
            return Err(CatalogError::Unavailable(reason.clone()));
        }
        if state.valid_token.as_deref() != Some(session.token.as_str()) {
            return Err(CatalogError::AuthExpired);
        }
        Ok(state.sources.clone())
    }

    async fn query_pair(
        &self,
        session: &Session,
        x: &Source,
        y: &Source,
    ) -> Result<Vec<RankedEntity>, QueryError> {
        let (x, y) = (x.id(), y.id());
        let key = PairKey::new(&x, &y);
        let stalled = {
            let mut state = self.state();
            state.calls.push(key.clone());
            match state.stalls.get_mut(&key) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.answer(session, &x, &y)
    }
}

/// Counts one query in flight until dropped, including when the caller
/// abandons the future mid-latency.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, high_water: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        high_water.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
