//! Per-request tracking context.
//!
//! The middleware inserts a [`TrackingContext`] into the request extensions
//! before running the rest of the chain. Handlers take it as an extractor and
//! use it to annotate or veto the pending beacon. Nothing here does I/O.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

use crate::tracking::params::{BeaconParams, SEARCH, SEARCH_CATEGORY, SEARCH_COUNT};

/// Optional details of a site search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Number of results the search returned.
    pub count: Option<u64>,
    /// Search category.
    pub category: Option<String>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Everything accumulated for one request's beacon.
#[derive(Debug, Clone, Default)]
pub struct TrackingState {
    /// Custom variables scoped to the action (`cvar`).
    pub action_vars: HashMap<String, String>,
    /// Custom variables scoped to the visitor (`_cvar`).
    pub visitor_vars: HashMap<String, String>,
    /// When set, nothing is sent.
    pub ignored: bool,
    pub params: BeaconParams,
}

/// Handle to the tracking state of the current request.
///
/// Clones share the same state, so a handler's changes are visible to the
/// middleware once the chain returns.
#[derive(Debug, Clone, Default)]
pub struct TrackingContext {
    inner: Arc<Mutex<TrackingState>>,
}

impl TrackingContext {
    /// Context for a tracked request, seeded with its base parameters.
    pub fn new(params: BeaconParams) -> Self {
        Self::from_state(TrackingState {
            params,
            ..TrackingState::default()
        })
    }

    /// Context for a request that opted out; it is vetoed from the start.
    pub fn skipped() -> Self {
        Self::from_state(TrackingState {
            ignored: true,
            ..TrackingState::default()
        })
    }

    fn from_state(state: TrackingState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackingState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a site search.
    pub fn search(&self, keyword: impl Into<String>, options: SearchOptions) {
        let keyword: String = keyword.into();
        let mut state = self.lock();
        state.params.set(SEARCH, keyword);
        if let Some(count) = options.count {
            state.params.set(SEARCH_COUNT, count.to_string());
        }
        if let Some(category) = options.category {
            state.params.set(SEARCH_CATEGORY, category);
        }
    }

    pub fn set_action_var(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().action_vars.insert(key.into(), value.into());
    }

    pub fn set_visitor_var(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().visitor_vars.insert(key.into(), value.into());
    }

    /// Veto the beacon for this request.
    pub fn ignore(&self) {
        self.lock().ignored = true;
    }

    pub fn is_ignored(&self) -> bool {
        self.lock().ignored
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> TrackingState {
        self.lock().clone()
    }

    /// Move the state out, leaving an empty vetoed state behind.
    ///
    /// Writes through clones that outlive the chain land in the empty state
    /// and are never sent.
    pub fn take(&self) -> TrackingState {
        std::mem::replace(&mut *self.lock(), TrackingState {
            ignored: true,
            ..TrackingState::default()
        })
    }
}

impl<S> FromRequestParts<S> for TrackingContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    /// Falls back to a detached context when the tracking middleware is not
    /// installed, so handlers never fail on it.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<TrackingContext>() {
            Some(tracking) => Ok(tracking.clone()),
            None => {
                tracing::debug!(
                    uri = %parts.uri,
                    "Tracking middleware not installed, using a detached context"
                );
                Ok(TrackingContext::skipped())
            }
        }
    }
}

/// Route handler that vetoes tracking for the route it is mounted on.
pub async fn ignore_handler(tracking: TrackingContext) -> StatusCode {
    tracking.ignore();
    StatusCode::NO_CONTENT
}
