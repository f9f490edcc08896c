//! Scripted in-process backend.
//!
//! Records every queued sub-query together with the [`QueryState`] in
//! force at queue time, and replays scripted responses. Exported so host
//! applications can drive the middleware deterministically in their own
//! tests; no network, no engine.

use std::collections::VecDeque;

use async_trait::async_trait;

use super::{QueryResult, QueryState, SearchBackend, SearchError};

/// One recorded sub-query.
#[derive(Debug, Clone)]
pub struct PendingQuery {
    pub query: String,
    pub index: String,
    pub comment: String,
    /// The backend state the query was queued under.
    pub state: QueryState,
}

#[derive(Debug, Default)]
pub struct StubBackend {
    state: QueryState,
    pending: Vec<PendingQuery>,
    responses: VecDeque<Vec<QueryResult>>,
    executed: Vec<PendingQuery>,
    round_trips: usize,
    fail_next: Option<String>,
}

impl StubBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for the next `run_queries` call. Unscripted
    /// calls answer every pending query with an empty result.
    pub fn push_response(&mut self, results: Vec<QueryResult>) {
        self.responses.push_back(results);
    }

    /// Make the next `run_queries` call fail with a backend error.
    pub fn fail_next(&mut self, message: impl Into<String>) {
        self.fail_next = Some(message.into());
    }

    /// Queries queued but not yet executed.
    pub fn pending(&self) -> &[PendingQuery] {
        &self.pending
    }

    /// Every query executed so far, in slot order across batches.
    pub fn executed(&self) -> &[PendingQuery] {
        &self.executed
    }

    /// Number of `run_queries` round-trips performed.
    pub fn round_trips(&self) -> usize {
        self.round_trips
    }
}

#[async_trait]
impl SearchBackend for StubBackend {
    fn state(&self) -> &QueryState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut QueryState {
        &mut self.state
    }

    fn add_query(&mut self, query: &str, index: &str, comment: &str) -> usize {
        self.pending.push(PendingQuery {
            query: query.to_string(),
            index: index.to_string(),
            comment: comment.to_string(),
            state: self.state.clone(),
        });
        self.pending.len() - 1
    }

    async fn run_queries(&mut self) -> Result<Vec<QueryResult>, SearchError> {
        let batch: Vec<PendingQuery> = self.pending.drain(..).collect();
        if let Some(message) = self.fail_next.take() {
            return Err(SearchError::Backend(message));
        }
        self.round_trips += 1;
        let count = batch.len();
        self.executed.extend(batch);
        match self.responses.pop_front() {
            Some(results) => Ok(results),
            None => Ok(vec![QueryResult::default(); count]),
        }
    }
}
