//! Abstract search-backend contract.
//!
//! The engine wire protocol lives outside this crate; everything here
//! models the client-side query state a Sphinx-compatible API holds
//! between `AddQuery` calls, plus the result shapes the middleware
//! consumes. Concrete clients implement [`SearchBackend`] by storing a
//! [`QueryState`] and mapping it onto their wire representation; the
//! state-mutating setters and the snapshot/restore pair come for free.
//!
//! Backend state is scoped: every mutating operation in the facet
//! pipeline is paired with a [`restore`](SearchBackend::restore) on all
//! exit paths, so a sub-query never leaks limits, group-by or sort
//! settings into the next one.

mod stub;

pub use stub::{PendingQuery, StubBackend};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Connection error: {0}")]
    Connect(String),
    #[error("Search backend error: {0}")]
    Backend(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Grouping function, using the reference Sphinx API numeric codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupFunc {
    Day = 0,
    Week = 1,
    Month = 2,
    Year = 3,
    /// Group by attribute value — the facet default.
    #[default]
    Attr = 4,
    AttrPair = 5,
}

impl GroupFunc {
    /// The wire code (`Attr` is 4).
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Match mode, using the reference Sphinx API numeric codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    #[default]
    All = 0,
    Any = 1,
    Phrase = 2,
    Boolean = 3,
    Extended = 4,
    /// Attribute-filter-only scan, used by lookup-index term sources.
    FullScan = 5,
    Extended2 = 6,
}

/// Sort mode, using the reference Sphinx API numeric codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortMode {
    #[default]
    Relevance = 0,
    AttrDesc = 1,
    AttrAsc = 2,
    TimeSegments = 3,
    Extended = 4,
    Expr = 5,
}

/// One attribute filter: `attr ∈ values` (or `∉` when `exclude`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub attr: String,
    pub values: Vec<i64>,
    pub exclude: bool,
}

/// Group-by settings: attribute, grouping function and the extended
/// group-sort expression (opaque to this crate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBy {
    pub attr: String,
    pub func: GroupFunc,
    pub sort: String,
}

/// Sort settings; the clause is opaque and only meaningful to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub mode: SortMode,
    pub clause: String,
}

/// The mutable client-side query state a backend holds between
/// `add_query` calls. Snapshot/restore is by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryState {
    pub offset: u32,
    pub limit: u32,
    pub max_matches: u32,
    pub cutoff: u32,
    pub select: String,
    pub group: Option<GroupBy>,
    /// `COUNT(DISTINCT attr)` attribute, reported per group when set.
    pub group_distinct: Option<String>,
    pub match_mode: MatchMode,
    pub sort: SortSpec,
    pub filters: Vec<Filter>,
    pub array_result: bool,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 20,
            max_matches: 1000,
            cutoff: 0,
            select: "*".to_string(),
            group: None,
            group_distinct: None,
            match_mode: MatchMode::default(),
            sort: SortSpec::default(),
            filters: Vec::new(),
            array_result: false,
        }
    }
}

/// One result row. Grouped queries carry the synthetic `@groupby`,
/// `@count` and (with a group function) `@groupfunc` attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub doc_id: u64,
    pub weight: i32,
    pub attrs: BTreeMap<String, Value>,
}

/// Result of one batched sub-query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub time: f64,
    pub total_found: u64,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub matches: Vec<Match>,
}

impl QueryResult {
    /// Backend-reported error text, if any (empty strings don't count).
    pub fn error_text(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// Canonical text rendering of an attribute value, used wherever ids and
/// terms are compared or used as map keys. Strings render bare, numbers
/// in their JSON form, null as the empty string.
pub fn attr_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A Sphinx-compatible search client.
///
/// Implementations provide storage for the [`QueryState`], query queuing
/// and the single network round-trip in [`run_queries`]. All the state
/// setters the middleware needs are provided methods over that state.
///
/// [`run_queries`]: SearchBackend::run_queries
#[async_trait]
pub trait SearchBackend: Send {
    fn state(&self) -> &QueryState;
    fn state_mut(&mut self) -> &mut QueryState;

    /// Queue a sub-query under the current state. Returns its result slot.
    fn add_query(&mut self, query: &str, index: &str, comment: &str) -> usize;

    /// Execute every queued sub-query in one round-trip. The i-th result
    /// corresponds to the i-th queued query.
    async fn run_queries(&mut self) -> Result<Vec<QueryResult>, SearchError>;

    fn set_limits(&mut self, offset: u32, limit: u32, max_matches: u32, cutoff: u32) {
        let state = self.state_mut();
        state.offset = offset;
        state.limit = limit;
        state.max_matches = max_matches;
        state.cutoff = cutoff;
    }

    fn set_select(&mut self, select: &str) {
        self.state_mut().select = select.to_string();
    }

    fn set_group_by(&mut self, attr: &str, func: GroupFunc, group_sort: &str) {
        self.state_mut().group = Some(GroupBy {
            attr: attr.to_string(),
            func,
            sort: group_sort.to_string(),
        });
    }

    fn set_group_distinct(&mut self, attr: &str) {
        self.state_mut().group_distinct = Some(attr.to_string());
    }

    fn reset_group_by(&mut self) {
        let state = self.state_mut();
        state.group = None;
        state.group_distinct = None;
    }

    fn set_match_mode(&mut self, mode: MatchMode) {
        self.state_mut().match_mode = mode;
    }

    fn set_sort_mode(&mut self, mode: SortMode, clause: &str) {
        self.state_mut().sort = SortSpec {
            mode,
            clause: clause.to_string(),
        };
    }

    fn set_filter(&mut self, attr: &str, values: Vec<i64>, exclude: bool) {
        self.state_mut().filters.push(Filter {
            attr: attr.to_string(),
            values,
            exclude,
        });
    }

    fn reset_filters(&mut self) {
        self.state_mut().filters.clear();
    }

    fn set_array_result(&mut self, array_result: bool) {
        self.state_mut().array_result = array_result;
    }

    /// Value snapshot of the mutable settings a sub-operation may touch.
    fn snapshot(&self) -> QueryState {
        self.state().clone()
    }

    /// Restore a snapshot taken with [`snapshot`](SearchBackend::snapshot).
    fn restore(&mut self, snapshot: QueryState) {
        *self.state_mut() = snapshot;
    }
}

#[async_trait]
impl<B: SearchBackend + ?Sized> SearchBackend for Box<B> {
    fn state(&self) -> &QueryState {
        (**self).state()
    }

    fn state_mut(&mut self) -> &mut QueryState {
        (**self).state_mut()
    }

    fn add_query(&mut self, query: &str, index: &str, comment: &str) -> usize {
        (**self).add_query(query, index, comment)
    }

    async fn run_queries(&mut self) -> Result<Vec<QueryResult>, SearchError> {
        (**self).run_queries().await
    }
}
