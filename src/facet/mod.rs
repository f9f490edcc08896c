// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Facets: per-attribute refinement computation.
//!
//! A [`Facet`] describes one grouped sub-query over the main query's base
//! (attribute, grouping function, group sort, page size) and holds the
//! computed refinement options once results come back:
//!
//! ```text
//! Facet::prepare      snapshot state → limits/select/group-by →
//!                     add_query(q.to_sphinx) → restore
//! Facet::set_values   raw matches → rows with @term/@groupfunc/@selected
//! Facet::order_values stable sort by the configured order key
//! ```
//!
//! Batching across facets and caching live in [`FacetGroup`].

mod group;
mod term_source;

pub use group::FacetGroup;
pub use term_source::{
    group_id, IdGetter, TermMap, TermSource, TermSourceConfig, TermSourceKind,
};

pub(crate) use term_source::lookup_terms;

use term_source::embedded_terms;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::{attr_text, GroupFunc, Match, QueryResult, SearchBackend, SearchError};
use crate::query::MultiFieldQuery;

/// One computed refinement option: a map holding at least `@groupby`,
/// `@count`, `@term`, `@groupfunc` and `@selected`.
pub type FacetRow = BTreeMap<String, Value>;

/// Sort direction for facet rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

/// A facet's computed result set, the unit stored in the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetResult {
    pub time: f64,
    pub total_found: u64,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub matches: Vec<FacetRow>,
}

/// Single-attribute grouping configuration plus its computed result.
///
/// Configured with chained setters:
///
/// ```rust
/// use sphinx_facets::{Facet, Order, TermSourceConfig};
///
/// let facet = Facet::new("actor")
///     .max_num_values(5)
///     .group_func("sum(user_rating_attr * nb_votes_attr)")
///     .order_by("@groupfunc", Order::Desc)
///     .source(TermSourceConfig::attr("actor_terms_attr"));
/// ```
///
/// A facet is owned by at most one [`FacetGroup`]; reuse across searches
/// goes through [`reset`](Facet::reset).
#[derive(Debug, Clone)]
pub struct Facet {
    name: String,
    attr: String,
    func: GroupFunc,
    group_sort: String,
    select: String,
    sph_field: String,
    default_index: Option<String>,
    max_num_values: usize,
    max_matches: u32,
    cutoff: u32,
    augment: bool,
    order_key: String,
    order: Order,
    source: Option<TermSourceConfig>,
    results: FacetResult,
}

impl Facet {
    /// # Panics
    ///
    /// An empty name is a fatal configuration error.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.trim().is_empty(), "facet name must not be empty");
        Self {
            attr: format!("{name}_attr"),
            func: GroupFunc::Attr,
            group_sort: "@count desc".to_string(),
            select: "@groupby, @count".to_string(),
            sph_field: name.clone(),
            default_index: None,
            max_num_values: 15,
            max_matches: 1000,
            cutoff: 0,
            augment: true,
            order_key: "@count".to_string(),
            order: Order::Desc,
            source: None,
            results: FacetResult::default(),
            name,
        }
    }

    /// Group-by attribute (default `<name>_attr`).
    pub fn attr(mut self, attr: impl Into<String>) -> Self {
        self.attr = attr.into();
        self
    }

    /// Grouping-function code (default: group by attribute).
    pub fn func(mut self, func: GroupFunc) -> Self {
        self.func = func;
        self
    }

    /// Extended group-sort expression (opaque to this crate).
    pub fn group_sort(mut self, group_sort: impl Into<String>) -> Self {
        self.group_sort = group_sort.into();
        self
    }

    /// Custom aggregate expression computed per group. Rewrites the select
    /// list to expose it as `@groupfunc` and orders groups by it.
    pub fn group_func(mut self, expr: &str) -> Self {
        self.select = format!("@groupby, @count, {expr} as @groupfunc");
        self.group_sort = "@groupfunc desc".to_string();
        self
    }

    /// Full select-list override; must keep `@groupby, @count` first.
    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = select.into();
        self
    }

    /// Full-text field matched when deciding `@selected` and when counting
    /// active refinements for augmentation (default: the facet name).
    pub fn sph_field(mut self, field: impl Into<String>) -> Self {
        self.sph_field = field.into();
        self
    }

    /// Index the grouped sub-query runs against (default: the client's).
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.default_index = Some(index.into());
        self
    }

    pub fn max_num_values(mut self, n: usize) -> Self {
        self.max_num_values = n;
        self
    }

    pub fn max_matches(mut self, n: u32) -> Self {
        self.max_matches = n;
        self
    }

    pub fn cutoff(mut self, n: u32) -> Self {
        self.cutoff = n;
        self
    }

    /// When enabled (default), the requested row count grows by the number
    /// of refinements already active on this facet's field, so selected
    /// values do not crowd out new suggestions.
    pub fn augment(mut self, augment: bool) -> Self {
        self.augment = augment;
        self
    }

    /// Client-side row ordering (default `@count` descending). The key is
    /// any row attribute: `@count`, `@groupby`, `@groupfunc`, `@term`.
    pub fn order_by(mut self, key: impl Into<String>, order: Order) -> Self {
        self.order_key = key.into();
        self.order = order;
        self
    }

    /// Attach a term source. An embedded-attribute source also extends the
    /// select list so the serialized terms travel with each row.
    pub fn source(mut self, source: TermSourceConfig) -> Self {
        if source.kind == TermSourceKind::Attr {
            self.select = format!("{}, {}", self.select, source.name);
        }
        self.source = Some(source);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn results(&self) -> &FacetResult {
        &self.results
    }

    pub(crate) fn set_results(&mut self, results: FacetResult) {
        self.results = results;
    }

    pub(crate) fn source_config(&self) -> Option<TermSourceConfig> {
        self.source.clone()
    }

    /// Grouping parameters as a plain map, mainly for diagnostics.
    pub fn params(&self) -> Value {
        json!({
            "attr": self.attr,
            "func": self.func.code(),
            "group_sort": self.group_sort,
            "set_select": self.select,
            "sph_field": self.sph_field,
            "default_index": self.default_index,
            "max_num_values": self.max_num_values,
            "max_matches": self.max_matches,
            "cutoff": self.cutoff,
        })
    }

    /// Queue this facet's grouped sub-query over `query`'s base. The
    /// backend state is snapshot before limits/select/group-by are applied
    /// and restored right after queueing, so the next sub-query starts
    /// clean. Returns the result slot.
    pub fn prepare(
        &self,
        backend: &mut dyn SearchBackend,
        query: &MultiFieldQuery,
        default_index: &str,
        filtering: bool,
    ) -> usize {
        let limit = self.max_num_values
            + if self.augment {
                query.count_field(&self.sph_field)
            } else {
                0
            };
        let saved = backend.snapshot();
        backend.set_limits(0, limit as u32, self.max_matches, self.cutoff);
        backend.set_select(&self.select);
        backend.set_group_by(&self.attr, self.func, &self.group_sort);
        let index = self.default_index.as_deref().unwrap_or(default_index);
        let slot = backend.add_query(&query.to_sphinx(filtering), index, &self.name);
        backend.restore(saved);
        slot
    }

    /// Shape the raw sub-query result into facet rows and back-propagate
    /// resolved display terms into the query.
    ///
    /// Each row keeps every `@`-prefixed attribute of the raw match and
    /// gains `@term` (resolved display term, else the group id),
    /// `@groupfunc` (falling back to `@count`) and `@selected` (whether
    /// the query already refines on this row's term, case-insensitive).
    pub fn set_values(
        &mut self,
        query: &mut MultiFieldQuery,
        raw: &QueryResult,
        terms: &TermMap,
    ) {
        self.results.time = raw.time;
        self.results.total_found = raw.total_found;
        self.results.error = raw.error.clone();
        self.results.warning = raw.warning.clone();
        self.results.matches.clear();

        for m in &raw.matches {
            let mut row = FacetRow::new();
            for (key, value) in &m.attrs {
                if key.starts_with('@') {
                    row.insert(key.clone(), value.clone());
                }
            }

            let group_value = m.attrs.get("@groupby").cloned().unwrap_or(Value::Null);
            let term_value = match terms.get(&attr_text(&group_value)) {
                Some(term) => Value::String(term.clone()),
                None => group_value,
            };

            if !row.contains_key("@groupfunc") {
                let count = row.get("@count").cloned().unwrap_or(Value::Null);
                row.insert("@groupfunc".to_string(), count);
            }
            let selected = query.has_term(&self.sph_field, &attr_text(&term_value));
            row.insert("@term".to_string(), term_value);
            row.insert("@selected".to_string(), Value::Bool(selected));
            self.results.matches.push(row);
        }

        query.rewrite_user_terms(&self.sph_field, terms);
    }

    /// Stable sort of the rows by the configured order key; ties keep
    /// encounter order. Numbers compare numerically, strings lexically.
    pub fn order_values(&mut self) {
        let key = self.order_key.clone();
        let descending = self.order == Order::Desc;
        self.results.matches.sort_by(|a, b| {
            let ordering = cmp_attr(a.get(&key), b.get(&key));
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    /// Zero the computed results for reuse.
    pub fn reset(&mut self) {
        self.results = FacetResult::default();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FacetRow> {
        self.results.matches.iter()
    }

    pub fn len(&self) -> usize {
        self.results.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.matches.is_empty()
    }

    pub fn time(&self) -> f64 {
        self.results.time
    }

    /// The computed result as a plain JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.results).unwrap_or(Value::Null)
    }
}

impl<'a> IntoIterator for &'a Facet {
    type Item = &'a FacetRow;
    type IntoIter = std::slice::Iter<'a, FacetRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.matches.iter()
    }
}

/// Embedded-attribute term source: the facet resolves ids from the
/// serialized terms attribute on its own result rows.
#[async_trait]
impl TermSource for Facet {
    async fn fetch_terms(
        &mut self,
        matches: &[Match],
        cfg: &TermSourceConfig,
        _id_of: &IdGetter,
    ) -> Result<TermMap, SearchError> {
        Ok(embedded_terms(matches, cfg))
    }
}

fn cmp_attr(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx.partial_cmp(&fy).unwrap_or(Ordering::Equal),
            _ => attr_text(x).cmp(&attr_text(y)),
        },
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}
