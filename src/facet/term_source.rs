// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Term resolution: mapping group-by ids to human-readable terms.
//!
//! A facet groups on a numeric attribute, so its raw rows carry ids. A
//! [`TermSource`] turns those ids into display terms, two ways:
//!
//! - **embedded attribute**: the indexed row itself carries a serialized
//!   `<id><delim><term><delim>…` string; split it, no backend call.
//! - **lookup index**: collect the unique ids and run one filtered
//!   full-scan query against a separate index that maps id → term.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{attr_text, Match, MatchMode, SearchBackend, SearchError, SortMode};

/// Resolved id → display-term mapping. Keys are the canonical text
/// rendering of the group-by attribute value.
pub type TermMap = HashMap<String, String>;

/// Extracts the group-by key from a raw match.
pub type IdGetter = dyn Fn(&Match) -> Option<String> + Send + Sync;

/// The default id getter: the synthetic `@groupby` attribute.
pub fn group_id(m: &Match) -> Option<String> {
    m.attrs.get("@groupby").map(attr_text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermSourceKind {
    /// `name` is a string attribute on the facet's own result rows.
    Attr,
    /// `name` is a separate lookup index queried by id.
    Index,
}

/// Configuration for a term source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSourceConfig {
    pub kind: TermSourceKind,
    /// Attribute name (embedded) or lookup index name.
    pub name: String,
    #[serde(default = "default_id_attr")]
    pub id_attr: String,
    #[serde(default = "default_term_attr")]
    pub term_attr: String,
    #[serde(default = "default_delim")]
    pub delim: String,
    /// Extra query text for the lookup index; usually empty.
    #[serde(default)]
    pub query: String,
}

fn default_id_attr() -> String {
    "id".to_string()
}

fn default_term_attr() -> String {
    "term".to_string()
}

fn default_delim() -> String {
    ",".to_string()
}

impl TermSourceConfig {
    /// An embedded-attribute source reading `name` off each result row.
    pub fn attr(name: impl Into<String>) -> Self {
        Self {
            kind: TermSourceKind::Attr,
            name: name.into(),
            id_attr: default_id_attr(),
            term_attr: default_term_attr(),
            delim: default_delim(),
            query: String::new(),
        }
    }

    /// A lookup-index source querying index `name` by `id_attr`.
    pub fn index(
        name: impl Into<String>,
        id_attr: impl Into<String>,
        term_attr: impl Into<String>,
    ) -> Self {
        Self {
            kind: TermSourceKind::Index,
            name: name.into(),
            id_attr: id_attr.into(),
            term_attr: term_attr.into(),
            delim: default_delim(),
            query: String::new(),
        }
    }

    pub fn delim(mut self, delim: impl Into<String>) -> Self {
        self.delim = delim.into();
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }
}

/// Capability of resolving group-by ids to display terms for a batch of
/// raw matches. [`Facet`](crate::Facet) implements the embedded-attribute
/// variant over its own rows; [`FacetedClient`](crate::FacetedClient)
/// implements the lookup-index variant over its backend.
#[async_trait]
pub trait TermSource {
    async fn fetch_terms(
        &mut self,
        matches: &[Match],
        cfg: &TermSourceConfig,
        id_of: &IdGetter,
    ) -> Result<TermMap, SearchError>;
}

/// Split the embedded `<id><delim><term><delim>…` attribute across all
/// matches into one merged map.
pub(crate) fn embedded_terms(matches: &[Match], cfg: &TermSourceConfig) -> TermMap {
    let mut map = TermMap::new();
    for m in matches {
        let Some(raw) = m.attrs.get(&cfg.name) else {
            continue;
        };
        let raw = attr_text(raw);
        let mut parts = raw.split(cfg.delim.as_str());
        while let (Some(id), Some(term)) = (parts.next(), parts.next()) {
            let id = id.trim();
            if id.is_empty() {
                continue;
            }
            map.insert(id.to_string(), term.trim().to_string());
        }
    }
    map
}

/// Resolve ids through a separate lookup index: one filtered full-scan
/// query, group-by reset, array results on. The backend state is restored
/// on every exit path.
pub(crate) async fn lookup_terms(
    backend: &mut dyn SearchBackend,
    matches: &[Match],
    cfg: &TermSourceConfig,
    id_of: &IdGetter,
) -> Result<TermMap, SearchError> {
    let mut seen = HashSet::new();
    let mut ids: Vec<i64> = Vec::new();
    for m in matches {
        let Some(id) = id_of(m) else { continue };
        let Ok(id) = id.parse::<i64>() else { continue };
        if seen.insert(id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Ok(TermMap::new());
    }

    debug!(index = %cfg.name, ids = ids.len(), "term lookup");
    let saved = backend.snapshot();
    let limit = ids.len() as u32;
    backend.set_limits(0, limit, limit, 0);
    backend.set_select("*");
    backend.reset_group_by();
    backend.set_match_mode(MatchMode::FullScan);
    backend.set_sort_mode(SortMode::AttrAsc, &cfg.id_attr);
    backend.set_filter(&cfg.id_attr, ids, false);
    backend.set_array_result(true);
    let slot = backend.add_query(&cfg.query, &cfg.name, "");
    let outcome = backend.run_queries().await;
    backend.restore(saved);

    let results = outcome?;
    let result = results
        .get(slot)
        .ok_or_else(|| SearchError::Backend(format!("missing term lookup result for '{}'", cfg.name)))?;
    if let Some(error) = result.error_text() {
        return Err(SearchError::Backend(error.to_string()));
    }

    let mut map = TermMap::new();
    for m in &result.matches {
        let (Some(id), Some(term)) = (m.attrs.get(&cfg.id_attr), m.attrs.get(&cfg.term_attr))
        else {
            continue;
        };
        map.insert(attr_text(id), attr_text(term));
    }
    Ok(map)
}
