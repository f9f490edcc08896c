// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ordered collection of query terms with parse, toggle and rendering.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::term::{QueryTerm, TermStatus, ToggleState};

/// Recognizes an alternation of `@[+-]?(field|*) value` tokens and
/// free-text spans. Malformed segments simply fail to match and are
/// dropped; parsing never errors.
static QUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)@(?P<status>[+-]?)(?P<field>\w+|\*)\s+(?P<term>[^@()]+)?|(?P<all>[^@()]+)")
        .expect("query regex")
});

/// An insertion-ordered mapping from term hash to [`QueryTerm`].
///
/// At most one term is stored per hash; re-parsing a duplicate keeps the
/// first occurrence. The user-facing rendering preserves insertion order
/// while [`to_canonical`](MultiFieldQuery::to_canonical) depends only on
/// the set of active terms, sorted — so any two queries with the same
/// active refinements share a cache key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiFieldQuery {
    terms: Vec<QueryTerm>,
    by_hash: HashMap<String, usize>,
    user_sph_map: HashMap<String, String>,
    user_attr_map: HashMap<String, String>,
    /// When false (the default), an all-inactive or empty query renders as
    /// a single space so the backend still distinguishes "match all" from
    /// "no query at all".
    allow_empty: bool,
}

impl MultiFieldQuery {
    /// Create a parser with the given case-insensitive field maps
    /// (user field → backend full-text field / attribute).
    pub fn new(
        user_sph_map: HashMap<String, String>,
        user_attr_map: HashMap<String, String>,
    ) -> Self {
        let lower =
            |m: HashMap<String, String>| m.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect();
        Self {
            terms: Vec::new(),
            by_hash: HashMap::new(),
            user_sph_map: lower(user_sph_map),
            user_attr_map: lower(user_attr_map),
            allow_empty: false,
        }
    }

    pub fn set_allow_empty(&mut self, allow: bool) {
        self.allow_empty = allow;
    }

    /// Parse a user query string, replacing any previously parsed terms.
    /// Returns the number of terms kept.
    pub fn parse(&mut self, input: &str) -> usize {
        self.terms.clear();
        self.by_hash.clear();
        for caps in QUERY_RE.captures_iter(input) {
            let parsed = if let Some(field) = caps.name("field") {
                let status = match caps.name("status").map(|m| m.as_str()) {
                    Some("-") => TermStatus::Inactive,
                    _ => TermStatus::Active,
                };
                let value = caps.name("term").map(|m| m.as_str()).unwrap_or("");
                QueryTerm::new(
                    status,
                    field.as_str(),
                    value,
                    &self.user_sph_map,
                    &self.user_attr_map,
                )
            } else if let Some(all) = caps.name("all") {
                QueryTerm::new(
                    TermStatus::Active,
                    "*",
                    all.as_str(),
                    &self.user_sph_map,
                    &self.user_attr_map,
                )
            } else {
                None
            };
            if let Some(term) = parsed {
                self.insert(term);
            }
        }
        self.terms.len()
    }

    /// Insert a term unless one with the same hash is already present
    /// (first occurrence wins). Returns whether the term was added.
    pub fn insert(&mut self, term: QueryTerm) -> bool {
        let hash = term.hash();
        if self.by_hash.contains_key(&hash) {
            return false;
        }
        self.by_hash.insert(hash, self.terms.len());
        self.terms.push(term);
        true
    }

    /// Toggle the terms parsed out of `input` (e.g. `"@year 1974"`) to the
    /// given state. Unknown terms are ignored.
    pub fn toggle(&mut self, input: &str, state: ToggleState) {
        let mut probe = self.parser_clone();
        probe.parse(input);
        for term in &probe.terms {
            self.toggle_term(term, state);
        }
    }

    /// Toggle a single term, looked up by hash identity.
    pub fn toggle_term(&mut self, term: &QueryTerm, state: ToggleState) {
        if let Some(&i) = self.by_hash.get(&term.hash()) {
            let current = &mut self.terms[i];
            current.status = match state {
                ToggleState::On => TermStatus::Active,
                ToggleState::Off => TermStatus::Inactive,
                ToggleState::Flip => match current.status {
                    TermStatus::Active => TermStatus::Inactive,
                    TermStatus::Inactive => TermStatus::Active,
                },
            };
        }
    }

    pub fn toggle_on(&mut self, input: &str) {
        self.toggle(input, ToggleState::On);
    }

    pub fn toggle_off(&mut self, input: &str) {
        self.toggle(input, ToggleState::Off);
    }

    /// Whether every term parsed out of `input` is present (by hash,
    /// regardless of status).
    pub fn has_query_term(&self, input: &str) -> bool {
        let mut probe = self.parser_clone();
        if probe.parse(input) == 0 {
            return false;
        }
        probe
            .terms
            .iter()
            .all(|t| self.by_hash.contains_key(&t.hash()))
    }

    /// Whether the query holds a term on `field` (user or sphinx name)
    /// whose value equals `term` case-insensitively.
    pub fn has_term(&self, field: &str, term: &str) -> bool {
        let needle = term.to_lowercase();
        self.terms
            .iter()
            .any(|t| Self::matches_field(t, field) && t.term.to_lowercase() == needle)
    }

    /// Backend rendering: active terms in insertion order, space-joined.
    pub fn to_sphinx(&self, exclude_numeric: bool) -> String {
        let parts: Vec<String> = self
            .terms
            .iter()
            .map(|t| t.to_sphinx(exclude_numeric))
            .filter(|s| !s.is_empty())
            .collect();
        let out = parts.join(" ");
        if out.is_empty() && !self.allow_empty {
            " ".to_string()
        } else {
            out
        }
    }

    /// Canonical rendering: active terms only, sorted by
    /// `(user_field, lowercase(term))`, lowercased, space-joined.
    pub fn to_canonical(&self) -> String {
        let mut active: Vec<&QueryTerm> = self.terms.iter().filter(|t| t.is_active()).collect();
        active.sort();
        active
            .iter()
            .map(|t| t.to_canonical())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    /// Count of terms whose user or sphinx field equals `field`
    /// (case-insensitive, status-independent).
    pub fn count_field(&self, field: &str) -> usize {
        self.terms
            .iter()
            .filter(|t| Self::matches_field(t, field))
            .count()
    }

    /// Rewrite the display form of terms on `field` whose raw value appears
    /// in the resolved id → display-term map, so the query re-renders with
    /// names instead of ids.
    pub(crate) fn rewrite_user_terms(&mut self, field: &str, terms: &HashMap<String, String>) {
        if terms.is_empty() {
            return;
        }
        for t in &mut self.terms {
            if Self::matches_field(t, field) {
                if let Some(display) = terms.get(&t.term) {
                    t.user_term = display.clone();
                }
            }
        }
    }

    fn matches_field(term: &QueryTerm, field: &str) -> bool {
        term.user_field.eq_ignore_ascii_case(field)
            || term.sphinx_field.eq_ignore_ascii_case(field)
    }

    /// An empty query sharing this parser's field maps.
    fn parser_clone(&self) -> Self {
        Self {
            terms: Vec::new(),
            by_hash: HashMap::new(),
            user_sph_map: self.user_sph_map.clone(),
            user_attr_map: self.user_attr_map.clone(),
            allow_empty: self.allow_empty,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryTerm> {
        self.terms.iter()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl<'a> IntoIterator for &'a MultiFieldQuery {
    type Item = &'a QueryTerm;
    type IntoIter = std::slice::Iter<'a, QueryTerm>;

    fn into_iter(self) -> Self::IntoIter {
        self.terms.iter()
    }
}

/// User-facing rendering: all terms in insertion order, status markers
/// visible, display terms used.
impl fmt::Display for MultiFieldQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", parts.join(" "))
    }
}
