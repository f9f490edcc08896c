// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! A single field-qualified refinement clause.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use md5::{Digest, Md5};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Intra-word hyphens are folded to spaces before the backend sees the term:
/// "spider-man" → "spider man".
static INTRA_WORD_HYPHEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)-(\w)").expect("hyphen regex"));

/// MD5 hex digest of a string. Term identity and cache keys both use this.
pub(crate) fn md5_hex(input: &str) -> String {
    use std::fmt::Write;

    let digest = Md5::digest(input.as_bytes());
    digest.iter().fold(String::with_capacity(32), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Whether a term participates in backend queries.
///
/// An inactive term is preserved in the parsed query (and visible in its
/// user-facing rendering) but contributes nothing to the backend query or
/// the canonical form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermStatus {
    #[default]
    Active,
    Inactive,
}

/// Target state for [`MultiFieldQuery::toggle`](crate::MultiFieldQuery::toggle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    On,
    Off,
    /// Flip active ↔ inactive.
    Flip,
}

/// One field-qualified refinement clause, e.g. `@actor harrison ford`.
///
/// Identity is `(user_field, lowercase(term))`: two terms with the same
/// [`hash`](QueryTerm::hash) are the same refinement regardless of status
/// or display form, and a [`MultiFieldQuery`](crate::MultiFieldQuery)
/// stores at most one per hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTerm {
    pub status: TermStatus,
    /// Lowercased, trimmed user-facing field name (`*` for free text).
    pub user_field: String,
    /// Backend full-text field, resolved through the user→sphinx field map.
    pub sphinx_field: String,
    /// Backend attribute, resolved through the user→attribute map
    /// (default `<user_field>_attr`). Used for numeric filtering.
    pub attribute: String,
    /// Trimmed raw value.
    pub term: String,
    /// Display form; starts equal to `term` and may be rewritten once a
    /// term source resolves the raw id to a human-readable name.
    pub user_term: String,
}

impl QueryTerm {
    /// Build a term from parsed fragments. Returns `None` on a blank field
    /// or empty value — the recovered "no term" condition, not an error.
    pub fn new(
        status: TermStatus,
        field: &str,
        term: &str,
        user_sph_map: &HashMap<String, String>,
        user_attr_map: &HashMap<String, String>,
    ) -> Option<Self> {
        let user_field = field.trim().to_lowercase();
        if user_field.is_empty() {
            return None;
        }
        let term = term.trim();
        if term.is_empty() {
            return None;
        }
        let sphinx_field = user_sph_map
            .get(&user_field)
            .cloned()
            .unwrap_or_else(|| user_field.clone());
        let attribute = user_attr_map
            .get(&user_field)
            .cloned()
            .unwrap_or_else(|| format!("{user_field}_attr"));
        Some(Self {
            status,
            user_field,
            sphinx_field,
            attribute,
            term: term.to_string(),
            user_term: term.to_string(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == TermStatus::Active
    }

    /// All-digit terms can be turned into backend attribute filters instead
    /// of full-text clauses.
    pub fn is_numeric(&self) -> bool {
        !self.term.is_empty() && self.term.chars().all(|c| c.is_ascii_digit())
    }

    /// Backend rendering: `(@<sphinx_field> <value>)`, with intra-word
    /// hyphens folded, double quotes stripped and multi-word values quoted.
    ///
    /// Empty iff the term is inactive, or iff `exclude_numeric` is set and
    /// the term is numeric (it is then expected to travel as a filter).
    pub fn to_sphinx(&self, exclude_numeric: bool) -> String {
        if !self.is_active() {
            return String::new();
        }
        if exclude_numeric && self.is_numeric() {
            return String::new();
        }
        let value = INTRA_WORD_HYPHEN
            .replace_all(&self.term, "$1 $2")
            .replace('"', "");
        if value.contains(char::is_whitespace) {
            format!("(@{} \"{}\")", self.sphinx_field, value)
        } else {
            format!("(@{} {})", self.sphinx_field, value)
        }
    }

    /// Canonical rendering: lowercased backend form. Inactive terms
    /// contribute the empty string.
    pub fn to_canonical(&self) -> String {
        self.to_sphinx(false).trim().to_lowercase()
    }

    /// Identity hash: MD5 over `user_field || lowercase(term)` (hex).
    /// Invariant under status and display-term changes.
    pub fn hash(&self) -> String {
        md5_hex(&format!("{}{}", self.user_field, self.term.to_lowercase()))
    }

    fn sort_key(&self) -> (&str, String) {
        (&self.user_field, self.term.to_lowercase())
    }
}

/// User-facing rendering: `(@<status><user_field> <user_term>)` with the
/// inactive marker `-` preserved.
impl fmt::Display for QueryTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.status {
            TermStatus::Active => "",
            TermStatus::Inactive => "-",
        };
        write!(f, "(@{}{} {})", sign, self.user_field, self.user_term)
    }
}

/// Equality follows hash identity: status and display form are excluded.
impl PartialEq for QueryTerm {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for QueryTerm {}

/// Terms order by `user_field` ascending, then `lowercase(term)` ascending.
impl Ord for QueryTerm {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for QueryTerm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
