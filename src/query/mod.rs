// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query Language
//!
//! Parses user-facing refinement queries into ordered collections of
//! field-qualified terms, and renders them back out in three forms:
//!
//! ```text
//! "@year 1974 @-genre drama harrison ford"
//!       │
//!       ▼  MultiFieldQuery::parse
//! ┌──────────────────────────────────────────────┐
//! │ (@year 1974) (@-genre drama) (@* harrison…)  │  Display (user-facing)
//! │ (@year 1974) (@* "harrison ford")            │  to_sphinx (backend)
//! │ (@* "harrison ford") (@year 1974)            │  to_canonical (cache key)
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Grammar (case-insensitive)
//!
//! ```text
//! query     := (term | free_text)+
//! term      := '@' [+-]? (field | '*') SP+ value
//! field     := [A-Za-z0-9_]+
//! value     := any chars except '@' '(' ')'
//! free_text := any chars except '@' '(' ')'
//! ```
//!
//! A leading `-` marks a term inactive: it is preserved in the parsed query
//! (and re-rendered with a visible `-` marker) but not emitted to the
//! backend. `@*` denotes a free-text clause.

mod multi;
mod term;

pub use multi::MultiFieldQuery;
pub use term::{QueryTerm, TermStatus, ToggleState};

pub(crate) use term::md5_hex;
