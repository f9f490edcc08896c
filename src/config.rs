//! Configuration for the faceted client.
//!
//! # Example
//!
//! ```
//! use sphinx_facets::SearchConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SearchConfig::default();
//! assert_eq!(config.index, "*");
//! assert!(config.caching);
//!
//! // Full config
//! let config = SearchConfig {
//!     index: "movies".into(),
//!     env: "prod_".into(),
//!     filtering: true,
//!     ..Default::default()
//! };
//! ```

use std::collections::HashMap;

use serde::Deserialize;

use crate::facet::{Facet, Order, TermSourceConfig};

/// Configuration for a [`FacetedClient`](crate::FacetedClient).
///
/// All fields have sensible defaults. A host application typically
/// provides the field maps, a facet list and the default index.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Default index the main query and facet sub-queries run against.
    #[serde(default = "default_index")]
    pub index: String,

    /// Case-insensitive user field → backend full-text field map.
    #[serde(default)]
    pub user_sph_map: HashMap<String, String>,

    /// Case-insensitive user field → backend attribute map.
    #[serde(default)]
    pub user_attr_map: HashMap<String, String>,

    /// When true, numeric query terms become backend attribute filters
    /// instead of textual field clauses.
    #[serde(default)]
    pub filtering: bool,

    /// Environment prefix baked into cache keys, isolating deployments
    /// (and test runs) sharing one store.
    #[serde(default)]
    pub env: String,

    /// Default caching behavior once a cache store is attached.
    #[serde(default = "default_caching")]
    pub caching: bool,

    /// Consult sticky (preloaded) cache entries even when caching is off.
    #[serde(default)]
    pub preloading: bool,

    /// Render an all-inactive query as empty instead of a single space.
    #[serde(default)]
    pub allow_empty: bool,

    #[serde(default)]
    pub facets: Vec<FacetConfig>,
}

fn default_index() -> String {
    "*".to_string()
}

fn default_caching() -> bool {
    true
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index: default_index(),
            user_sph_map: HashMap::new(),
            user_attr_map: HashMap::new(),
            filtering: false,
            env: String::new(),
            caching: default_caching(),
            preloading: false,
            allow_empty: false,
            facets: Vec::new(),
        }
    }
}

/// Declarative facet configuration; see [`Facet`] for the semantics of
/// each knob.
#[derive(Debug, Clone, Deserialize)]
pub struct FacetConfig {
    pub name: String,
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default)]
    pub group_sort: Option<String>,
    /// Custom aggregate expression exposed as `@groupfunc`.
    #[serde(default)]
    pub group_func: Option<String>,
    #[serde(default)]
    pub sph_field: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default = "default_max_num_values")]
    pub max_num_values: usize,
    #[serde(default = "default_max_matches")]
    pub max_matches: u32,
    #[serde(default)]
    pub cutoff: u32,
    #[serde(default = "default_augment")]
    pub augment: bool,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub order: Order,
    #[serde(default)]
    pub source: Option<TermSourceConfig>,
}

fn default_max_num_values() -> usize {
    15
}

fn default_max_matches() -> u32 {
    1000
}

fn default_augment() -> bool {
    true
}

impl From<&FacetConfig> for Facet {
    fn from(cfg: &FacetConfig) -> Self {
        let mut facet = Facet::new(cfg.name.clone())
            .max_num_values(cfg.max_num_values)
            .max_matches(cfg.max_matches)
            .cutoff(cfg.cutoff)
            .augment(cfg.augment);
        if let Some(attr) = &cfg.attr {
            facet = facet.attr(attr.clone());
        }
        if let Some(expr) = &cfg.group_func {
            facet = facet.group_func(expr);
        }
        if let Some(group_sort) = &cfg.group_sort {
            facet = facet.group_sort(group_sort.clone());
        }
        if let Some(field) = &cfg.sph_field {
            facet = facet.sph_field(field.clone());
        }
        if let Some(index) = &cfg.index {
            facet = facet.index(index.clone());
        }
        if let Some(key) = &cfg.order_by {
            facet = facet.order_by(key.clone(), cfg.order);
        }
        if let Some(source) = &cfg.source {
            facet = facet.source(source.clone());
        }
        facet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.index, "*");
        assert!(config.caching);
        assert!(!config.preloading);
        assert!(!config.filtering);
        assert!(config.facets.is_empty());
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: SearchConfig = serde_json::from_value(json!({
            "index": "movies",
            "user_sph_map": {"actor": "actors"},
            "facets": [{"name": "year"}],
        }))
        .unwrap();
        assert_eq!(config.index, "movies");
        assert_eq!(config.facets.len(), 1);
        assert_eq!(config.facets[0].max_num_values, 15);
        assert!(config.facets[0].augment);
    }

    #[test]
    fn test_facet_from_config() {
        let cfg: FacetConfig = serde_json::from_value(json!({
            "name": "actor",
            "max_num_values": 5,
            "group_func": "sum(user_rating_attr * nb_votes_attr)",
            "order_by": "@groupfunc",
            "order": "desc",
            "source": {"kind": "attr", "name": "actor_terms_attr"},
        }))
        .unwrap();
        let facet = Facet::from(&cfg);
        assert_eq!(
            facet.params(),
            json!({
                "attr": "actor_attr",
                "func": 4,
                "group_sort": "@groupfunc desc",
                "set_select": "@groupby, @count, sum(user_rating_attr * nb_votes_attr) as @groupfunc, actor_terms_attr",
                "sph_field": "actor",
                "default_index": null,
                "max_num_values": 5,
                "max_matches": 1000,
                "cutoff": 0,
            })
        );
    }
}
