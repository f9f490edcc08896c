//! Integration tests for the faceted-search middleware.
//!
//! The full pipeline (parse → main + facet batch → term resolution →
//! cache) runs against the scripted `StubBackend` and the in-process
//! cache store, so these tests need no external services.
//!
//! Adapter tests against a real Redis use testcontainers and are
//! `#[ignore]`d:
//!
//! ```bash
//! # Requires Docker
//! cargo test --test integration redis -- --ignored
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::json;

use sphinx_facets::{
    Facet, FacetGroup, FacetGroupCache, FacetResult, FacetedClient, InMemoryStore, Match,
    MultiFieldQuery, Order, QueryResult, SearchConfig, StubBackend, TermSourceConfig,
};

// =============================================================================
// Helpers
// =============================================================================

fn movie_config() -> SearchConfig {
    SearchConfig {
        index: "movies".into(),
        user_sph_map: HashMap::from([
            ("actor".to_string(), "actors".to_string()),
            ("genre".to_string(), "genres".to_string()),
        ]),
        caching: false,
        ..SearchConfig::default()
    }
}

fn movie_query(input: &str) -> MultiFieldQuery {
    let mut query = MultiFieldQuery::new(
        HashMap::from([
            ("actor".to_string(), "actors".to_string()),
            ("genre".to_string(), "genres".to_string()),
        ]),
        HashMap::new(),
    );
    query.parse(input);
    query
}

fn doc(id: u64) -> Match {
    Match {
        doc_id: id,
        weight: 10,
        attrs: BTreeMap::new(),
    }
}

fn grouped(id: i64, count: i64, extra: &[(&str, serde_json::Value)]) -> Match {
    let mut attrs = BTreeMap::from([
        ("@groupby".to_string(), json!(id)),
        ("@count".to_string(), json!(count)),
    ]);
    for (key, value) in extra {
        attrs.insert((*key).to_string(), value.clone());
    }
    Match {
        doc_id: id as u64,
        weight: 1,
        attrs,
    }
}

fn result(time: f64, rows: Vec<Match>) -> QueryResult {
    QueryResult {
        time,
        total_found: rows.len() as u64,
        matches: rows,
        ..QueryResult::default()
    }
}

// =============================================================================
// Query language round trips
// =============================================================================

#[test]
fn query_parse_render_and_canonical() {
    let query = movie_query("@year 1974 @genre drama @actor harrison ford");
    assert_eq!(
        query.to_string(),
        "(@year 1974) (@genre drama) (@actor harrison ford)"
    );
    assert_eq!(
        query.to_sphinx(false),
        "(@year 1974) (@genres drama) (@actors \"harrison ford\")"
    );
    assert_eq!(
        query.to_canonical(),
        "(@actors \"harrison ford\") (@genres drama) (@year 1974)"
    );
}

#[test]
fn query_toggle_preserves_terms() {
    let mut query = movie_query("@year 1974 @genre drama @actor harrison ford");
    query.toggle_off("@year 1974");
    assert_eq!(
        query.to_string(),
        "(@-year 1974) (@genre drama) (@actor harrison ford)"
    );
    assert_eq!(
        query.to_sphinx(false),
        "(@genres drama) (@actors \"harrison ford\")"
    );
    assert!(query.has_query_term("@year 1974"));
    assert!(!query.has_query_term("@year 1999"));

    // Toggling back restores the exact backend rendering.
    query.toggle_on("@year 1974");
    assert_eq!(
        query.to_sphinx(false),
        "(@year 1974) (@genres drama) (@actors \"harrison ford\")"
    );
}

#[test]
fn queries_with_equal_active_sets_share_a_cache_key() {
    let a = movie_query("@genre drama @year 1974");
    let mut b = movie_query("@year 1974 @actor ford @genre DRAMA");
    b.toggle_off("@actor ford");
    assert_eq!(a.to_canonical(), b.to_canonical());
}

// =============================================================================
// Full search: main query + facets in one batch
// =============================================================================

#[tokio::test]
async fn search_computes_facets_with_embedded_terms() {
    let mut backend = StubBackend::new();
    backend.push_response(vec![
        result(0.010, vec![doc(1), doc(2), doc(3)]),
        result(
            0.002,
            vec![
                grouped(1205, 3, &[("actor_terms_attr", json!("1205,Harrison Ford,1206,Carrie Fisher"))]),
                grouped(1206, 2, &[("actor_terms_attr", json!(""))]),
            ],
        ),
        result(0.001, vec![grouped(1974, 2, &[]), grouped(1999, 1, &[])]),
    ]);

    let mut client = FacetedClient::new(backend, movie_config());
    client.attach(
        Facet::new("actor")
            .max_num_values(5)
            .source(TermSourceConfig::attr("actor_terms_attr")),
    );
    client.attach(Facet::new("year").order_by("@groupby", Order::Asc));

    let results = client.query("@genre drama").await.unwrap();
    assert_eq!(results.total_found, 3);
    assert_eq!(client.backend().round_trips(), 1);
    assert_eq!(client.backend().executed().len(), 3);

    let (name, actor) = &results.facets[0];
    assert_eq!(name, "actor");
    assert_eq!(
        actor.matches[0].get("@term").unwrap(),
        &json!("Harrison Ford")
    );
    assert_eq!(
        actor.matches[1].get("@term").unwrap(),
        &json!("Carrie Fisher")
    );

    let (_, year) = &results.facets[1];
    let years: Vec<i64> = year
        .matches
        .iter()
        .map(|row| row.get("@groupby").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(years, vec![1974, 1999]);
}

#[tokio::test]
async fn search_marks_selected_refinements() {
    let mut backend = StubBackend::new();
    backend.push_response(vec![
        result(0.010, vec![doc(1)]),
        result(0.002, vec![grouped(1974, 2, &[]), grouped(1999, 1, &[])]),
    ]);
    let mut client = FacetedClient::new(backend, movie_config());
    client.attach(Facet::new("year"));

    let results = client.query("@year 1974").await.unwrap();
    let rows = &results.facets[0].1.matches;
    assert_eq!(rows[0].get("@selected").unwrap(), &json!(true));
    assert_eq!(rows[1].get("@selected").unwrap(), &json!(false));
}

#[tokio::test]
async fn search_augments_facet_page_for_active_refinements() {
    let mut backend = StubBackend::new();
    backend.push_response(vec![result(0.010, vec![doc(1)]), result(0.001, vec![])]);
    let mut client = FacetedClient::new(backend, movie_config());
    client.attach(Facet::new("genre").max_num_values(10));

    client.query("@genre drama @genre crime").await.unwrap();
    // Two active refinements on the facet's field: 10 + 2.
    let sub_query = &client.backend().executed()[1];
    assert_eq!(sub_query.state.limit, 12);
    assert_eq!(sub_query.state.select, "@groupby, @count");
    assert!(sub_query.state.group.is_some());
}

// =============================================================================
// Cache behavior
// =============================================================================

#[tokio::test]
async fn facet_cache_cycle_with_sticky_preload() {
    let store = Arc::new(InMemoryStore::new());
    let cache = FacetGroupCache::new(store.clone(), "it_");

    let canonical = "(@* drama)(@* drama)";
    let stored = vec![
        FacetResult {
            time: 0.001,
            total_found: 2,
            error: None,
            warning: None,
            matches: vec![
                BTreeMap::from([("@groupby".to_string(), json!(1)), ("@count".to_string(), json!(4))]),
                BTreeMap::from([("@groupby".to_string(), json!(2)), ("@count".to_string(), json!(1))]),
            ],
        },
        FacetResult {
            time: 0.001,
            total_found: 2,
            error: None,
            warning: None,
            matches: vec![
                BTreeMap::from([("@groupby".to_string(), json!(1974)), ("@count".to_string(), json!(2))]),
                BTreeMap::from([("@groupby".to_string(), json!(1999)), ("@count".to_string(), json!(1))]),
            ],
        },
    ];

    assert!(cache.set_facets(canonical, &stored, false, true).await.unwrap());

    // Sticky entries survive an ordinary clear...
    cache.clear(false).await.unwrap();
    assert_eq!(cache.get_facets(canonical).await.unwrap(), Some(stored));

    // ...and only a sticky clear evicts them.
    cache.clear(true).await.unwrap();
    assert_eq!(cache.get_facets(canonical).await.unwrap(), None);
}

#[tokio::test]
async fn facet_group_cache_hit_skips_backend() {
    let store = Arc::new(InMemoryStore::new());

    let mut backend = StubBackend::new();
    backend.push_response(vec![result(0.002, vec![grouped(1974, 9, &[])])]);
    let mut group = FacetGroup::new();
    group.attach(Facet::new("year"));
    group.set_backend(Box::new(backend));
    group.set_cache(FacetGroupCache::new(store.clone(), "it_"));
    group.set_caching(true);

    let mut query = movie_query("@year 1974");
    group.compute(&mut query, None).await.unwrap();
    assert!(group.time() > 0.0);

    // A fresh group over the same store: pure cache hit, zero backend
    // calls, the hit marker on the aggregate time.
    let mut group = FacetGroup::new();
    group.attach(Facet::new("year"));
    group.set_cache(FacetGroupCache::new(store, "it_"));
    group.set_caching(true);
    let mut query = movie_query("@year 1974");
    group.compute(&mut query, None).await.unwrap();
    assert_eq!(group.time(), -1.0);
    assert_eq!(group.get("year").unwrap().len(), 1);
}

#[tokio::test]
async fn preloaded_results_survive_cache_flush() {
    let store = Arc::new(InMemoryStore::new());

    let mut backend = StubBackend::new();
    backend.push_response(vec![result(0.002, vec![grouped(1974, 9, &[])])]);
    let mut group = FacetGroup::new();
    group.attach(Facet::new("year"));
    group.set_backend(Box::new(backend));
    group.set_cache(FacetGroupCache::new(store.clone(), "it_"));
    group.set_preloading(true);

    let mut query = movie_query("@year 1974");
    group.preload(&mut query).await.unwrap();

    // Flush ordinary entries; the preloaded one must remain readable.
    FacetGroupCache::new(store.clone(), "it_").clear(false).await.unwrap();

    let mut group = FacetGroup::new();
    group.attach(Facet::new("year"));
    group.set_cache(FacetGroupCache::new(store, "it_"));
    group.set_preloading(true);
    let mut query = movie_query("@year 1974");
    group.compute(&mut query, None).await.unwrap();
    assert_eq!(group.time(), -1.0);
}

#[tokio::test]
async fn client_preload_then_cached_search() {
    let store = Arc::new(InMemoryStore::new());
    let mut config = movie_config();
    config.caching = false;
    config.preloading = true;
    config.env = "it_".into();

    let mut backend = StubBackend::new();
    backend.push_response(vec![result(0.002, vec![grouped(1974, 2, &[])])]);
    let mut client = FacetedClient::new(backend, config.clone());
    client.attach(Facet::new("year"));
    client.attach_cache(store.clone());
    client.preload("@year 1974").await.unwrap();
    // Preload runs only the facet sub-query, no main query.
    assert_eq!(client.backend().executed().len(), 1);

    // Ordinary flush; the preloaded entry survives and answers searches.
    FacetGroupCache::new(store.clone(), "it_").clear(false).await.unwrap();

    let mut backend = StubBackend::new();
    backend.push_response(vec![result(0.010, vec![doc(1)])]);
    let mut client = FacetedClient::new(backend, config);
    client.attach(Facet::new("year"));
    client.attach_cache(store);
    let results = client.query("@year 1974").await.unwrap();
    assert_eq!(client.facets().time(), -1.0);
    assert_eq!(results.facets[0].1.matches.len(), 1);
}

// =============================================================================
// Redis adapter (requires Docker)
// =============================================================================

mod redis_adapter {
    use super::*;
    use sphinx_facets::{KvStore, RedisStore};
    use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

    fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
        let image = GenericImage::new("redis", "7-alpine")
            .with_exposed_port(6379)
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
        docker.run(image)
    }

    fn unique_env() -> String {
        format!("it_{}_", uuid::Uuid::new_v4().simple())
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn redis_store_round_trip() {
        let docker = Cli::default();
        let redis = redis_container(&docker);
        let url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));
        let store = RedisStore::new(&url).await.unwrap();
        let env = unique_env();

        let key = format!("{env}abc");
        assert_eq!(store.get(&key).await.unwrap(), None);
        assert!(store.set(&key, b"first", false, false).await.unwrap());
        assert!(!store.set(&key, b"second", false, false).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(b"first".to_vec()));
        assert!(store.set(&key, b"second", true, false).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn redis_store_clear_spares_sticky() {
        let docker = Cli::default();
        let redis = redis_container(&docker);
        let url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));
        let store = Arc::new(RedisStore::new(&url).await.unwrap());
        let cache = FacetGroupCache::new(store, unique_env());

        let canonical = "(@genres drama)";
        let results = vec![FacetResult {
            time: 0.001,
            total_found: 1,
            error: None,
            warning: None,
            matches: vec![BTreeMap::from([
                ("@groupby".to_string(), json!(1)),
                ("@count".to_string(), json!(4)),
            ])],
        }];

        cache.set_facets(canonical, &results, false, true).await.unwrap();
        cache.set_facets("(@year 1974)", &results, false, false).await.unwrap();

        assert_eq!(cache.clear(false).await.unwrap(), 1);
        assert_eq!(cache.get_facets(canonical).await.unwrap(), Some(results));
        assert!(cache.get_facets("(@year 1974)").await.unwrap().is_none());

        cache.clear(true).await.unwrap();
        assert_eq!(cache.get_facets(canonical).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn full_pipeline_with_redis_cache() {
        let docker = Cli::default();
        let redis = redis_container(&docker);
        let url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));
        let store = Arc::new(RedisStore::new(&url).await.unwrap());

        let mut config = movie_config();
        config.caching = true;
        config.env = unique_env();

        let mut backend = StubBackend::new();
        backend.push_response(vec![
            result(0.010, vec![doc(1)]),
            result(0.002, vec![grouped(1974, 2, &[])]),
        ]);
        let mut client = FacetedClient::new(backend, config.clone());
        client.attach(Facet::new("year"));
        client.attach_cache(store.clone());
        client.query("@year 1974").await.unwrap();

        let mut backend = StubBackend::new();
        backend.push_response(vec![result(0.010, vec![doc(1)])]);
        let mut client = FacetedClient::new(backend, config);
        client.attach(Facet::new("year"));
        client.attach_cache(store);
        let results = client.query("@year 1974").await.unwrap();

        assert_eq!(client.facets().time(), -1.0);
        assert_eq!(results.facets[0].1.matches.len(), 1);
        assert_eq!(client.backend().executed().len(), 1);
    }
}
