use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rowset_query::{
    refresh_channel, BrowseCacheConfig, BrowseResult, BrowseValueCache, CatalogEvent, Fingerprint,
};
use rowset_table::Value;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn result(values: &[&str]) -> Arc<BrowseResult> {
    Arc::new(BrowseResult {
        values: values.iter().map(|v| Value::text(*v)).collect(),
        labels: None,
        truncated: false,
    })
}

fn fp(source: &str, column: &str) -> Fingerprint {
    Fingerprint::builder(source, column, "ann").build()
}

#[test]
fn stored_entries_round_trip_in_order() {
    let cache = BrowseValueCache::new(BrowseCacheConfig::default());
    let key = fp("sales", "region");
    assert!(cache.lookup(&key).is_none());

    assert!(cache.store(&key, result(&["west", "east", "north"])));
    let entry = cache.lookup(&key).expect("cached");
    assert_eq!(
        entry.result.values,
        vec![Value::text("west"), Value::text("east"), Value::text("north")]
    );

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.stores, 1);
}

#[test]
fn reserved_variables_do_not_fragment_the_cache() {
    let cache = BrowseValueCache::new(BrowseCacheConfig::default());
    let first = Fingerprint::builder("sales", "region", "ann")
        .variable("year", "2024")
        .variable("__request_id__", "r-1")
        .variable("roles", "admin")
        .build();
    let second = Fingerprint::builder("sales", "region", "ann")
        .variable("__request_id__", "r-2")
        .variable("year", "2024")
        .build();

    assert_eq!(first, second);
    cache.store(&first, result(&["a"]));
    assert!(cache.lookup(&second).is_some());
}

#[test]
fn user_and_real_variables_are_part_of_the_key() {
    let base = Fingerprint::builder("sales", "region", "ann").variable("year", "2024").build();
    let other_user = Fingerprint::builder("sales", "region", "bob").variable("year", "2024").build();
    let other_year = Fingerprint::builder("sales", "region", "ann").variable("year", "2023").build();
    assert_ne!(base, other_user);
    assert_ne!(base, other_year);
}

#[test]
fn eviction_follows_insertion_order_not_recency() {
    let cache = BrowseValueCache::new(BrowseCacheConfig {
        max_entries: 2,
        ..BrowseCacheConfig::default()
    });
    let (a, b, c) = (fp("s", "a"), fp("s", "b"), fp("s", "c"));
    cache.store(&a, result(&["a"]));
    cache.store(&b, result(&["b"]));

    // Reading `a` must not protect it from eviction.
    assert!(cache.lookup(&a).is_some());
    cache.store(&c, result(&["c"]));

    assert!(cache.lookup(&a).is_none());
    assert!(cache.lookup(&b).is_some());
    assert!(cache.lookup(&c).is_some());
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn restoring_a_key_counts_as_a_new_insertion() {
    let cache = BrowseValueCache::new(BrowseCacheConfig {
        max_entries: 2,
        ..BrowseCacheConfig::default()
    });
    let (a, b, c) = (fp("s", "a"), fp("s", "b"), fp("s", "c"));
    cache.store(&a, result(&["a"]));
    cache.store(&b, result(&["b"]));
    cache.store(&a, result(&["a2"]));
    cache.store(&c, result(&["c"]));

    assert!(cache.lookup(&b).is_none());
    assert_eq!(
        cache.lookup(&a).expect("a kept").result.values,
        vec![Value::text("a2")]
    );
}

#[test]
fn expired_entries_are_dropped() {
    let cache = BrowseValueCache::new(BrowseCacheConfig {
        ttl_secs: 0,
        ..BrowseCacheConfig::default()
    });
    let key = fp("sales", "region");
    cache.store(&key, result(&["a"]));
    thread::sleep(Duration::from_millis(5));

    assert!(cache.lookup(&key).is_none());
    assert_eq!(cache.stats().expirations, 1);
    assert!(cache.is_empty());
}

#[test]
fn excluded_columns_and_disabled_cache_never_store() {
    let cache = BrowseValueCache::new(BrowseCacheConfig {
        exclusions: vec!["Orders::Status".to_string(), "q1::total".to_string()],
        ..BrowseCacheConfig::default()
    });
    assert!(cache.is_excluded("orders", "STATUS"));
    assert!(!cache.store(&fp("orders", "status"), result(&["open"])));
    assert!(cache.lookup(&fp("orders", "status")).is_none());
    assert!(cache.store(&fp("orders", "region"), result(&["west"])));

    let disabled = BrowseValueCache::new(BrowseCacheConfig {
        disabled: true,
        ..BrowseCacheConfig::default()
    });
    assert!(!disabled.store(&fp("orders", "region"), result(&["west"])));
    assert!(disabled.lookup(&fp("orders", "region")).is_none());
    assert!(disabled.is_empty());
}

#[test]
fn clear_drops_everything() {
    let cache = BrowseValueCache::new(BrowseCacheConfig::default());
    cache.store(&fp("s", "a"), result(&["a"]));
    cache.store(&fp("s", "b"), result(&["b"]));
    cache.on_catalog_event(CatalogEvent::Refreshed);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().clears, 1);
}

#[test]
fn config_loads_from_json_with_defaults() {
    let config: BrowseCacheConfig =
        serde_json::from_str(r#"{"max_entries": 5, "exclusions": ["entity::attribute"]}"#)
            .expect("parse config");
    assert_eq!(config.max_entries, 5);
    assert_eq!(config.ttl_secs, 24 * 60 * 60);
    assert!(!config.disabled);
    assert_eq!(config.exclusions, vec!["entity::attribute".to_string()]);
}

#[tokio::test]
async fn refresh_events_clear_the_cache() {
    let cache = Arc::new(BrowseValueCache::new(BrowseCacheConfig::default()));
    let (tx, rx) = refresh_channel(8);
    let listener = cache.spawn_refresh_listener(rx);

    cache.store(&fp("s", "a"), result(&["a"]));
    tx.send(CatalogEvent::Refreshed).expect("listener subscribed");

    for _ in 0..100 {
        if cache.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cache.is_empty());

    drop(tx);
    listener.await.expect("listener exits when senders drop");
}

proptest! {
    #[test]
    fn fingerprint_ignores_system_variable_values(
        year in "[0-9]{4}",
        request_a in "[a-z0-9-]{1,12}",
        request_b in "[a-z0-9-]{1,12}",
        group_a in "[a-z]{1,8}",
        group_b in "[a-z]{1,8}",
    ) {
        let a = Fingerprint::builder("sales", "region", "ann")
            .variable("year", year.clone())
            .variable("__request_id__", request_a)
            .variable("group", group_a)
            .build();
        let b = Fingerprint::builder("sales", "region", "ann")
            .variable("group", group_b)
            .variable("__request_id__", request_b)
            .variable("year", year)
            .build();
        prop_assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn mixed_values_come_out_sorted_and_distinct(
        picks in proptest::collection::vec((any::<bool>(), 0u8..30), 0..40),
    ) {
        let values: Vec<Value> = picks
            .iter()
            .map(|(as_text, n)| {
                if *as_text {
                    Value::text(n.to_string())
                } else {
                    Value::from(f64::from(*n))
                }
            })
            .collect();
        let distinct: std::collections::HashSet<(bool, u8)> = picks.iter().copied().collect();

        let mixed = distinct.iter().any(|(t, _)| *t) && distinct.iter().any(|(t, _)| !*t);
        let cmp = if mixed { Value::compare_display } else { Value::compare };

        let result = BrowseResult::from_values(values, false);
        prop_assert_eq!(result.len(), distinct.len());
        for pair in result.values.windows(2) {
            prop_assert!(cmp(&pair[0], &pair[1]).is_lt(), "{:?} before {:?}", pair[0], pair[1]);
        }
    }
}

