//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the sharded core against a plain model.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{ShardedCacheCore, ValidationMode};
use crate::config::Config;
use crate::error::CacheError;
use crate::incident::IncidentResponseCoordinator;

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 1000;
const TEST_NUM_SHARDS: usize = 4;

fn test_core(max_entries: usize, max_memory_mb: usize) -> ShardedCacheCore {
    let config = Config {
        num_shards: TEST_NUM_SHARDS,
        max_entries,
        max_memory_mb,
        ttl_seconds: 0,
        enable_wal: false,
        ..Config::default()
    };
    ShardedCacheCore::new(&config, None, Arc::new(IncidentResponseCoordinator::new()))
}

// == Strategies ==
/// Generates valid cache keys in every validation mode
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_:]{1,64}"
}

/// Generates opaque byte values
fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: Vec<u8> },
    Get { key: String },
    Delete { key: String },
}

/// Draws keys from a small pool so operations collide
fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    let key = "k[0-9]{1,2}";
    prop_oneof![
        (key, value_strategy()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        key.prop_map(|key| CacheOp::Get { key }),
        key.prop_map(|key| CacheOp::Delete { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Property 1: Round-trip Storage Consistency
    // A stored value is returned unchanged before it expires.
    #[test]
    fn prop_roundtrip_storage(key in valid_key_strategy(), value in value_strategy()) {
        let core = test_core(TEST_MAX_ENTRIES, 16);
        core.set(&key, value.clone(), None).unwrap();
        prop_assert_eq!(core.get(&key).unwrap(), Some(value));
    }

    // Property 2: Delete Removes Entry
    #[test]
    fn prop_delete_removes_entry(key in valid_key_strategy(), value in value_strategy()) {
        let core = test_core(TEST_MAX_ENTRIES, 16);
        core.set(&key, value, None).unwrap();
        prop_assert!(core.delete(&key).unwrap());
        prop_assert_eq!(core.get(&key).unwrap(), None);
        prop_assert_eq!(core.total_bytes(), 0);
    }

    // Property 3: Operation Sequences Match a Map Model
    // Without bound pressure the core behaves like a HashMap, and the
    // hit/miss/set counters reflect exactly what happened.
    #[test]
    fn prop_matches_model(ops in prop::collection::vec(cache_op_strategy(), 1..100)) {
        let core = test_core(TEST_MAX_ENTRIES, 16);
        let mut model: HashMap<String, Vec<u8>> = HashMap::new();
        let (mut hits, mut misses, mut sets) = (0u64, 0u64, 0u64);

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    core.set(&key, value.clone(), None).unwrap();
                    model.insert(key, value);
                    sets += 1;
                }
                CacheOp::Get { key } => {
                    let got = core.get(&key).unwrap();
                    if got.is_some() { hits += 1 } else { misses += 1 }
                    prop_assert_eq!(got.as_ref(), model.get(&key));
                }
                CacheOp::Delete { key } => {
                    prop_assert_eq!(core.delete(&key).unwrap(), model.remove(&key).is_some());
                }
            }
        }

        let metrics = crate::cache::DetailedMetrics::from_shards(core.shard_metrics());
        prop_assert_eq!(metrics.hits, hits);
        prop_assert_eq!(metrics.misses, misses);
        prop_assert_eq!(metrics.sets, sets);
        prop_assert_eq!(core.len(), model.len());
        prop_assert!(core.verify_accounting().is_ok());
    }

    // Property 4: Entry Bound Enforcement
    // No sequence of sets pushes the entry count over the bound; a rejected
    // set is always CacheFull.
    #[test]
    fn prop_entry_bound_enforced(
        entries in prop::collection::vec((valid_key_strategy(), value_strategy()), 1..200)
    ) {
        let max_entries = 20;
        let core = test_core(max_entries, 16);

        for (key, value) in entries {
            match core.set(&key, value, None) {
                Ok(()) => {}
                Err(CacheError::CacheFull(_)) => {}
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
            prop_assert!(core.len() <= max_entries, "{} entries over {}", core.len(), max_entries);
        }
        prop_assert!(core.verify_accounting().is_ok());
    }

    // Property 5: Byte Bound Enforcement
    #[test]
    fn prop_byte_bound_enforced(
        sizes in prop::collection::vec(1usize..300_000, 1..30)
    ) {
        let core = test_core(TEST_MAX_ENTRIES, 1);
        for (i, size) in sizes.into_iter().enumerate() {
            let _ = core.set(&format!("blob-{i}"), vec![7u8; size], None);
            prop_assert!(core.total_bytes() <= core.max_bytes());
        }
        prop_assert!(core.verify_accounting().is_ok());
    }

    // Property 6: Validation Modes
    // Key length limits follow the mode; control characters are rejected
    // outside relaxed mode.
    #[test]
    fn prop_validation_modes(len in 1usize..9000, control in prop::bool::ANY) {
        for mode in [ValidationMode::Strict, ValidationMode::Normal, ValidationMode::Relaxed] {
            let core = ShardedCacheCore::new(
                &Config {
                    num_shards: 2,
                    validation_mode: mode,
                    enable_wal: false,
                    ..Config::default()
                },
                None,
                Arc::new(IncidentResponseCoordinator::new()),
            );
            let mut key = "k".repeat(len);
            if control {
                key.replace_range(0..1, "\t");
            }

            let expect_ok = len <= mode.max_key_chars() && (!control || mode == ValidationMode::Relaxed);
            let result = core.set(&key, b"v".to_vec(), None);
            prop_assert_eq!(result.is_ok(), expect_ok, "mode {} len {} control {}", mode, len, control);
            if !expect_ok {
                prop_assert!(matches!(result, Err(CacheError::InvalidKey(_))));
            }
        }
    }
}

// Fewer cases for the sleep-based TTL check
proptest! {
    #![proptest_config(ProptestConfig::with_cases(3))]

    // Property 7: TTL Expiration Behavior
    // After the TTL elapses and a sweep runs, the entry is gone.
    #[test]
    fn prop_ttl_expiration_behavior(key in valid_key_strategy(), value in value_strategy()) {
        let core = test_core(TEST_MAX_ENTRIES, 16);
        core.set(&key, value.clone(), Some(1)).unwrap();
        prop_assert_eq!(core.get(&key).unwrap(), Some(value));

        std::thread::sleep(std::time::Duration::from_millis(1100));
        prop_assert_eq!(core.sweep_expired(), 1);
        prop_assert_eq!(core.get(&key).unwrap(), None);
        prop_assert!(core.is_empty());
    }
}
