mod common;

use common::strategies::*;
use kafka_bridge::foreign::mock::MockLibrary;
use kafka_bridge::{OpaqueRegistry, TopicCache, NO_CONTEXT};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    OneShot,
    Persistent,
}

proptest! {
    /// Property: tokens are positive, never repeat while live, and one-shot
    /// entries come back exactly once with the value they were stored with
    #[test]
    fn opaque_registry_matches_model(ops in prop::collection::vec(registry_op_strategy(), 1..200)) {
        let registry = OpaqueRegistry::new();
        let mut model: HashMap<usize, (Kind, u64)> = HashMap::new();
        let mut issued: Vec<usize> = Vec::new();
        let mut next_value = 0u64;

        for op in ops {
            match op {
                RegistryOp::Put | RegistryOp::PutPersistent => {
                    next_value += 1;
                    let (token, kind) = if matches!(op, RegistryOp::Put) {
                        (registry.put(next_value), Kind::OneShot)
                    } else {
                        (registry.put_persistent(next_value), Kind::Persistent)
                    };
                    prop_assert_ne!(token, NO_CONTEXT);
                    prop_assert!(!model.contains_key(&token), "token {} handed out twice", token);
                    model.insert(token, (kind, next_value));
                    issued.push(token);
                }
                RegistryOp::Get(n) if !issued.is_empty() => {
                    let token = issued[n % issued.len()];
                    let got = registry.get(token);
                    match model.get(&token).copied() {
                        Some((Kind::OneShot, value)) => {
                            prop_assert_eq!(got, Some(value));
                            model.remove(&token);
                        }
                        Some((Kind::Persistent, value)) => {
                            prop_assert_eq!(got, None);
                            prop_assert_eq!(registry.get_persistent(token).map(|v| *v), Some(value));
                        }
                        None => prop_assert_eq!(got, None),
                    }
                }
                RegistryOp::Remove(n) if !issued.is_empty() => {
                    let token = issued[n % issued.len()];
                    prop_assert_eq!(registry.remove(token), model.remove(&token).is_some());
                }
                _ => {}
            }
            prop_assert_eq!(registry.len(), model.len());
        }
    }

    /// Property: a fresh registry hands out 1, 2, 3, ... in order
    #[test]
    fn opaque_tokens_are_dense_from_one(count in 1usize..100) {
        let registry = OpaqueRegistry::new();
        let tokens: Vec<usize> = (0..count).map(|i| registry.put(i)).collect();
        let expected: Vec<usize> = (1..=count).collect();
        prop_assert_eq!(tokens, expected);
    }

    /// Property: the topic cache creates exactly one native object per name
    /// and maps it back to the same name
    #[test]
    fn topic_cache_is_bijective(names in prop::collection::vec(topic_name_strategy(), 1..30)) {
        let lib = Arc::new(MockLibrary::new("mock#prop"));
        let cache = TopicCache::new(lib.clone());

        let mut seen = HashMap::new();
        for name in &names {
            let topic = cache.get_or_create(name).unwrap();
            let first = *seen.entry(name.clone()).or_insert(topic);
            prop_assert_eq!(first, topic);
            prop_assert_eq!(cache.name_of(topic).unwrap(), name.clone());
        }

        let distinct: HashSet<&String> = names.iter().collect();
        prop_assert_eq!(lib.topics_created(), distinct.len());
        prop_assert_eq!(cache.len(), distinct.len());

        prop_assert_eq!(cache.destroy_all(), distinct.len());
        prop_assert_eq!(lib.live_topics(), 0);
    }
}
