//! # Topic Cache
//!
//! Bidirectional name <-> native topic object cache. At most one native
//! object is created per name for the lifetime of the cache, entries are
//! never evicted one by one, and everything is released in bulk when the
//! owning handle closes.
//!
//! Creation holds the cache lock across `topic_new` so concurrent callers for
//! the same name can never create two objects; the foreign call does not
//! re-enter the cache, so this cannot deadlock.

use crate::error::{BridgeError, BridgeResult};
use crate::foreign::{ForeignLibrary, NativeTopic};
use crate::logging::log_error;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct TopicMaps {
    by_name: HashMap<String, NativeTopic>,
    by_object: HashMap<NativeTopic, String>,
    destroyed: bool,
}

pub struct TopicCache {
    foreign: Arc<dyn ForeignLibrary>,
    maps: Mutex<TopicMaps>,
}

impl std::fmt::Debug for TopicCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicCache")
            .field("maps", &*self.maps.lock())
            .finish()
    }
}

impl TopicCache {
    pub fn new(foreign: Arc<dyn ForeignLibrary>) -> Self {
        Self {
            foreign,
            maps: Mutex::new(TopicMaps::default()),
        }
    }

    /// Find or create the native topic object for `name`.
    ///
    /// Creation failure means the client is misconfigured beyond what the
    /// bridge can repair; it is reported and never retried.
    pub fn get_or_create(&self, name: &str) -> BridgeResult<NativeTopic> {
        let mut maps = self.maps.lock();
        self.get_or_create_locked(&mut maps, name)
    }

    fn get_or_create_locked(&self, maps: &mut TopicMaps, name: &str) -> BridgeResult<NativeTopic> {
        if maps.destroyed {
            return Err(BridgeError::InvalidState {
                expected: "ready",
                found: "closed",
            });
        }
        if let Some(topic) = maps.by_name.get(name) {
            return Ok(*topic);
        }

        let topic = self.foreign.topic_new(name).map_err(|e| {
            log_error("topic_cache", "topic_new", &e.to_string(), Some(name));
            BridgeError::topic_creation(name, e.message)
        })?;

        maps.by_name.insert(name.to_string(), topic);
        maps.by_object.insert(topic, name.to_string());
        debug!(topic = name, object = ?topic, "Cached native topic");
        Ok(topic)
    }

    /// Topic name for a native object, preferably without calling across.
    ///
    /// On a miss the name is read from the object itself and cached through
    /// the same path as [`get_or_create`](Self::get_or_create), so the cache
    /// holds its own reference for that name.
    pub fn name_of(&self, topic: NativeTopic) -> BridgeResult<String> {
        let mut maps = self.maps.lock();
        if let Some(name) = maps.by_object.get(&topic) {
            return Ok(name.clone());
        }

        let name = self.foreign.topic_name(topic);
        self.get_or_create_locked(&mut maps, &name)?;
        Ok(name)
    }

    pub fn len(&self) -> usize {
        self.maps.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every native object. The cache refuses further use.
    pub fn destroy_all(&self) -> usize {
        let objects: Vec<NativeTopic> = {
            let mut maps = self.maps.lock();
            maps.destroyed = true;
            maps.by_object.clear();
            maps.by_name.drain().map(|(_, topic)| topic).collect()
        };
        for topic in &objects {
            self.foreign.topic_destroy(*topic);
        }
        debug!(count = objects.len(), "Destroyed cached native topics");
        objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign::mock::MockLibrary;

    fn cache() -> (Arc<MockLibrary>, TopicCache) {
        let lib = Arc::new(MockLibrary::new("mock#topics"));
        let cache = TopicCache::new(lib.clone());
        (lib, cache)
    }

    #[test]
    fn test_get_or_create_caches_both_directions() {
        let (lib, cache) = cache();
        let first = cache.get_or_create("orders").unwrap();
        let second = cache.get_or_create("orders").unwrap();
        assert_eq!(first, second);
        assert_eq!(lib.topics_created(), 1);
        assert_eq!(cache.name_of(first).unwrap(), "orders");
    }

    #[test]
    fn test_name_of_unknown_object_inserts_it() {
        let (lib, cache) = cache();
        let foreign_topic = lib.topic_new("payments").unwrap();
        assert_eq!(cache.name_of(foreign_topic).unwrap(), "payments");
        assert_eq!(cache.len(), 1);
        // Forward mapping now resolves without another creation
        cache.get_or_create("payments").unwrap();
        assert_eq!(lib.topics_created(), 2);
        lib.topic_destroy(foreign_topic);
        cache.destroy_all();
        assert_eq!(lib.live_topics(), 0);
    }

    #[test]
    fn test_creation_failure_is_reported() {
        let (lib, cache) = cache();
        lib.fail_topic_creation(true);
        let err = cache.get_or_create("orders").unwrap_err();
        assert!(matches!(err, BridgeError::TopicCreation { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_destroy_all_releases_everything() {
        let (lib, cache) = cache();
        cache.get_or_create("a").unwrap();
        cache.get_or_create("b").unwrap();
        assert_eq!(cache.destroy_all(), 2);
        assert_eq!(lib.live_topics(), 0);
        assert!(cache.get_or_create("a").is_err());
    }
}
