//! # Opaque Registry
//!
//! Foreign callbacks can carry a single word-sized opaque value, never a typed
//! Rust reference. Host context is parked here under a fresh integer token,
//! the token crosses the boundary, and the callback trampoline trades it back
//! for the context.
//!
//! Tokens are dense positive integers; zero is reserved for "no context" and
//! is never handed out. One-shot entries are consumed by the first
//! [`get`](OpaqueRegistry::get). Callbacks that fire repeatedly either
//! re-register after each firing or use a persistent entry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Scalar carried through the foreign library in place of a reference
pub type OpaqueToken = usize;

/// Token value meaning "no context attached"
pub const NO_CONTEXT: OpaqueToken = 0;

#[derive(Debug)]
enum Entry<T> {
    OneShot(T),
    Persistent(Arc<T>),
}

#[derive(Debug)]
struct Inner<T> {
    next: OpaqueToken,
    entries: HashMap<OpaqueToken, Entry<T>>,
}

impl<T> Inner<T> {
    fn insert(&mut self, entry: Entry<T>) -> OpaqueToken {
        // Skip zero on wraparound, and any token still live from the last lap
        loop {
            self.next = self.next.wrapping_add(1);
            if self.next != NO_CONTEXT && !self.entries.contains_key(&self.next) {
                break;
            }
        }
        self.entries.insert(self.next, entry);
        self.next
    }
}

/// Token -> host context map for the foreign boundary. Thread-safe.
#[derive(Debug)]
pub struct OpaqueRegistry<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for OpaqueRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OpaqueRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next: NO_CONTEXT,
                entries: HashMap::new(),
            }),
        }
    }

    /// Park `context` and return the token that retrieves it once
    pub fn put(&self, context: T) -> OpaqueToken {
        self.inner.lock().insert(Entry::OneShot(context))
    }

    /// Take the context stored under a one-shot `token`, removing it.
    ///
    /// `NO_CONTEXT` never matches. Persistent tokens are left in place and
    /// yield `None` here; use [`get_persistent`](Self::get_persistent).
    pub fn get(&self, token: OpaqueToken) -> Option<T> {
        if token == NO_CONTEXT {
            return None;
        }
        let mut inner = self.inner.lock();
        match inner.entries.remove(&token) {
            Some(Entry::OneShot(context)) => Some(context),
            Some(persistent @ Entry::Persistent(_)) => {
                inner.entries.insert(token, persistent);
                None
            }
            None => None,
        }
    }

    /// Register a context that survives any number of lookups
    pub fn put_persistent(&self, context: T) -> OpaqueToken {
        self.inner
            .lock()
            .insert(Entry::Persistent(Arc::new(context)))
    }

    /// Shared access to a persistent entry without consuming it
    pub fn get_persistent(&self, token: OpaqueToken) -> Option<Arc<T>> {
        if token == NO_CONTEXT {
            return None;
        }
        match self.inner.lock().entries.get(&token) {
            Some(Entry::Persistent(context)) => Some(Arc::clone(context)),
            _ => None,
        }
    }

    /// Drop any entry, one-shot or persistent. True if one was present.
    pub fn remove(&self, token: OpaqueToken) -> bool {
        token != NO_CONTEXT && self.inner.lock().entries.remove(&token).is_some()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, returning how many were still live
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let live = inner.entries.len();
        inner.entries.clear();
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tokens_are_one_and_two() {
        let registry = OpaqueRegistry::new();
        assert_eq!(registry.put("ctxA"), 1);
        assert_eq!(registry.put("ctxB"), 2);
        assert_eq!(registry.get(1), Some("ctxA"));
        assert_eq!(registry.get(1), None);
        assert_eq!(registry.get(2), Some("ctxB"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_zero_never_matches() {
        let registry = OpaqueRegistry::new();
        assert_eq!(registry.get(NO_CONTEXT), None);
        registry.put("ctx");
        assert_eq!(registry.get(NO_CONTEXT), None);
        assert!(!registry.remove(NO_CONTEXT));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_wraparound_skips_zero_and_live_tokens() {
        let registry = OpaqueRegistry::new();
        registry.inner.lock().next = usize::MAX - 1;
        assert_eq!(registry.put("a"), usize::MAX);
        // Token 1 is still live from an earlier lap
        registry.inner.lock().entries.insert(1, Entry::OneShot("old"));
        assert_eq!(registry.put("b"), 2);
        assert_eq!(registry.get(1), Some("old"));
    }

    #[test]
    fn test_persistent_entries_survive_lookup() {
        let registry = OpaqueRegistry::new();
        let token = registry.put_persistent(String::from("rebalance_cb"));
        assert_eq!(registry.get(token), None);
        assert_eq!(registry.get_persistent(token).as_deref().map(String::as_str), Some("rebalance_cb"));
        assert!(registry.get_persistent(token).is_some());
        assert!(registry.remove(token));
        assert!(registry.get_persistent(token).is_none());
    }

    #[test]
    fn test_concurrent_puts_are_unique() {
        let registry = Arc::new(OpaqueRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || (0..500).map(|i| registry.put(t * 1000 + i)).collect::<Vec<_>>())
            })
            .collect();
        let mut tokens: Vec<OpaqueToken> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        tokens.sort_unstable();
        tokens.dedup();
        assert_eq!(tokens.len(), 4000);
        assert_eq!(tokens.first(), Some(&1));
        assert_eq!(tokens.last(), Some(&4000));
    }
}
