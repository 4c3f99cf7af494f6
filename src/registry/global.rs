//! # Global Handle Registry
//!
//! Callback trampolines handed to the foreign library are plain functions
//! with no per-instance state. The only thing they receive is the opaque
//! pointer the client was configured with, so a process-wide table maps that
//! pointer back to the owning handle.
//!
//! Entries live exactly as long as their handle. The registry holds `Weak`
//! references so it never keeps a handle alive on its own.
//!
//! Callers must unregister only after every in-flight foreign callback that
//! could carry the token has returned; this is not enforced here.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// A unique, stable address used as the client's opaque pointer.
///
/// The backing allocation is what makes the value unique; releasing the
/// token frees it, so it must be unregistered first.
#[derive(Debug)]
pub struct PointerToken(Box<u8>);

impl PointerToken {
    pub fn allocate() -> Self {
        Self(Box::new(0))
    }

    /// The token as the scalar the foreign library carries
    pub fn as_usize(&self) -> usize {
        &*self.0 as *const u8 as usize
    }

    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.as_usize() as *mut std::ffi::c_void
    }
}

/// Pointer token -> owner map shared by every handle in the process
#[derive(Debug)]
pub struct GlobalHandleRegistry<T> {
    handles: Mutex<HashMap<usize, Weak<T>>>,
}

impl<T> Default for GlobalHandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GlobalHandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, token: &PointerToken, owner: &Arc<T>) {
        self.handles
            .lock()
            .insert(token.as_usize(), Arc::downgrade(owner));
    }

    /// Resolve a raw token received by a trampoline. `None` for unknown
    /// tokens and for owners already dropped.
    pub fn lookup(&self, token: usize) -> Option<Arc<T>> {
        self.handles.lock().get(&token).and_then(Weak::upgrade)
    }

    pub fn unregister(&self, token: &PointerToken) -> bool {
        self.handles.lock().remove(&token.as_usize()).is_some()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_unregister() {
        let registry = GlobalHandleRegistry::new();
        let token = PointerToken::allocate();
        let owner = Arc::new("consumer-1".to_string());

        registry.register(&token, &owner);
        let found = registry.lookup(token.as_usize()).unwrap();
        assert!(Arc::ptr_eq(&found, &owner));

        assert!(registry.unregister(&token));
        assert!(registry.lookup(token.as_usize()).is_none());
        assert!(!registry.unregister(&token));
    }

    #[test]
    fn test_tokens_are_distinct_while_live() {
        let a = PointerToken::allocate();
        let b = PointerToken::allocate();
        assert_ne!(a.as_usize(), b.as_usize());
        assert_ne!(a.as_usize(), 0);
    }

    #[test]
    fn test_dropped_owner_is_not_resolved() {
        let registry = GlobalHandleRegistry::new();
        let token = PointerToken::allocate();
        let owner = Arc::new(42u32);
        registry.register(&token, &owner);
        drop(owner);
        assert!(registry.lookup(token.as_usize()).is_none());
        assert_eq!(registry.len(), 1);
    }
}
