//! Registry of per-candidate resource handles.
//!
//! The UI attaches an opaque handle (an animation, a decoded image, a view
//! binding) to a candidate id. The engine owns the registry and releases
//! handles when a card is swiped away, when the pool resets and when the feed
//! closes. Dropping a released handle is its disposal.

use std::collections::HashMap;

use crate::domain::CandidateId;

#[derive(Debug)]
pub struct ResourceRegistry<H> {
    handles: HashMap<CandidateId, H>,
}

impl<H> ResourceRegistry<H> {
    pub fn new() -> Self {
        Self { handles: HashMap::new() }
    }

    /// Attach a handle, returning the one it replaced.
    pub fn register(&mut self, id: impl Into<CandidateId>, handle: H) -> Option<H> {
        self.handles.insert(id.into(), handle)
    }

    pub fn release(&mut self, id: &str) -> Option<H> {
        self.handles.remove(id)
    }

    /// Release every handle, returning them for disposal.
    pub fn release_all(&mut self) -> Vec<(CandidateId, H)> {
        self.handles.drain().collect()
    }

    pub fn get(&self, id: &str) -> Option<&H> {
        self.handles.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<H> Default for ResourceRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release() {
        let mut registry = ResourceRegistry::new();
        assert!(registry.register("c1", 10u32).is_none());
        assert_eq!(registry.register("c1", 11), Some(10));
        assert_eq!(registry.get("c1"), Some(&11));

        assert_eq!(registry.release("c1"), Some(11));
        assert!(registry.release("c1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_all() {
        let mut registry = ResourceRegistry::new();
        registry.register("a", "anim-a");
        registry.register("b", "anim-b");

        let mut released = registry.release_all();
        released.sort();

        assert_eq!(released, vec![("a".to_string(), "anim-a"), ("b".to_string(), "anim-b")]);
        assert_eq!(registry.len(), 0);
        assert!(!registry.contains("a"));
    }
}
