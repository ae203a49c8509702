// File: src/namespace.rs
//
// Process-wide stack namespace: a single locked map from qualified name
// (context prefix + local name) to shared stack. Bindings can be replaced
// (DEF relies on this) but stacks themselves are never destroyed; a replaced
// stack stays alive for whoever still holds it.

use crate::stack::Stack;
use ahash::AHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Shared stack registry plus the id and anonymous-name mints.
#[derive(Debug)]
pub struct Namespace {
    stacks: Mutex<AHashMap<String, Arc<Stack>>>,
    next_stack_id: AtomicU64,
    next_anonymous: AtomicU64,
}

impl Namespace {
    pub fn new() -> Namespace {
        Namespace {
            stacks: Mutex::new(AHashMap::new()),
            next_stack_id: AtomicU64::new(0),
            next_anonymous: AtomicU64::new(0),
        }
    }

    fn mint(&self) -> Arc<Stack> {
        let id = self.next_stack_id.fetch_add(1, Ordering::Relaxed);
        Arc::new(Stack::new(id))
    }

    /// Look up a fully qualified name.
    pub fn get(&self, qualified: &str) -> Option<Arc<Stack>> {
        self.stacks.lock().unwrap().get(qualified).cloned()
    }

    /// Create a stack under a fully qualified name, replacing any previous
    /// binding, and hand back the new stack.
    pub fn create(&self, qualified: &str) -> Arc<Stack> {
        let stack = self.mint();
        self.stacks
            .lock()
            .unwrap()
            .insert(qualified.to_string(), stack.clone());
        stack
    }

    /// A stack with a minted id but no namespace entry; scratch space for
    /// CODE rewriting and program staging.
    pub fn detached(&self) -> Arc<Stack> {
        self.mint()
    }

    /// Next `_anon_<n>` local name. The counter is process-wide, so the
    /// name is unique regardless of which context prefixes it.
    pub fn fresh_anonymous(&self) -> String {
        let n = self.next_anonymous.fetch_add(1, Ordering::Relaxed);
        format!("_anon_{n}")
    }

    /// Number of registered stacks.
    pub fn len(&self) -> usize {
        self.stacks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Namespace {
    fn default() -> Namespace {
        Namespace::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get() {
        let ns = Namespace::new();
        let created = ns.create("0::CURRENT");
        let found = ns.get("0::CURRENT").unwrap();
        assert_eq!(created.id(), found.id());
        assert!(ns.get("0::MISSING").is_none());
    }

    #[test]
    fn create_replaces_binding() {
        let ns = Namespace::new();
        let first = ns.create("0::x");
        let second = ns.create("0::x");
        assert_ne!(first.id(), second.id());
        assert_eq!(ns.get("0::x").unwrap().id(), second.id());
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn anonymous_names_are_sequential() {
        let ns = Namespace::new();
        assert_eq!(ns.fresh_anonymous(), "_anon_0");
        assert_eq!(ns.fresh_anonymous(), "_anon_1");
    }

    #[test]
    fn detached_stacks_are_unregistered() {
        let ns = Namespace::new();
        let scratch = ns.detached();
        assert_eq!(ns.len(), 0);
        scratch.push(std::sync::Arc::new(crate::value::Value::integer(1)));
        assert_eq!(scratch.len(), 1);
    }

    #[test]
    fn stack_ids_are_unique() {
        let ns = Namespace::new();
        let a = ns.create("0::a");
        let b = ns.create("0::b");
        let c = ns.detached();
        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
    }
}
