// File: src/context.rs
//
// Activation records. A context owns four well-known stacks (CURRENT,
// PARAMS, CODE, OUT) registered under its `<id>::` prefix, a scope chain
// used for name lookup, and a small mutable record (state, return sentinel,
// mark counter) guarded by the per-context lock that also serializes
// executor slices.

use crate::namespace::Namespace;
use crate::stack::Stack;
use crate::value::Value;
use std::sync::{Arc, Mutex, MutexGuard};

/// The working stack.
pub const CURRENT: &str = "CURRENT";
/// Arguments delivered by the caller.
pub const PARAMS: &str = "PARAMS";
/// Remaining instructions, next on top.
pub const CODE: &str = "CODE";
/// Return buffer, merged into the delivery stack on completion.
pub const OUT: &str = "OUT";

/// Scheduling state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Runnable; the executor advances the step loop.
    Ok,
    /// Suspended until CURRENT holds no unresolved sentinel.
    Joining,
    /// Suspended until the top of CURRENT is resolved.
    Syncing,
}

/// The mutable part of a context, held under the per-context lock for the
/// whole of an executor slice.
#[derive(Debug)]
pub struct ContextRecord {
    /// Prefixes searched in order when resolving a local stack name; own
    /// prefix first, then the caller chain outward.
    pub scope: Vec<String>,
    pub state: ContextState,
    /// Sentinel owned by the caller; resolved when this context completes.
    pub return_value: Option<Arc<Value>>,
    /// Executed steps plus suspension checks, for diagnostics.
    pub marks: u64,
}

impl ContextRecord {
    /// Append one prefix to the scope chain.
    pub fn push_scope(&mut self, prefix: String) {
        self.scope.push(prefix);
    }

    /// Extend the scope chain with a caller's chain. The caller chain is
    /// already in lookup order, so the caller's own prefix is searched
    /// immediately after this context's own prefix.
    pub fn merge_scope(&mut self, levels: &[String]) {
        self.scope.extend_from_slice(levels);
    }
}

#[derive(Debug)]
pub struct Context {
    id: u64,
    prefix: String,
    ns: Arc<Namespace>,
    current: Arc<Stack>,
    params: Arc<Stack>,
    code: Arc<Stack>,
    out: Arc<Stack>,
    record: Mutex<ContextRecord>,
}

impl Context {
    /// Register a fresh context: mints the prefix, creates the four
    /// well-known stacks in the namespace, and seeds the scope chain with
    /// the own prefix.
    pub fn new(id: u64, ns: Arc<Namespace>) -> Context {
        let prefix = format!("{id}::");
        let current = ns.create(&format!("{prefix}{CURRENT}"));
        let params = ns.create(&format!("{prefix}{PARAMS}"));
        let code = ns.create(&format!("{prefix}{CODE}"));
        let out = ns.create(&format!("{prefix}{OUT}"));
        Context {
            id,
            record: Mutex::new(ContextRecord {
                scope: vec![prefix.clone()],
                state: ContextState::Ok,
                return_value: None,
                marks: 0,
            }),
            prefix,
            ns,
            current,
            params,
            code,
            out,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn current(&self) -> &Arc<Stack> {
        &self.current
    }

    pub fn params(&self) -> &Arc<Stack> {
        &self.params
    }

    pub fn code(&self) -> &Arc<Stack> {
        &self.code
    }

    pub fn out(&self) -> &Arc<Stack> {
        &self.out
    }

    /// Acquire the per-context lock. Executor slices hold this from entry
    /// to yield or completion.
    pub fn lock(&self) -> MutexGuard<'_, ContextRecord> {
        self.record.lock().unwrap()
    }

    /// Walk a scope chain and return the first stack bound to `name`.
    pub fn find_stack(&self, scope: &[String], name: &str) -> Option<Arc<Stack>> {
        for prefix in scope {
            if let Some(stack) = self.ns.get(&format!("{prefix}{name}")) {
                return Some(stack);
            }
        }
        None
    }

    /// Create (or replace) a stack named `name` under the own prefix.
    pub fn spawn_stack(&self, name: &str) -> Arc<Stack> {
        self.ns.create(&format!("{}{name}", self.prefix))
    }

    /// Mint a fresh `_anon_<n>` stack under the own prefix.
    pub fn spawn_anonymous(&self) -> (String, Arc<Stack>) {
        let name = self.ns.fresh_anonymous();
        let stack = self.spawn_stack(&name);
        (name, stack)
    }
}
