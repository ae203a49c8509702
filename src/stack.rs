// File: src/stack.rs
//
// Thread-safe value stacks. Every stack in the machine is shared behind an
// `Arc` and serializes its mutations through one internal lock; stacks are
// created by contexts (or as detached scratch space) and live until process
// exit.

use crate::value::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// An ordered sequence of shared values with a process-unique id.
///
/// The top of the stack is the end of the entry vector. CODE stacks keep the
/// next instruction on top; captured blocks keep their first token on top.
#[derive(Debug)]
pub struct Stack {
    id: u64,
    entries: Mutex<Vec<Arc<Value>>>,
    pops: AtomicU64,
}

impl Stack {
    pub(crate) fn new(id: u64) -> Stack {
        Stack {
            id,
            entries: Mutex::new(Vec::with_capacity(16)),
            pops: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Total pops attempted against this stack, counting misses. Surfaced in
    /// debug logging when a POP finds the stack empty.
    pub fn pop_count(&self) -> u64 {
        self.pops.load(Ordering::Relaxed)
    }

    pub fn push(&self, value: Arc<Value>) {
        self.entries.lock().unwrap().push(value);
    }

    pub fn pop(&self) -> Option<Arc<Value>> {
        self.pops.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().pop()
    }

    pub fn peek(&self) -> Option<Arc<Value>> {
        self.entries.lock().unwrap().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True iff no entry is an unresolved sentinel.
    pub fn is_joined(&self) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .all(|value| !value.is_pending())
    }

    /// Move every entry of `other` into `self`, appending in pop order (so
    /// `other`'s top token lands deepest and its bottom becomes the new top).
    /// `buffered` transfers through an intermediate vector instead of
    /// streaming pop-by-pop; the resulting order is the same for a full
    /// drain. Destructive: `other` ends up empty.
    pub fn drain_from(&self, other: &Stack, buffered: bool) {
        // Draining a stack into itself would spin forever; treat as a no-op.
        if self.id == other.id {
            return;
        }
        if buffered {
            let mut moved = Vec::with_capacity(other.len());
            while let Some(value) = other.pop() {
                moved.push(value);
            }
            self.entries.lock().unwrap().extend(moved);
        } else {
            while let Some(value) = other.pop() {
                self.push(value);
            }
        }
    }

    /// Append a copy of `other`'s entries without disturbing it.
    ///
    /// With `reverse=false` the internal order is preserved (forward copy:
    /// `other`'s top stays on top of the appended run). With `reverse=true`
    /// the entries are appended top-to-bottom, so `other`'s bottom entry
    /// becomes the new top; this is how a defined body lands in a CODE
    /// stack with its first token on top.
    pub fn copy_from(&self, other: &Stack, reverse: bool) {
        if self.id == other.id {
            return;
        }
        let mut snapshot = other.entries.lock().unwrap().clone();
        if reverse {
            snapshot.reverse();
        }
        self.entries.lock().unwrap().extend(snapshot);
    }

    /// Swap the two top entries. Returns false when fewer than two exist.
    pub fn swap_top(&self) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let n = entries.len();
        if n < 2 {
            return false;
        }
        entries.swap(n - 1, n - 2);
        true
    }

    /// Reverse the whole stack in place. Block capture appends tokens in
    /// source order and then reverses once, leaving the first token on top.
    pub fn reverse(&self) {
        self.entries.lock().unwrap().reverse();
    }

    /// Copy of the entry vector, bottom first. Test and trace helper.
    pub fn snapshot(&self) -> Vec<Arc<Value>> {
        self.entries.lock().unwrap().clone()
    }

    /// Space-joined rendering for trace logging.
    pub fn render(&self) -> String {
        self.snapshot()
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Op, Value};

    fn stack_of(values: &[i64]) -> Stack {
        let stack = Stack::new(900);
        for &n in values {
            stack.push(Arc::new(Value::integer(n)));
        }
        stack
    }

    fn ints(stack: &Stack) -> Vec<i64> {
        stack
            .snapshot()
            .iter()
            .map(|value| value.as_integer())
            .collect()
    }

    #[test]
    fn push_pop_is_lifo() {
        let stack = stack_of(&[1, 2, 3]);
        assert_eq!(stack.pop().unwrap().as_integer(), 3);
        assert_eq!(stack.pop().unwrap().as_integer(), 2);
        assert_eq!(stack.pop().unwrap().as_integer(), 1);
        assert!(stack.pop().is_none());
    }

    #[test]
    fn peek_does_not_remove() {
        let stack = stack_of(&[7]);
        assert_eq!(stack.peek().unwrap().as_integer(), 7);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn pop_counter_counts_misses() {
        let stack = stack_of(&[1]);
        stack.pop();
        stack.pop();
        assert_eq!(stack.pop_count(), 2);
    }

    #[test]
    fn joined_only_without_pending_sentinels() {
        let stack = stack_of(&[1]);
        assert!(stack.is_joined());
        let sentinel = Arc::new(Value::sentinel("_anon_0"));
        stack.push(sentinel.clone());
        assert!(!stack.is_joined());
        sentinel.resolve();
        assert!(stack.is_joined());
    }

    #[test]
    fn drain_appends_in_pop_order_and_empties_source() {
        let source = stack_of(&[1, 2, 3]);
        let streaming = Stack::new(901);
        streaming.drain_from(&source, false);
        assert_eq!(ints(&streaming), vec![3, 2, 1]);
        assert!(source.is_empty());

        let source = stack_of(&[1, 2, 3]);
        let buffered = Stack::new(902);
        buffered.drain_from(&source, true);
        assert_eq!(ints(&buffered), vec![3, 2, 1]);
        assert!(source.is_empty());
    }

    #[test]
    fn forward_copy_preserves_order() {
        let source = stack_of(&[1, 2, 3]);
        let target = Stack::new(903);
        target.copy_from(&source, false);
        assert_eq!(ints(&target), vec![1, 2, 3]);
        assert_eq!(ints(&source), vec![1, 2, 3]);
    }

    #[test]
    fn reverse_copy_inverts_order() {
        let source = stack_of(&[1, 2, 3]);
        let target = Stack::new(904);
        target.copy_from(&source, true);
        assert_eq!(ints(&target), vec![3, 2, 1]);
        assert_eq!(ints(&source), vec![1, 2, 3]);
    }

    #[test]
    fn self_merge_is_a_no_op() {
        let stack = stack_of(&[1, 2]);
        stack.drain_from(&stack, false);
        stack.copy_from(&stack, true);
        assert_eq!(ints(&stack), vec![1, 2]);
    }

    #[test]
    fn swap_top_needs_two_entries() {
        let stack = stack_of(&[1]);
        assert!(!stack.swap_top());
        stack.push(Arc::new(Value::integer(2)));
        assert!(stack.swap_top());
        assert_eq!(ints(&stack), vec![2, 1]);
    }

    #[test]
    fn reverse_in_place() {
        let stack = stack_of(&[1, 2, 3]);
        stack.reverse();
        assert_eq!(ints(&stack), vec![3, 2, 1]);
    }

    #[test]
    fn render_uses_mnemonics_for_operators() {
        let stack = Stack::new(905);
        stack.push(Arc::new(Value::integer(4)));
        stack.push(Arc::new(Value::operator(Op::Add)));
        assert_eq!(stack.render(), "4 ADD");
    }
}
