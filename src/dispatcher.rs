// File: src/dispatcher.rs
//
// The ready queue. Context ids waiting for an executor slice sit in a FIFO;
// CALL inserts children at the head so freshly spawned work runs promptly.
// The live counter tracks contexts that have not yet drained their CODE
// stack; workers exit when it reaches zero.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
pub struct Dispatcher {
    queue: Mutex<VecDeque<u64>>,
    live: AtomicU64,
    halted: AtomicBool,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher {
            queue: Mutex::new(VecDeque::new()),
            live: AtomicU64::new(0),
            halted: AtomicBool::new(false),
        }
    }

    /// Queue a context at the tail (suspension and requeueing).
    pub fn enqueue_back(&self, ctx_id: u64) {
        self.queue.lock().unwrap().push_back(ctx_id);
    }

    /// Queue a context at the head (fresh CALL children).
    pub fn enqueue_front(&self, ctx_id: u64) {
        self.queue.lock().unwrap().push_front(ctx_id);
    }

    pub fn dequeue(&self) -> Option<u64> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Count a context in. Called before the context becomes reachable from
    /// the queue, so the counter can never dip to zero while work remains.
    pub fn admit(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a completed context out.
    pub fn retire(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn live(&self) -> u64 {
        self.live.load(Ordering::SeqCst)
    }

    /// Stop the worker pool at the next loop boundary (fatal error path).
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

impl Default for Dispatcher {
    fn default() -> Dispatcher {
        Dispatcher::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let dispatcher = Dispatcher::new();
        dispatcher.enqueue_back(1);
        dispatcher.enqueue_back(2);
        dispatcher.enqueue_back(3);
        assert_eq!(dispatcher.dequeue(), Some(1));
        assert_eq!(dispatcher.dequeue(), Some(2));
        assert_eq!(dispatcher.dequeue(), Some(3));
        assert_eq!(dispatcher.dequeue(), None);
    }

    #[test]
    fn head_insert_jumps_the_queue() {
        let dispatcher = Dispatcher::new();
        dispatcher.enqueue_back(1);
        dispatcher.enqueue_front(2);
        assert_eq!(dispatcher.dequeue(), Some(2));
        assert_eq!(dispatcher.dequeue(), Some(1));
    }

    #[test]
    fn live_counter() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.live(), 0);
        dispatcher.admit();
        dispatcher.admit();
        dispatcher.retire();
        assert_eq!(dispatcher.live(), 1);
    }

    #[test]
    fn halt_flag() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.is_halted());
        dispatcher.halt();
        assert!(dispatcher.is_halted());
    }
}
