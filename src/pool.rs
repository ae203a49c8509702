// File: src/pool.rs
//
// The worker pool: a fixed set of native threads draining the dispatcher
// queue until the live-context counter reaches zero. Suspension is
// re-enqueueing, so workers never park; an empty queue with live contexts
// just spins until one of them is requeued.

use crate::errors::VmError;
use crate::vm::Machine;
use log::debug;
use std::sync::Arc;
use std::thread;

/// Worker count used when the CLI does not override it.
pub const DEFAULT_WORKERS: usize = 8;

/// Drive the machine to completion on its worker pool. Returns the first
/// fatal error any worker recorded, if one did.
pub fn run(machine: &Arc<Machine>) -> Result<(), VmError> {
    let count = machine.worker_count().max(1);
    let mut handles = Vec::with_capacity(count);
    for worker in 0..count {
        let machine = Arc::clone(machine);
        let handle = thread::Builder::new()
            .name(format!("strand-worker-{worker}"))
            .spawn(move || worker_loop(&machine, worker))
            .expect("failed to spawn worker thread");
        handles.push(handle);
    }
    for handle in handles {
        if handle.join().is_err() {
            machine.record_failure(VmError::invariant("Worker thread panicked!"));
        }
    }
    match machine.take_failure() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn worker_loop(machine: &Machine, worker: usize) {
    debug!("worker {worker} starting");
    while machine.dispatcher.live() > 0 && !machine.dispatcher.is_halted() {
        machine.set_running(worker, true);
        let outcome = machine.slice(worker);
        machine.set_running(worker, false);
        if let Err(err) = outcome {
            machine.record_failure(err);
            break;
        }
    }
    debug!(
        "worker {worker} exiting ({} live, {} queued)",
        machine.dispatcher.live(),
        machine.dispatcher.queue_len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use std::io;

    #[test]
    fn pool_drains_a_trivial_program() {
        let machine = Arc::new(Machine::with_sink(2, Box::new(io::sink())));
        machine.load(tokenize("1 2 add"));
        run(&machine).unwrap();
        assert_eq!(machine.dispatcher.live(), 0);
        assert_eq!(machine.dispatcher.queue_len(), 0);
        for status in machine.workers() {
            assert!(!status.running.load(std::sync::atomic::Ordering::Relaxed));
        }
    }

    #[test]
    fn first_error_halts_the_pool() {
        let machine = Arc::new(Machine::with_sink(2, Box::new(io::sink())));
        machine.load(tokenize("missing pop"));
        let err = run(&machine).unwrap_err();
        assert_eq!(err.to_string(), "POP: Stack not found!");
        assert!(machine.dispatcher.is_halted());
    }
}
