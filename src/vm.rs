// File: src/vm.rs
//
// The Strand machine: namespace, context registry, dispatcher wiring, and
// the slice executor. A slice dequeues one ready context, takes its lock,
// and advances it until it completes, suspends on JOIN/SYNC, or the queue
// hands the worker something else to do. CALL spawns a child context and
// keeps the caller running in the same slice.

use crate::context::{Context, ContextRecord, ContextState};
use crate::dispatcher::Dispatcher;
use crate::errors::{VmError, VmErrorKind};
use crate::namespace::Namespace;
use crate::stack::Stack;
use crate::value::{Kind, Op, Value};
use ahash::AHashMap;
use log::{debug, trace};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// What the step loop should do after an operator executes.
enum Flow {
    /// Keep stepping this context.
    Continue,
    /// The operator suspended the context; end the slice.
    Yield,
}

/// In-flight BEGIN/END capture. Lives only within a slice: while capturing,
/// no operator executes, so a capture can never span a suspension.
struct Capture {
    name: String,
    stack: Arc<Stack>,
    depth: u64,
}

/// Per-worker observability: whether the worker is inside a slice, and the
/// last context id it picked up.
#[derive(Debug, Default)]
pub struct WorkerStatus {
    pub running: AtomicBool,
    pub context: AtomicU64,
}

/// The whole machine. Shared behind an `Arc` by every worker thread.
pub struct Machine {
    ns: Arc<Namespace>,
    contexts: Mutex<AHashMap<u64, Arc<Context>>>,
    next_context_id: AtomicU64,
    pub dispatcher: Dispatcher,
    workers: Vec<WorkerStatus>,
    sink: Mutex<Box<dyn Write + Send>>,
    failure: Mutex<Option<VmError>>,
}

impl Machine {
    /// A machine printing to stdout.
    pub fn new(workers: usize) -> Machine {
        Machine::with_sink(workers, Box::new(io::stdout()))
    }

    /// A machine printing to an arbitrary sink; tests inject a buffer here.
    pub fn with_sink(workers: usize, sink: Box<dyn Write + Send>) -> Machine {
        Machine {
            ns: Arc::new(Namespace::new()),
            contexts: Mutex::new(AHashMap::new()),
            next_context_id: AtomicU64::new(0),
            dispatcher: Dispatcher::new(),
            workers: (0..workers).map(|_| WorkerStatus::default()).collect(),
            sink: Mutex::new(sink),
            failure: Mutex::new(None),
        }
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.ns
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Per-worker running flags and last-context cells.
    pub fn workers(&self) -> &[WorkerStatus] {
        &self.workers
    }

    pub(crate) fn set_running(&self, worker: usize, running: bool) {
        if let Some(status) = self.workers.get(worker) {
            status.running.store(running, Ordering::Relaxed);
        }
    }

    /// Record the first fatal error and stop the pool.
    pub fn record_failure(&self, err: VmError) {
        let mut slot = self.failure.lock().unwrap();
        if slot.is_none() {
            debug!("halting machine: {err}");
            *slot = Some(err);
        }
        self.dispatcher.halt();
    }

    pub fn take_failure(&self) -> Option<VmError> {
        self.failure.lock().unwrap().take()
    }

    /// Register a fresh context.
    pub fn spawn_context(&self) -> Arc<Context> {
        let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::new(Context::new(id, Arc::clone(&self.ns)));
        self.contexts.lock().unwrap().insert(id, Arc::clone(&ctx));
        ctx
    }

    pub fn context(&self, id: u64) -> Option<Arc<Context>> {
        self.contexts.lock().unwrap().get(&id).cloned()
    }

    /// Stage a parsed program into a fresh root context and queue it. The
    /// staging stack is drained in pop order, leaving the first token on
    /// top of the root CODE stack.
    pub fn load(&self, program: Vec<Arc<Value>>) -> Arc<Context> {
        let root = self.spawn_context();
        let staging = self.ns.detached();
        for value in program {
            staging.push(value);
        }
        root.code().drain_from(&staging, false);
        self.dispatcher.admit();
        self.dispatcher.enqueue_front(root.id());
        root
    }

    /// Run one executor slice: dequeue a context and advance it. Returns
    /// immediately when the queue is empty.
    pub fn slice(&self, worker: usize) -> Result<(), VmError> {
        let Some(ctx_id) = self.dispatcher.dequeue() else {
            return Ok(());
        };
        let ctx = self
            .context(ctx_id)
            .ok_or_else(|| VmError::invariant("Invalid context!"))?;
        if let Some(status) = self.workers.get(worker) {
            status.context.store(ctx_id, Ordering::Relaxed);
        }

        let mut rec = ctx.lock();
        let current = Arc::clone(ctx.current());
        let code = Arc::clone(ctx.code());

        match rec.state {
            ContextState::Joining => {
                if !current.is_joined() {
                    rec.marks += 1;
                    self.dispatcher.enqueue_back(ctx_id);
                    return Ok(());
                }
                rec.state = ContextState::Ok;
            }
            ContextState::Syncing => {
                let top = current.peek().ok_or_else(|| VmError::underflow("sync"))?;
                if top.is_pending() {
                    rec.marks += 1;
                    self.dispatcher.enqueue_back(ctx_id);
                    return Ok(());
                }
                rec.state = ContextState::Ok;
            }
            ContextState::Ok => {}
        }

        let mut capture: Option<Capture> = None;

        loop {
            rec.marks += 1;
            let Some(value) = code.pop() else {
                self.complete(&ctx, &rec)?;
                self.dispatcher.retire();
                return Ok(());
            };
            trace!("context {} step {}: {}", ctx_id, rec.marks, value);

            if let Some(cap) = capture.as_mut() {
                if let Kind::Operator(op) = value.kind() {
                    match op {
                        Op::Begin => cap.depth += 1,
                        Op::End => cap.depth -= 1,
                        _ => {}
                    }
                    cap.stack.push(value);
                    if cap.depth == 0 {
                        cap.stack
                            .pop()
                            .ok_or_else(|| VmError::capture("Stack error when parsing block!"))?;
                        // Tokens arrived in source order; flip so the first
                        // token sits on top for replay as code.
                        cap.stack.reverse();
                        current.push(Arc::new(Value::symbol(cap.name.clone())));
                        capture = None;
                    }
                } else {
                    cap.stack.push(value);
                }
                continue;
            }

            match value.kind() {
                Kind::Operator(op) => {
                    match self.execute_op(op, &ctx, &mut rec, &current, &code, &mut capture)? {
                        Flow::Continue => {}
                        Flow::Yield => return Ok(()),
                    }
                }
                _ => current.push(value),
            }
        }
    }

    /// CODE has drained: deliver OUT through the return sentinel, if any,
    /// and count the context out.
    fn complete(&self, ctx: &Context, rec: &ContextRecord) -> Result<(), VmError> {
        if let Some(sentinel) = rec.return_value.as_ref() {
            let delivery = ctx
                .find_stack(&rec.scope, sentinel.text())
                .ok_or_else(|| VmError::invariant("Invalid return stack!"))?;
            delivery.drain_from(ctx.out(), true);
            sentinel.resolve();
            trace!(
                "context {} delivered into '{}': {}",
                ctx.id(),
                sentinel.text(),
                delivery.render()
            );
        }
        Ok(())
    }

    fn execute_op(
        &self,
        op: Op,
        ctx: &Context,
        rec: &mut ContextRecord,
        current: &Arc<Stack>,
        code: &Arc<Stack>,
        capture: &mut Option<Capture>,
    ) -> Result<Flow, VmError> {
        match op {
            Op::Begin => {
                let (name, stack) = ctx.spawn_anonymous();
                *capture = Some(Capture {
                    name,
                    stack,
                    depth: 1,
                });
            }

            // A stray '}' outside a block; ignored.
            Op::End => {}

            Op::Push => {
                let name = current.pop().ok_or_else(|| VmError::underflow("push"))?;
                let value = current.pop().ok_or_else(|| VmError::underflow("push"))?;
                let target = ctx
                    .find_stack(&rec.scope, name.text())
                    .ok_or_else(|| VmError::missing_stack("PUSH: Stack not found!"))?;
                target.push(value);
            }

            Op::Pop => {
                let name = current.pop().ok_or_else(|| VmError::underflow("pop"))?;
                let target = ctx
                    .find_stack(&rec.scope, name.text())
                    .ok_or_else(|| VmError::missing_stack("POP: Stack not found!"))?;
                match target.pop() {
                    Some(value) => current.push(value),
                    None => {
                        debug!(
                            "pop failed: context {} mark {}, target '{}' (stack id {}, {} pops)",
                            ctx.id(),
                            rec.marks,
                            name.text(),
                            target.id(),
                            target.pop_count()
                        );
                        return Err(VmError::target_empty("POP: Target stack empty!"));
                    }
                }
            }

            Op::Def => {
                let target_name = current.pop().ok_or_else(|| VmError::underflow("def"))?;
                let value = current.pop().ok_or_else(|| VmError::underflow("def"))?;
                let target = ctx.spawn_stack(target_name.text());
                if value.kind() == Kind::Symbol {
                    let source = ctx
                        .find_stack(&rec.scope, value.text())
                        .ok_or_else(|| VmError::missing_stack("DEF: Source stack not found!"))?;
                    target.drain_from(&source, false);
                } else {
                    target.push(value);
                }
            }

            Op::Merge => {
                let name = current.pop().ok_or_else(|| VmError::underflow("merge"))?;
                let target = ctx
                    .find_stack(&rec.scope, name.text())
                    .ok_or_else(|| VmError::missing_stack("MERGE: Stack not found!"))?;
                current.drain_from(&target, true);
            }

            Op::Call => self.op_call(ctx, rec, current)?,

            Op::Join => {
                // Already joined: nothing to wait for, keep stepping.
                if !current.is_joined() {
                    rec.state = ContextState::Joining;
                    self.dispatcher.enqueue_back(ctx.id());
                    return Ok(Flow::Yield);
                }
            }

            Op::Sync => {
                rec.state = ContextState::Syncing;
                self.dispatcher.enqueue_back(ctx.id());
                return Ok(Flow::Yield);
            }

            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                self.op_arithmetic(op, current)?;
            }

            Op::Print => {
                let value = current.pop().ok_or_else(|| VmError::underflow("print"))?;
                self.print_value(&value);
            }

            Op::Dup => {
                let value = current.pop().ok_or_else(|| VmError::underflow("dup"))?;
                if value.kind() == Kind::Sentinel {
                    // Both entries must observe the same readiness flip.
                    current.push(Arc::clone(&value));
                    current.push(value);
                } else {
                    let copy = Arc::new(value.shallow_copy());
                    current.push(value);
                    current.push(copy);
                }
            }

            Op::While => self.op_while(ctx, rec, current, code)?,

            Op::If => {
                let false_name = current.pop().ok_or_else(|| VmError::underflow("if"))?;
                let true_name = current.pop().ok_or_else(|| VmError::underflow("if"))?;
                let test = current.pop().ok_or_else(|| VmError::underflow("if"))?;
                let stack_true = ctx
                    .find_stack(&rec.scope, true_name.text())
                    .ok_or_else(|| VmError::missing_stack("IF: Stack (true) not found!"))?;
                let stack_false = ctx
                    .find_stack(&rec.scope, false_name.text())
                    .ok_or_else(|| VmError::missing_stack("IF: Stack (false) not found!"))?;
                if test.as_integer() != 0 {
                    code.copy_from(&stack_true, false);
                } else {
                    code.copy_from(&stack_false, false);
                }
            }

            Op::Length => {
                let name = current.pop().ok_or_else(|| VmError::underflow("length"))?;
                let target = ctx
                    .find_stack(&rec.scope, name.text())
                    .ok_or_else(|| VmError::missing_stack("LENGTH: Stack not found!"))?;
                current.push(Arc::new(Value::integer(target.len() as i64)));
            }

            Op::Macro => {
                let name = current.pop().ok_or_else(|| VmError::underflow("macro"))?;
                let source = ctx
                    .find_stack(&rec.scope, name.text())
                    .ok_or_else(|| VmError::missing_stack("MACRO: Invalid source stack!"))?;
                // Forward splice: a captured block keeps its first token on
                // top, so its tokens execute in source order.
                code.copy_from(&source, false);
            }

            Op::Swap => {
                let name = current.pop().ok_or_else(|| VmError::underflow("swap"))?;
                let target = ctx
                    .find_stack(&rec.scope, name.text())
                    .ok_or_else(|| VmError::missing_stack("SWAP: Invalid stack!"))?;
                if !target.swap_top() {
                    return Err(VmError::new(
                        VmErrorKind::Underflow,
                        "SWAP: Not enough values in target stack!",
                    ));
                }
            }

            // Reserved tokens with no semantics yet.
            Op::Rotr | Op::Rotl => {}
        }
        Ok(Flow::Continue)
    }

    fn op_arithmetic(&self, op: Op, current: &Stack) -> Result<(), VmError> {
        let token = op.token();
        let (a, b) = match op {
            // Order-insensitive: pop order does not matter.
            Op::Add | Op::Mul => {
                let first = current.pop().ok_or_else(|| VmError::underflow(token))?;
                let second = current.pop().ok_or_else(|| VmError::underflow(token))?;
                (first.as_integer(), second.as_integer())
            }
            // `a OP b` pushes a then b, so b comes off first.
            _ => {
                let second = current.pop().ok_or_else(|| VmError::underflow(token))?;
                let first = current.pop().ok_or_else(|| VmError::underflow(token))?;
                (first.as_integer(), second.as_integer())
            }
        };
        let result = match op {
            Op::Add => a.wrapping_add(b),
            Op::Sub => a.wrapping_sub(b),
            Op::Mul => a.wrapping_mul(b),
            Op::Div | Op::Mod => {
                if b == 0 {
                    return Err(VmError::arithmetic("Division by zero!"));
                }
                if op == Op::Div {
                    a.wrapping_div(b)
                } else {
                    a.wrapping_rem(b)
                }
            }
            _ => unreachable!("not an arithmetic operator"),
        };
        current.push(Arc::new(Value::integer(result)));
        Ok(())
    }

    /// The CALL protocol: spawn a child, wire up its return sentinel and
    /// delivery stack, hand it the function body and snapshotted arguments,
    /// extend its scope with the caller's, and queue it at the head.
    fn op_call(
        &self,
        ctx: &Context,
        rec: &mut ContextRecord,
        current: &Arc<Stack>,
    ) -> Result<(), VmError> {
        let nparams = current.pop().ok_or_else(|| VmError::underflow("call"))?;
        let func = current.pop().ok_or_else(|| VmError::underflow("call"))?;

        let child = self.spawn_context();
        let mut child_rec = child.lock();

        let (delivery_name, _delivery) = ctx.spawn_anonymous();
        let sentinel = Arc::new(Value::sentinel(delivery_name));
        child_rec.return_value = Some(Arc::clone(&sentinel));

        let body = ctx
            .find_stack(&rec.scope, func.text())
            .ok_or_else(|| VmError::missing_stack("CALL: Function not found!"))?;
        // The body stack holds its first token at the bottom; the reversed
        // copy puts it on top of the child's CODE.
        child.code().copy_from(&body, true);

        let count = nparams.as_integer().max(0);
        for _ in 0..count {
            let param = current.pop().ok_or_else(|| VmError::underflow("call"))?;
            if param.kind() == Kind::Symbol {
                // Snapshot symbol arguments so the callee cannot observe
                // later caller mutations.
                let source = ctx
                    .find_stack(&rec.scope, param.text())
                    .ok_or_else(|| VmError::missing_stack("CALL: Undefined symbol!"))?;
                let (snapshot_name, snapshot) = ctx.spawn_anonymous();
                snapshot.copy_from(&source, false);
                child.params().push(Arc::new(Value::symbol(snapshot_name)));
            } else {
                child.params().push(param);
            }
        }

        child_rec.merge_scope(&rec.scope);
        drop(child_rec);

        debug!(
            "context {} spawned context {} ({} params)",
            ctx.id(),
            child.id(),
            count
        );
        self.dispatcher.admit();
        self.dispatcher.enqueue_front(child.id());
        current.push(sentinel);
        Ok(())
    }

    /// Rewrite CODE so the loop continues as: run the test, then
    /// `if <nonzero> { body; body test while } else { }`.
    fn op_while(
        &self,
        ctx: &Context,
        rec: &ContextRecord,
        current: &Arc<Stack>,
        code: &Arc<Stack>,
    ) -> Result<(), VmError> {
        let test = current.pop().ok_or_else(|| VmError::underflow("while"))?;
        let body = current.pop().ok_or_else(|| VmError::underflow("while"))?;
        let test_stack = ctx
            .find_stack(&rec.scope, test.text())
            .ok_or_else(|| VmError::missing_stack("Invalid test stack for 'while'!"))?;
        let body_stack = ctx
            .find_stack(&rec.scope, body.text())
            .ok_or_else(|| VmError::missing_stack("Invalid body stack for 'while'!"))?;

        let rewrite = self.ns.detached();
        rewrite.copy_from(&test_stack, true);
        rewrite.push(Arc::new(Value::operator(Op::Begin)));
        rewrite.copy_from(&body_stack, true);
        rewrite.push(body);
        rewrite.push(test);
        rewrite.push(Arc::new(Value::operator(Op::While)));
        rewrite.push(Arc::new(Value::operator(Op::End)));
        rewrite.push(Arc::new(Value::operator(Op::Begin)));
        rewrite.push(Arc::new(Value::operator(Op::End)));
        rewrite.push(Arc::new(Value::operator(Op::If)));
        code.drain_from(&rewrite, true);
        Ok(())
    }

    fn print_value(&self, value: &Value) {
        let mut sink = self.sink.lock().unwrap();
        let _ = writeln!(
            sink,
            "print: type={}, state={}, value='{}'",
            value.type_code(),
            value.state_code(),
            value.text()
        );
    }
}
