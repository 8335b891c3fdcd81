//! Deferred work that may outlive the response.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;

/// Host execution context able to keep the worker alive for background tasks.
pub trait ExecutionContext {
    fn wait_until(&self, task: LocalBoxFuture<'static, ()>);
}

/// A bound `wait_until` capability stored in the per-request context.
#[derive(Clone)]
pub struct WaitUntilHandle {
    ctx: Rc<dyn ExecutionContext>,
}

impl WaitUntilHandle {
    pub fn new(ctx: Rc<dyn ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub fn wait_until<F>(&self, task: F)
    where
        F: Future<Output = ()> + 'static,
    {
        self.ctx.wait_until(task.boxed_local());
    }
}

impl fmt::Debug for WaitUntilHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitUntilHandle").finish_non_exhaustive()
    }
}

/// Single-threaded queue of deferred tasks. Hosts drain it once the response is sent.
#[derive(Default)]
pub struct DeferredTasks {
    queue: RefCell<VecDeque<LocalBoxFuture<'static, ()>>>,
}

impl DeferredTasks {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Run every queued task to completion, including tasks queued by tasks.
    /// Returns how many tasks ran.
    pub async fn drain(&self) -> usize {
        let mut ran = 0;
        loop {
            // The borrow must end before awaiting: tasks may enqueue more work.
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task.await;
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl ExecutionContext for DeferredTasks {
    fn wait_until(&self, task: LocalBoxFuture<'static, ()>) {
        self.queue.borrow_mut().push_back(task);
    }
}
