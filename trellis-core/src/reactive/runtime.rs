//! Reactive Runtime
//!
//! The runtime is the dependency tracker that connects sources (signals and
//! computed values) to the subscribers that read them, and reruns those
//! subscribers when a source changes.
//!
//! # How It Works
//!
//! 1. `track` is called on every read. If a subscriber is running, an edge is
//!    recorded on both sides: the source's dependency set gains the
//!    subscriber and the subscriber's node gains the set.
//!
//! 2. `run` executes a subscriber body. It first calls `cleanup`, which
//!    removes every edge from the previous run, then pushes the subscriber
//!    onto the context stack. Edges therefore always describe the most
//!    recent run only.
//!
//! 3. `trigger` is called on every change. Each subscriber in the set is
//!    notified synchronously, then either deferred to the open batch or
//!    queued and drained.
//!
//! # Queue and Drain
//!
//! Reruns never recurse. A trigger raised while a drain is in progress
//! appends to the same FIFO queue and the outermost drain picks it up. Each
//! subscriber is queued at most once at a time, and a subscriber that is
//! currently running is never queued: that is how an effect writing a value
//! it reads avoids looping on itself.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::batch;
use super::context::ReactiveContext;
use super::subscriber::{DependencySet, Reactive, SubscriberId, SubscriberNode};
use crate::config;
use crate::error::{self, ReactiveError};

thread_local! {
    static QUEUE: RefCell<VecDeque<Rc<dyn Reactive>>> = const { RefCell::new(VecDeque::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// The dependency tracker.
///
/// All state lives in thread-locals; `Runtime` only namespaces the
/// operations.
pub struct Runtime;

impl Runtime {
    /// Record that the running subscriber read a source.
    ///
    /// Outside of a tracking frame, or when the running subscriber has been
    /// disposed, this does nothing.
    pub(crate) fn track(set: &Rc<DependencySet>) {
        let Some(current) = ReactiveContext::current() else {
            return;
        };
        if current.is_disposed() {
            return;
        }

        let node = current.node();
        if set.insert(node.id(), Rc::downgrade(&current)) {
            node.add_dependency(Rc::clone(set));
        }
    }

    /// Notify every subscriber of a source that it changed.
    pub(crate) fn trigger(set: &DependencySet) {
        let subscribers = set.snapshot();
        if subscribers.is_empty() {
            return;
        }

        for subscriber in &subscribers {
            subscriber.notify();
        }

        if batch::is_batching() {
            tracing::trace!(count = subscribers.len(), "deferring subscribers to batch");
            for subscriber in subscribers {
                batch::defer(subscriber);
            }
            return;
        }

        for subscriber in subscribers {
            Self::enqueue(subscriber);
        }
        Self::drain();
    }

    /// Walk downstream from a source, marking clean computed values as
    /// possibly stale.
    pub(crate) fn mark_downstream(set: &DependencySet) {
        let mut stack = set.snapshot();
        while let Some(subscriber) = stack.pop() {
            if let Some(dependents) = subscriber.mark_check() {
                stack.extend(dependents.snapshot());
            }
        }
    }

    /// Execute `f` as the body of `subscriber`, rebuilding its edges.
    pub(crate) fn run<R>(subscriber: &Rc<dyn Reactive>, f: impl FnOnce() -> R) -> R {
        Self::cleanup(subscriber.node());
        let _ctx = ReactiveContext::enter(Rc::clone(subscriber));
        f()
    }

    /// Remove a subscriber from every dependency set it is registered in.
    pub(crate) fn cleanup(node: &SubscriberNode) {
        for set in node.take_dependencies() {
            set.remove(node.id());
        }
    }

    /// Append a subscriber to the drain queue.
    pub(crate) fn enqueue(subscriber: Rc<dyn Reactive>) {
        let node = subscriber.node();
        if subscriber.is_disposed() || node.is_queued() {
            return;
        }
        if subscriber.is_running() {
            error::report(&ReactiveError::ReentrantTrigger { id: node.id() });
            return;
        }

        node.set_queued(true);
        QUEUE.with(|queue| queue.borrow_mut().push_back(subscriber));
    }

    /// Run queued subscribers until the queue is empty.
    ///
    /// Returns immediately when called from inside a drain; the outer drain
    /// owns the queue. Once the queue is empty, `after_batch` callbacks left
    /// by batches that closed during the drain are run.
    pub(crate) fn drain() {
        if DRAINING.with(|draining| draining.replace(true)) {
            return;
        }

        {
            let _guard = DrainGuard;
            let limit = config::runtime_config().max_drain_iterations;
            let mut runs = 0usize;

            while let Some(subscriber) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
                subscriber.node().set_queued(false);
                if subscriber.is_disposed() || subscriber.is_running() {
                    continue;
                }

                runs += 1;
                if runs > limit {
                    let err = ReactiveError::UpdateDepthExceeded { limit };
                    error::report(&err);
                    panic!("{err}");
                }

                tracing::trace!(
                    subscriber = %subscriber.node().id(),
                    kind = ?subscriber.node().kind(),
                    "rerunning subscriber"
                );
                subscriber.execute();
            }
        }

        if !batch::is_batching() {
            batch::run_after_batch_callbacks();
        }
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if reads are currently tracked.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }

    /// Check if a drain is in progress on this thread.
    pub fn is_draining() -> bool {
        DRAINING.with(Cell::get)
    }
}

/// Resets the drain flag on every exit path. If the drain is unwinding, the
/// rest of the queue is abandoned so the next write starts clean.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = DRAINING.try_with(|draining| draining.set(false));

        let abandoned = QUEUE
            .try_with(|queue| std::mem::take(&mut *queue.borrow_mut()))
            .unwrap_or_default();
        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), "abandoning queued subscribers");
        }
        for subscriber in abandoned {
            subscriber.node().set_queued(false);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::subscriber::SubscriberKind;
    use std::cell::RefCell;

    /// A subscriber that records its runs and optionally reads sources.
    struct Recorder {
        node: SubscriberNode,
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
        reads: RefCell<Vec<Rc<DependencySet>>>,
        running: Cell<bool>,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Rc<Self> {
            Rc::new(Self {
                node: SubscriberNode::new(SubscriberKind::Effect),
                name,
                log: log.clone(),
                reads: RefCell::new(Vec::new()),
                running: Cell::new(false),
            })
        }

        fn reads(&self, sets: &[&Rc<DependencySet>]) {
            *self.reads.borrow_mut() = sets.iter().map(|s| Rc::clone(s)).collect();
        }
    }

    impl Reactive for Recorder {
        fn node(&self) -> &SubscriberNode {
            &self.node
        }
        fn is_running(&self) -> bool {
            self.running.get()
        }
        fn is_disposed(&self) -> bool {
            false
        }
        fn execute(self: Rc<Self>) {
            let this: Rc<dyn Reactive> = self.clone();
            self.running.set(true);
            Runtime::run(&this, || {
                self.log.borrow_mut().push(self.name);
                for set in self.reads.borrow().iter() {
                    Runtime::track(set);
                }
            });
            self.running.set(false);
        }
    }

    #[test]
    fn track_outside_context_is_noop() {
        let set = DependencySet::new();
        Runtime::track(&set);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn run_records_symmetric_edges() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = DependencySet::new();
        let b = DependencySet::new();
        let sub = Recorder::new("sub", &log);
        sub.reads(&[&a, &b, &a]);

        sub.clone().execute();

        assert!(a.contains(sub.node.id()));
        assert!(b.contains(sub.node.id()));
        assert_eq!(sub.node.dependency_count(), 2);
    }

    #[test]
    fn rerun_drops_stale_edges() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = DependencySet::new();
        let b = DependencySet::new();
        let sub = Recorder::new("sub", &log);

        sub.reads(&[&a]);
        sub.clone().execute();
        sub.reads(&[&b]);
        sub.clone().execute();

        assert!(!a.contains(sub.node.id()));
        assert!(b.contains(sub.node.id()));
    }

    #[test]
    fn trigger_runs_subscribers_in_insertion_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let set = DependencySet::new();
        let first = Recorder::new("first", &log);
        let second = Recorder::new("second", &log);
        first.reads(&[&set]);
        second.reads(&[&set]);
        first.clone().execute();
        second.clone().execute();
        log.borrow_mut().clear();

        Runtime::trigger(&set);

        assert_eq!(*log.borrow(), vec!["first", "second"]);
        assert!(!Runtime::is_draining());
    }

    #[test]
    fn running_subscriber_is_not_queued() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sub = Recorder::new("sub", &log);
        sub.running.set(true);

        Runtime::enqueue(sub.clone());

        assert!(!sub.node.is_queued());
    }

    #[test]
    fn cleanup_removes_every_edge() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = DependencySet::new();
        let sub = Recorder::new("sub", &log);
        sub.reads(&[&a]);
        sub.clone().execute();

        Runtime::cleanup(&sub.node);

        assert_eq!(a.len(), 0);
        assert_eq!(sub.node.dependency_count(), 0);
    }
}
