//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a source is read,
//! the current computation is registered as one of its subscribers.
//!
//! # Implementation
//!
//! A thread-local stack holds the currently executing computation. Running a
//! computed or effect pushes it; the guard returned by [`ReactiveContext::enter`]
//! pops it again when dropped, including during a panic. An untracked frame
//! pushes an empty entry so reads inside it register nothing, even when an
//! outer computation is running.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use super::subscriber::{Reactive, SubscriberId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The running computation, or `None` for an untracked frame.
    subscriber: Option<Rc<dyn Reactive>>,
}

impl ContextEntry {
    fn id(&self) -> Option<SubscriberId> {
        self.subscriber.as_ref().map(|s| s.node().id())
    }
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
    _not_send: PhantomData<Rc<()>>,
}

impl ReactiveContext {
    /// Enter a tracking frame for the given subscriber.
    pub(crate) fn enter(subscriber: Rc<dyn Reactive>) -> Self {
        let subscriber_id = Some(subscriber.node().id());
        Self::push(ContextEntry {
            subscriber: Some(subscriber),
        });
        Self {
            subscriber_id,
            _not_send: PhantomData,
        }
    }

    /// Enter a frame in which reads are not tracked.
    pub fn untracked() -> Self {
        Self::push(ContextEntry { subscriber: None });
        Self {
            subscriber_id: None,
            _not_send: PhantomData,
        }
    }

    fn push(entry: ContextEntry) {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(entry));
    }

    /// Check if a computation is currently tracking reads.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(ContextEntry::id))
    }

    /// Number of frames on the stack, tracked or not.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    pub(crate) fn current() -> Option<Rc<dyn Reactive>> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.subscriber.clone())
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        // The popped entry may hold the last strong reference to its
        // subscriber, so drop it outside the stack borrow.
        let popped = CONTEXT_STACK
            .try_with(|stack| stack.borrow_mut().pop())
            .ok()
            .flatten();

        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.id(),
                self.subscriber_id,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.subscriber_id,
                entry.id()
            );
        }
    }
}

/// Run `f` without tracking any reads it performs.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::untracked();
    f()
}

/// Whether reads performed right now would be tracked.
pub fn is_tracking() -> bool {
    ReactiveContext::is_active()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
