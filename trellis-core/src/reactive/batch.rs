//! Batching
//!
//! A batch defers reruns until a group of writes is complete. While a batch
//! is open, triggered subscribers collect in a single pending set keyed by
//! identity, so a subscriber reached by several writes is recorded once.
//! When the outermost batch closes, the pending set is flushed through the
//! drain queue in the order subscribers were first deferred.
//!
//! Batches nest: `start_batch` and `end_batch` maintain a counter, and only
//! the transition back to zero flushes. Writes themselves are never deferred;
//! reads inside a batch see the latest values.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;

use super::runtime::Runtime;
use super::subscriber::{Reactive, SubscriberId};
use crate::error::{self, ReactiveError};

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static PENDING: RefCell<IndexMap<SubscriberId, Rc<dyn Reactive>>> = RefCell::new(IndexMap::new());
    static AFTER_BATCH: RefCell<VecDeque<Box<dyn FnOnce()>>> = const { RefCell::new(VecDeque::new()) };
}

/// Open a batch. Must be paired with [`end_batch`].
pub fn start_batch() {
    DEPTH.with(|depth| depth.set(depth.get() + 1));
}

/// Close a batch. Closing the outermost batch flushes pending subscribers
/// and then runs queued [`after_batch`] callbacks.
///
/// Calling this without an open batch reports a misuse and does nothing.
pub fn end_batch() {
    let remaining = DEPTH.with(|depth| {
        let current = depth.get();
        if current == 0 {
            return None;
        }
        depth.set(current - 1);
        Some(current - 1)
    });

    match remaining {
        None => error::report(&ReactiveError::MisuseOutsideContext {
            helper: "end_batch",
            expected: "a batch",
        }),
        Some(0) => {
            flush();
            // Inside a drain the flushed subscribers only joined the outer
            // queue; the drain runs the callbacks once that queue is empty.
            if !Runtime::is_draining() {
                run_after_batch_callbacks();
            }
        }
        Some(_) => {}
    }
}

/// Run `f` inside a batch and return its result.
///
/// The batch is closed and flushed even if `f` panics; the panic resumes
/// once the flush has finished. Writes made before the panic stay applied.
/// If the flush panics as well, that panic is logged and dropped, and the
/// panic from `f` is the one the caller sees.
///
/// ```
/// use trellis_core::reactive::{batch, effect, signal};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let a = signal(1);
/// let b = signal(2);
/// let runs = Rc::new(Cell::new(0));
///
/// let runs_clone = runs.clone();
/// let (a_clone, b_clone) = (a.clone(), b.clone());
/// let _effect = effect(move |_| {
///     let _ = a_clone.get() + b_clone.get();
///     runs_clone.set(runs_clone.get() + 1);
/// });
///
/// batch(|| {
///     a.set(10);
///     b.set(20);
/// });
///
/// assert_eq!(runs.get(), 2);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    start_batch();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => {
            end_batch();
            value
        }
        Err(payload) => {
            if panic::catch_unwind(end_batch).is_err() {
                tracing::warn!("batch flush panicked while unwinding a panicking batch");
            }
            panic::resume_unwind(payload)
        }
    }
}

/// Wrap `f` so that every call runs inside a batch.
pub fn batched<A, R, F>(f: F) -> impl Fn(A) -> R
where
    F: Fn(A) -> R,
{
    move |args| batch(|| f(args))
}

/// Check if a batch is open on this thread.
pub fn is_batching() -> bool {
    batch_depth() > 0
}

/// Current batch nesting depth.
pub fn batch_depth() -> usize {
    DEPTH.with(Cell::get)
}

/// Run `f` once no batch is open.
///
/// Outside a batch `f` runs immediately. Inside one it is queued and runs
/// after the outermost batch has closed and its pending subscribers have
/// rerun.
pub fn after_batch(f: impl FnOnce() + 'static) {
    if !is_batching() {
        f();
        return;
    }
    AFTER_BATCH.with(|queue| queue.borrow_mut().push_back(Box::new(f)));
}

/// Record a triggered subscriber for the open batch.
pub(crate) fn defer(subscriber: Rc<dyn Reactive>) {
    let id = subscriber.node().id();
    PENDING.with(|pending| {
        pending.borrow_mut().entry(id).or_insert(subscriber);
    });
}

/// Number of subscribers waiting for the open batch to close.
pub fn pending_count() -> usize {
    PENDING.with(|pending| pending.borrow().len())
}

fn flush() {
    let pending = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
    if pending.is_empty() {
        return;
    }

    tracing::trace!(count = pending.len(), "flushing batch");
    for (_, subscriber) in pending {
        Runtime::enqueue(subscriber);
    }
    Runtime::drain();
}

pub(crate) fn run_after_batch_callbacks() {
    // A callback may open a batch of its own; its callbacks then wait for
    // that batch instead of running here.
    while !is_batching() {
        let Some(callback) = AFTER_BATCH.with(|queue| queue.borrow_mut().pop_front()) else {
            break;
        };
        callback();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
