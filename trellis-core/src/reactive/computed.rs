//! Computed Implementation
//!
//! A Computed is a cached derived value. It is both a subscriber (it reads
//! signals and other computed values) and a source (effects and computed
//! values read it).
//!
//! # How Computed Values Work
//!
//! 1. On first read, the computation runs tracked and the result is cached.
//!
//! 2. While the state is `Clean`, reads return the cache without running the
//!    computation.
//!
//! 3. When an upstream source changes, the computed marks itself `Dirty` at
//!    once and marks computed values further downstream `Check`. A read in
//!    the middle of a batch therefore never sees a stale cache.
//!
//! 4. The computed is also queued like any other subscriber. When its turn
//!    comes it recomputes eagerly and, if the value changed, triggers its own
//!    dependents. A computed already refreshed by a read skips that step.
//!
//! # Check State
//!
//! `Check` means "an upstream computed may have changed". A read treats it
//! exactly like `Dirty` and recomputes.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::Rc;

use super::runtime::Runtime;
use super::subscriber::{DependencySet, Reactive, SubscriberId, SubscriberKind, SubscriberNode};
use crate::error::{self, ReactiveError};

/// Freshness of a computed value's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up to date.
    Clean,

    /// An upstream computed may have changed.
    Check,

    /// An upstream source changed; the value must be recomputed.
    Dirty,
}

struct ComputedInner<T> {
    node: SubscriberNode,
    compute: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
    state: Cell<ComputedState>,
    computing: Cell<bool>,
    disposed: Cell<bool>,
    /// Subscribers that read this computed.
    dependents: Rc<DependencySet>,
    equals: fn(&T, &T) -> bool,
}

impl<T: 'static> ComputedInner<T> {
    /// Bring the cache up to date if it is not clean.
    fn refresh(self: &Rc<Self>) -> Result<(), ReactiveError> {
        if self.computing.get() {
            return Err(ReactiveError::StaleComputedRead { id: self.node.id() });
        }
        if self.state.get() == ComputedState::Clean && self.value.borrow().is_some() {
            return Ok(());
        }

        let this: Rc<dyn Reactive> = self.clone();
        self.state.set(ComputedState::Clean);
        self.computing.set(true);
        let guard = ComputeGuard(&**self);
        let new_value = Runtime::run(&this, || (self.compute)());
        drop(guard);

        let changed = match self.value.borrow().as_ref() {
            Some(old) => !(self.equals)(old, &new_value),
            None => true,
        };
        if !changed {
            return Ok(());
        }

        let had_value = self.value.replace(Some(new_value)).is_some();
        if had_value {
            tracing::trace!(computed = %self.node.id(), "computed changed");
            Runtime::trigger(&self.dependents);
        }
        Ok(())
    }

    fn with_cached<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.value.borrow();
        f(value
            .as_ref()
            .expect("refreshed computed should have a value"))
    }
}

/// Clears the computing flag on every exit path. A computation that panics
/// leaves the cache dirty so the next read retries.
struct ComputeGuard<'a, T>(&'a ComputedInner<T>);

impl<T> Drop for ComputeGuard<'_, T> {
    fn drop(&mut self) {
        self.0.computing.set(false);
        if std::thread::panicking() {
            self.0.state.set(ComputedState::Dirty);
        }
    }
}

impl<T: 'static> Reactive for ComputedInner<T> {
    fn node(&self) -> &SubscriberNode {
        &self.node
    }

    fn notify(&self) {
        if self.state.get() != ComputedState::Dirty {
            self.state.set(ComputedState::Dirty);
            Runtime::mark_downstream(&self.dependents);
        }
    }

    fn mark_check(&self) -> Option<Rc<DependencySet>> {
        if self.state.get() == ComputedState::Clean {
            self.state.set(ComputedState::Check);
            Some(Rc::clone(&self.dependents))
        } else {
            None
        }
    }

    fn is_running(&self) -> bool {
        self.computing.get()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn execute(self: Rc<Self>) {
        if let Err(err) = self.refresh() {
            error::report(&err);
        }
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        Runtime::cleanup(&self.node);
    }
}

/// A cached derived value that recomputes only when its dependencies change.
///
/// ```
/// use trellis_core::reactive::{Computed, Signal};
///
/// let count = Signal::new(2);
/// let count_clone = count.clone();
/// let doubled = Computed::new(move || count_clone.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: PartialEq + 'static> Computed<T> {
    /// Create a new computed value.
    ///
    /// The computation does not run until the first read.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::new_with_equals(compute, |a, b| a == b)
    }
}

impl<T: 'static> Computed<T> {
    /// Create a computed value that uses `equals` to decide whether a
    /// recomputation produced a new value.
    pub fn new_with_equals<F>(compute: F, equals: fn(&T, &T) -> bool) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self {
            inner: Rc::new(ComputedInner {
                node: SubscriberNode::new(SubscriberKind::Computed),
                compute: Box::new(compute),
                value: RefCell::new(None),
                state: Cell::new(ComputedState::Dirty),
                computing: Cell::new(false),
                disposed: Cell::new(false),
                dependents: DependencySet::new(),
                equals,
            }),
        }
    }

    /// Get the subscriber ID of this computed.
    pub fn id(&self) -> SubscriberId {
        self.inner.node.id()
    }

    /// Get the value, registering the running computation as a dependent.
    ///
    /// # Panics
    ///
    /// Panics if called from inside this computed's own computation.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the value, or an error if it is read from inside its own
    /// computation.
    pub fn try_get(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Borrow the value, registering the running computation as a dependent.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        self.inner.refresh()?;
        Runtime::track(&self.inner.dependents);
        Ok(self.inner.with_cached(f))
    }

    /// Get the value without registering a dependency.
    ///
    /// # Panics
    ///
    /// Panics if called from inside this computed's own computation.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        match self.try_peek() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_peek(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.inner.refresh()?;
        Ok(self.inner.with_cached(T::clone))
    }

    /// Get the current cache state.
    pub fn state(&self) -> ComputedState {
        self.inner.state.get()
    }

    /// Check whether the computation has produced a value yet.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Number of sources read by the latest computation.
    pub fn dependency_count(&self) -> usize {
        self.inner.node.dependency_count()
    }

    /// Number of subscribers that read this computed.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.len()
    }

    /// Stop tracking upstream sources.
    ///
    /// The cached value is kept and served from then on. Disposing twice
    /// does nothing.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        Runtime::cleanup(&self.inner.node);
        if self.inner.value.borrow().is_some() {
            self.inner.state.set(ComputedState::Clean);
        }
        tracing::debug!(computed = %self.inner.node.id(), "computed disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

/// Shorthand for [`Computed::new`].
pub fn computed<T, F>(compute: F) -> Computed<T>
where
    T: PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Computed::new(compute)
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
