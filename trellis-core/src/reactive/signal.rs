//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a computed or effect is running, that
//!    computation is registered in the signal's dependency set.
//!
//! 2. When a signal is written, the new value is compared with the old one.
//!    An equal value is ignored entirely.
//!
//! 3. A changed value is stored, raw listeners are called, and every
//!    registered subscriber is triggered.
//!
//! # Listeners
//!
//! [`Signal::subscribe`] attaches a plain callback that is not part of the
//! dependency graph. Listeners are called synchronously on every successful
//! write, inside a batch or not, and are removed through the returned
//! [`Subscription`].

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::runtime::Runtime;
use super::subscriber::DependencySet;

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique signal ID.
fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Listeners receive the cell and clone the value out before calling user
/// code, so a listener may write back to the signal.
type Listener<T> = Rc<dyn Fn(&RefCell<T>)>;

struct SignalInner<T> {
    id: u64,
    value: RefCell<T>,
    subscribers: Rc<DependencySet>,
    listeners: RefCell<IndexMap<u64, Listener<T>>>,
    next_listener: Cell<u64>,
    equals: fn(&T, &T) -> bool,
}

/// A reactive cell holding a value of type `T`.
///
/// Cloning a signal yields another handle to the same cell.
///
/// ```
/// use trellis_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// assert!(count.set(5));
/// assert!(!count.set(5));
/// assert_eq!(count.peek(), 5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    ///
    /// Writes are compared with `PartialEq`. For floats this means a `NaN`
    /// write always counts as a change, since `NaN != NaN`; use
    /// [`Signal::new_with_equals`] with a comparison such as
    /// `|a, b| a.to_bits() == b.to_bits()` to treat repeated `NaN` as
    /// unchanged.
    pub fn new(value: T) -> Self {
        Self::new_with_equals(value, |a, b| a == b)
    }
}

impl<T: 'static> Signal<T> {
    /// Create a signal that uses `equals` to decide whether a write changed
    /// the value.
    pub fn new_with_equals(value: T, equals: fn(&T, &T) -> bool) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                id: next_signal_id(),
                value: RefCell::new(value),
                subscribers: DependencySet::new(),
                listeners: RefCell::new(IndexMap::new()),
                next_listener: Cell::new(0),
                equals,
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the current value, registering the running computation as a
    /// subscriber.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, registering the running computation as a
    /// subscriber.
    ///
    /// `f` must not write to this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        Runtime::track(&self.inner.subscribers);
        f(&self.inner.value.borrow())
    }

    /// Get the current value without tracking.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value without tracking.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Set a new value.
    ///
    /// Returns `false` and notifies nobody when the value is equal to the
    /// current one. Otherwise listeners run, then subscribers are triggered.
    pub fn set(&self, value: T) -> bool {
        let unchanged = (self.inner.equals)(&self.inner.value.borrow(), &value);
        if unchanged {
            return false;
        }

        let previous = self.inner.value.replace(value);
        drop(previous);
        tracing::trace!(signal = self.inner.id, "signal changed");

        self.notify_listeners();
        Runtime::trigger(&self.inner.subscribers);
        true
    }

    /// Update the value using a function of the current value.
    ///
    /// The current value is read without tracking.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = f(&self.inner.value.borrow());
        self.set(new_value)
    }

    /// Attach a listener called with the new value after every successful
    /// write.
    ///
    /// Dropping the returned [`Subscription`] keeps the listener attached;
    /// call [`Subscription::unsubscribe`] to remove it.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + 'static,
        T: Clone,
    {
        let key = self.inner.next_listener.get();
        self.inner.next_listener.set(key + 1);
        let listener: Listener<T> = Rc::new(move |cell: &RefCell<T>| {
            let value = cell.borrow().clone();
            listener(&value);
        });
        self.inner.listeners.borrow_mut().insert(key, listener);

        let weak: Weak<SignalInner<T>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.borrow_mut().shift_remove(&key);
            }
        })
    }

    /// Get the number of computations that currently depend on this signal.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Get the number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    fn notify_listeners(&self) {
        let listeners: Vec<Listener<T>> = self.inner.listeners.borrow().values().cloned().collect();
        if listeners.is_empty() {
            return;
        }

        for listener in listeners {
            listener(&self.inner.value);
        }
    }
}

/// Shorthand for [`Signal::new`].
pub fn signal<T: PartialEq + 'static>(value: T) -> Signal<T> {
    Signal::new(value)
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by [`Signal::subscribe`].
pub struct Subscription {
    unsubscribe: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: RefCell::new(Some(Box::new(unsubscribe))),
        }
    }

    /// Detach the listener. Calling this more than once does nothing.
    pub fn unsubscribe(&self) {
        let unsubscribe = self.unsubscribe.borrow_mut().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    pub fn is_active(&self) -> bool {
        self.unsubscribe.borrow().is_some()
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect;

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        assert!(signal.update(|v| v + 5));
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn equal_write_is_ignored() {
        let signal = Signal::new(String::from("a"));
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let _sub = signal.subscribe(move |_| calls_clone.set(calls_clone.get() + 1));

        assert!(!signal.set(String::from("a")));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn custom_equality() {
        let signal = Signal::new_with_equals(1.0_f64, |a, b| (a - b).abs() < 0.5);
        assert!(!signal.set(1.2));
        assert!(signal.set(2.0));
        assert_eq!(signal.peek(), 2.0);
    }

    #[test]
    fn signal_notifies_listeners() {
        let signal = Signal::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();

        let _sub = signal.subscribe(move |v| seen_clone.borrow_mut().push(*v));

        signal.set(1);
        signal.set(2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn signal_unsubscribe_is_idempotent() {
        let signal = Signal::new(0);
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let sub = signal.subscribe(move |_| calls_clone.set(calls_clone.get() + 1));
        signal.set(1);
        assert_eq!(calls.get(), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(signal.listener_count(), 0);

        signal.set(2);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn listener_is_not_a_tracked_subscriber() {
        let signal = Signal::new(0);
        let _sub = signal.subscribe(|_| {});
        assert_eq!(signal.subscriber_count(), 0);
        assert_eq!(signal.listener_count(), 1);
    }

    #[test]
    fn unsubscribe_after_signal_dropped() {
        let signal = Signal::new(0);
        let sub = signal.subscribe(|_| {});
        drop(signal);
        sub.unsubscribe();
    }

    #[test]
    fn peek_does_not_track() {
        let signal = Signal::new(3);
        let signal_clone = signal.clone();
        let _effect = effect(move |_| {
            signal_clone.peek();
        });

        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn get_inside_effect_tracks() {
        let signal = Signal::new(3);
        let signal_clone = signal.clone();
        let _effect = effect(move |_| {
            signal_clone.get();
        });

        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);

        signal2.set(100);
        assert_eq!(signal1.get(), 100);
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn debug_shows_value() {
        let signal = Signal::new(7);
        let text = format!("{signal:?}");
        assert!(text.contains("value: 7"));
    }

    #[test]
    fn nan_counts_as_change_unless_compared_by_bits() {
        let plain = Signal::new(f64::NAN);
        assert!(plain.set(f64::NAN));

        let by_bits =
            Signal::new_with_equals(f64::NAN, |a: &f64, b: &f64| a.to_bits() == b.to_bits());
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let by_bits_clone = by_bits.clone();
        let _effect = effect(move |_| {
            by_bits_clone.get();
            runs_clone.set(runs_clone.get() + 1);
        });

        assert!(!by_bits.set(f64::NAN));
        assert_eq!(runs.get(), 1);
    }
}
