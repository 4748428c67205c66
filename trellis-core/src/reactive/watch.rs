//! Watchers
//!
//! A watcher is an effect that splits its work in two: reading the watched
//! sources (tracked) and reacting to a change (untracked). The callback
//! receives the new and previous values and is never called for the initial
//! values captured at setup.
//!
//! Anything implementing [`WatchSource`] can be watched: signals, computed
//! values, vectors and tuples of sources, and arbitrary getters wrapped with
//! [`source_fn`].

use super::computed::Computed;
use super::context::untracked;
use super::effect::{effect, Effect, OnCleanup};
use super::signal::Signal;

/// Something whose current value can be read with tracking.
pub trait WatchSource: 'static {
    type Value: Clone + 'static;

    /// Read the current value, tracking every source involved.
    fn read(&self) -> Self::Value;
}

impl<T: Clone + 'static> WatchSource for Signal<T> {
    type Value = T;

    fn read(&self) -> T {
        self.get()
    }
}

impl<T: Clone + 'static> WatchSource for Computed<T> {
    type Value = T;

    fn read(&self) -> T {
        self.get()
    }
}

impl<S: WatchSource> WatchSource for Vec<S> {
    type Value = Vec<S::Value>;

    fn read(&self) -> Self::Value {
        self.iter().map(WatchSource::read).collect()
    }
}

macro_rules! impl_watch_source_for_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: WatchSource),+> WatchSource for ($($name,)+) {
            type Value = ($($name::Value,)+);

            fn read(&self) -> Self::Value {
                ($(self.$idx.read(),)+)
            }
        }
    };
}

impl_watch_source_for_tuple!(A: 0, B: 1);
impl_watch_source_for_tuple!(A: 0, B: 1, C: 2);
impl_watch_source_for_tuple!(A: 0, B: 1, C: 2, D: 3);

/// A getter used as a watch source. See [`source_fn`].
pub struct FnSource<F>(F);

/// Watch the value returned by `getter`. Every source it reads is tracked.
pub fn source_fn<T, F>(getter: F) -> FnSource<F>
where
    T: Clone + 'static,
    F: Fn() -> T + 'static,
{
    FnSource(getter)
}

impl<T, F> WatchSource for FnSource<F>
where
    T: Clone + 'static,
    F: Fn() -> T + 'static,
{
    type Value = T;

    fn read(&self) -> T {
        (self.0)()
    }
}

/// Options accepted by [`watch_with_options`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Dispose the watcher after the first callback.
    pub once: bool,
}

/// Call `callback(&new, &old)` every time a watched source changes.
///
/// The callback is not called for the values present at setup. Changes made
/// inside a batch produce one call with the final values.
///
/// ```
/// use trellis_core::reactive::{signal, watch};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let count = signal(0);
/// let changes = Rc::new(RefCell::new(Vec::new()));
///
/// let changes_clone = changes.clone();
/// let _watcher = watch(count.clone(), move |new: &i32, old: &i32| {
///     changes_clone.borrow_mut().push((*new, *old));
/// });
///
/// count.set(1);
/// count.set(5);
/// assert_eq!(*changes.borrow(), vec![(1, 0), (5, 1)]);
/// ```
pub fn watch<S, F>(sources: S, callback: F) -> Effect
where
    S: WatchSource,
    F: FnMut(&S::Value, &S::Value) + 'static,
{
    watch_with_options(sources, callback, WatchOptions::default())
}

pub fn watch_with_options<S, F>(sources: S, mut callback: F, options: WatchOptions) -> Effect
where
    S: WatchSource,
    F: FnMut(&S::Value, &S::Value) + 'static,
{
    watch_changes(sources, move |new, old, scope| {
        callback(new, old);
        if options.once {
            scope.dispose();
        }
    })
}

/// Call `callback(&new)` on the first change only, then stop watching.
pub fn watch_once<S, F>(sources: S, callback: F) -> Effect
where
    S: WatchSource,
    F: FnOnce(&S::Value) + 'static,
{
    let mut callback = Some(callback);
    watch_changes(sources, move |new, _old, scope| {
        if let Some(callback) = callback.take() {
            callback(new);
        }
        scope.dispose();
    })
}

fn watch_changes<S, F>(sources: S, mut on_change: F) -> Effect
where
    S: WatchSource,
    F: FnMut(&S::Value, &S::Value, &OnCleanup<'_>) + 'static,
{
    let mut previous: Option<S::Value> = None;
    effect(move |scope| {
        let next = sources.read();
        if let Some(old) = previous.replace(next.clone()) {
            untracked(|| on_change(&next, &old, scope));
        }
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{batch, computed, signal};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn watch_skips_setup() {
        let source = signal(1);
        let calls = Rc::new(Cell::new(0));

        let calls_clone = calls.clone();
        let _watcher = watch(source.clone(), move |_, _| calls_clone.set(calls_clone.get() + 1));

        assert_eq!(calls.get(), 0);
        source.set(2);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn watch_coalesces_batched_writes() {
        let source = signal(0);
        let changes = Rc::new(RefCell::new(Vec::new()));

        let changes_clone = changes.clone();
        let _watcher = watch(source.clone(), move |new: &i32, old: &i32| {
            changes_clone.borrow_mut().push((*new, *old));
        });

        batch(|| {
            source.set(1);
            source.set(2);
        });

        assert_eq!(*changes.borrow(), vec![(2, 0)]);
    }

    #[test]
    fn watch_tuple_of_sources() {
        let a = signal(1);
        let b = signal("x");
        let changes = Rc::new(RefCell::new(Vec::new()));

        let changes_clone = changes.clone();
        let _watcher = watch((a.clone(), b.clone()), move |new, old| {
            changes_clone.borrow_mut().push((*new, *old));
        });

        b.set("y");
        a.set(2);

        assert_eq!(
            *changes.borrow(),
            vec![((1, "y"), (1, "x")), ((2, "y"), (1, "y"))]
        );
    }

    #[test]
    fn watch_vec_and_computed_sources() {
        let base = signal(1);
        let base_clone = base.clone();
        let doubled = computed(move || base_clone.get() * 2);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();
        let _watcher = watch(vec![doubled.clone(), doubled], move |new, _| {
            seen_clone.borrow_mut().push(new.clone());
        });

        base.set(3);
        assert_eq!(*seen.borrow(), vec![vec![6, 6]]);
    }

    #[test]
    fn watch_getter_source() {
        let a = signal(1);
        let b = signal(2);
        let sums = Rc::new(RefCell::new(Vec::new()));

        let (a_clone, b_clone) = (a.clone(), b.clone());
        let sums_clone = sums.clone();
        let _watcher = watch(
            source_fn(move || a_clone.get() + b_clone.get()),
            move |new, old| sums_clone.borrow_mut().push((*new, *old)),
        );

        a.set(10);
        b.set(20);
        assert_eq!(*sums.borrow(), vec![(12, 3), (30, 12)]);
    }

    #[test]
    fn callback_reads_are_untracked() {
        let watched = signal(0);
        let other = signal(0);
        let calls = Rc::new(Cell::new(0));

        let calls_clone = calls.clone();
        let other_clone = other.clone();
        let _watcher = watch(watched.clone(), move |_, _| {
            other_clone.get();
            calls_clone.set(calls_clone.get() + 1);
        });

        watched.set(1);
        other.set(1);
        assert_eq!(calls.get(), 1);
        assert_eq!(other.subscriber_count(), 0);
    }

    #[test]
    fn watch_once_disposes_after_first_change() {
        let source = signal(0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();
        let watcher = watch_once(source.clone(), move |new: &i32| {
            seen_clone.borrow_mut().push(*new);
        });

        source.set(1);
        source.set(2);

        assert_eq!(*seen.borrow(), vec![1]);
        assert!(watcher.is_disposed());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn watch_with_once_option() {
        let source = signal(0);
        let calls = Rc::new(Cell::new(0));

        let calls_clone = calls.clone();
        let watcher = watch_with_options(
            source.clone(),
            move |_, _| calls_clone.set(calls_clone.get() + 1),
            WatchOptions { once: true },
        );

        source.set(1);
        source.set(2);
        assert_eq!(calls.get(), 1);
        assert!(watcher.is_disposed());
    }

    #[test]
    fn disposed_watcher_stops() {
        let source = signal(0);
        let calls = Rc::new(Cell::new(0));

        let calls_clone = calls.clone();
        let watcher = watch(source.clone(), move |_, _| calls_clone.set(calls_clone.get() + 1));
        watcher.dispose();

        source.set(1);
        assert_eq!(calls.get(), 0);
    }
}
