//! Effect Implementation
//!
//! An Effect is a side-effecting computation that reruns whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its body immediately to establish its
//!    initial dependencies (unless created with `immediate: false`).
//!
//! 2. When any dependency changes, the effect is queued and rerun.
//!
//! 3. Before rerunning, cleanups registered by the previous run are called,
//!    old edges are removed, and new edges are tracked during the run.
//!
//! # Differences from Computed
//!
//! - Computed values return a value; effects do not.
//! - Computed values are read-driven; effects run on their own.
//! - Effects can register cleanups; computed values cannot.
//!
//! # Lifetime
//!
//! A live effect is held by a per-thread registry, so dropping every
//! [`Effect`] handle does not stop it. Only [`Effect::dispose`] does.
//!
//! # Reentrancy
//!
//! While the body runs, the effect is latched as running. A write inside
//! the body to a value the body reads does not requeue the effect; the
//! write is applied and the next external change reruns it normally.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context::{untracked, ReactiveContext};
use super::runtime::Runtime;
use super::subscriber::{CleanupFn, Reactive, SubscriberId, SubscriberKind, SubscriberNode};
use crate::error::{self, ReactiveError};

type EffectBody = Box<dyn FnMut(&OnCleanup<'_>)>;

thread_local! {
    static LIVE_EFFECTS: RefCell<IndexMap<SubscriberId, Rc<EffectInner>>> = RefCell::new(IndexMap::new());
}

/// Options accepted by [`effect_with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectOptions {
    /// Run the body as soon as the effect is created. When `false` the body
    /// first runs on [`Effect::run`].
    pub immediate: bool,
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self { immediate: true }
    }
}

/// Passed to every run of an effect body.
pub struct OnCleanup<'a> {
    effect: &'a EffectInner,
}

impl OnCleanup<'_> {
    /// Register a callback to run before the next run of this effect, or
    /// when it is disposed.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + 'static) {
        self.effect.add_cleanup(Box::new(cleanup));
    }

    /// Dispose the effect from inside its own body.
    pub fn dispose(&self) {
        self.effect.dispose();
    }

    /// Number of times the body has run, counting the current run.
    pub fn run_count(&self) -> usize {
        self.effect.run_count.get()
    }
}

struct EffectInner {
    node: SubscriberNode,
    body: RefCell<Option<EffectBody>>,
    cleanups: RefCell<SmallVec<[CleanupFn; 1]>>,
    running: Cell<bool>,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

impl EffectInner {
    fn add_cleanup(&self, cleanup: CleanupFn) {
        if self.disposed.get() {
            untracked(cleanup);
            return;
        }
        self.cleanups.borrow_mut().push(cleanup);
    }

    /// Run and clear every registered cleanup.
    ///
    /// All cleanups run even if one panics; the first panic is resumed
    /// afterwards.
    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        let mut first_panic = None;
        for cleanup in cleanups {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| untracked(cleanup))) {
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let id = self.node.id();
        Runtime::cleanup(&self.node);

        // A running body is out of its slot and is dropped when the run ends.
        let body = self.body.borrow_mut().take();
        drop(body);
        let registered = LIVE_EFFECTS
            .try_with(|effects| effects.borrow_mut().shift_remove(&id))
            .ok()
            .flatten();

        tracing::debug!(effect = %id, "effect disposed");
        self.run_cleanups();
        drop(registered);
    }
}

impl Reactive for EffectInner {
    fn node(&self) -> &SubscriberNode {
        &self.node
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn register_cleanup(&self, cleanup: CleanupFn) -> Result<(), CleanupFn> {
        self.add_cleanup(cleanup);
        Ok(())
    }

    fn execute(self: Rc<Self>) {
        if self.disposed.get() || self.running.get() {
            return;
        }

        self.run_cleanups();
        let Some(body) = self.body.borrow_mut().take() else {
            return;
        };

        let this: Rc<dyn Reactive> = self.clone();
        let mut run = ActiveRun::start(&self, body);
        let scope = OnCleanup { effect: &self };
        Runtime::run(&this, || run.call(&scope));
    }
}

/// The body of an effect while it runs.
///
/// The body is moved out of its slot for the duration of the run so a body
/// that disposes its own effect is not dropped while executing. On every
/// exit path the running latch is reset and, unless the effect was disposed
/// meanwhile, the body is put back.
struct ActiveRun<'a> {
    effect: &'a EffectInner,
    body: Option<EffectBody>,
}

impl<'a> ActiveRun<'a> {
    fn start(effect: &'a EffectInner, body: EffectBody) -> Self {
        effect.running.set(true);
        effect.run_count.set(effect.run_count.get() + 1);
        Self {
            effect,
            body: Some(body),
        }
    }

    fn call(&mut self, scope: &OnCleanup<'_>) {
        if let Some(body) = self.body.as_mut() {
            body(scope);
        }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.effect.running.set(false);
        if !self.effect.disposed.get() {
            if let Some(body) = self.body.take() {
                *self.effect.body.borrow_mut() = Some(body);
            }
        }
    }
}

/// Handle to a running effect.
///
/// The handle is the effect's disposer. Cloning it yields another handle to
/// the same effect.
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    fn create(body: EffectBody, options: EffectOptions) -> Self {
        let inner = Rc::new(EffectInner {
            node: SubscriberNode::new(SubscriberKind::Effect),
            body: RefCell::new(Some(body)),
            cleanups: RefCell::new(SmallVec::new()),
            running: Cell::new(false),
            disposed: Cell::new(false),
            run_count: Cell::new(0),
        });
        LIVE_EFFECTS.with(|effects| {
            effects
                .borrow_mut()
                .insert(inner.node.id(), Rc::clone(&inner));
        });

        let effect = Self { inner };
        if options.immediate {
            effect.run();
        }
        effect
    }

    /// Get the subscriber ID of this effect.
    pub fn id(&self) -> SubscriberId {
        self.inner.node.id()
    }

    /// Run the body now.
    ///
    /// Does nothing if the effect is disposed or already running.
    pub fn run(&self) {
        Rc::clone(&self.inner).execute();
    }

    /// Stop the effect, remove all its edges and run pending cleanups.
    ///
    /// Disposing more than once, or from inside the body, is safe.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Check if the body is executing right now.
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of sources read by the latest run.
    pub fn dependency_count(&self) -> usize {
        self.inner.node.dependency_count()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Create an effect that runs immediately and again whenever a value it
/// read changes.
///
/// ```
/// use trellis_core::reactive::{effect, signal};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let count = signal(0);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let log_clone = log.clone();
/// let count_clone = count.clone();
/// let handle = effect(move |_| log_clone.borrow_mut().push(count_clone.get()));
///
/// count.set(1);
/// handle.dispose();
/// count.set(2);
///
/// assert_eq!(*log.borrow(), vec![0, 1]);
/// ```
pub fn effect<F>(body: F) -> Effect
where
    F: FnMut(&OnCleanup<'_>) + 'static,
{
    effect_with_options(body, EffectOptions::default())
}

/// Create an effect with explicit options.
pub fn effect_with_options<F>(body: F, options: EffectOptions) -> Effect
where
    F: FnMut(&OnCleanup<'_>) + 'static,
{
    Effect::create(Box::new(body), options)
}

/// Register a cleanup on the effect that is currently running.
///
/// Outside of an effect body the callback is dropped without running and a
/// misuse is reported.
pub fn on_cleanup(cleanup: impl FnOnce() + 'static) {
    let cleanup: CleanupFn = Box::new(cleanup);
    let rejected = match ReactiveContext::current() {
        Some(subscriber) => subscriber.register_cleanup(cleanup).err(),
        None => Some(cleanup),
    };

    if rejected.is_some() {
        error::report(&ReactiveError::MisuseOutsideContext {
            helper: "on_cleanup",
            expected: "an effect",
        });
    }
}

/// Number of effects alive on this thread.
pub fn live_effect_count() -> usize {
    LIVE_EFFECTS.with(|effects| effects.borrow().len())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
